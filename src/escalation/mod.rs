// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Escalation module - slow classifier calls over recent incident frames
//!
//! The coordinator runs every classifier call on its own task. Whatever
//! happens (timeout, garbage reply, transport error), exactly one
//! [`AnalysisResult`] is recorded and handed back to the incident state
//! machine as an [`EscalationVerdict`].

mod parse;
mod gemini;
mod simulator;

pub use parse::parse_reply;
pub use gemini::{GeminiClassifier, DEFAULT_ENDPOINT as GEMINI_ENDPOINT};
pub use simulator::SimulatedClassifier;

use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::{EventBus, IncidentId, PipelineEvent, PipelineStats, SessionId};
use crate::db::Recorder;
use crate::incident::{FrameRecord, Snapshot};

/// Explanation recorded whenever no usable verdict was obtained
pub const FALLBACK_EXPLANATION: &str = "insufficient data";

/// Instructions sent with every image batch
pub const INSTRUCTIONS: &str = r#"Analyze these images from a security camera watching a protected zone.

Look for:
1. Hands reaching toward or into the protected item
2. Suspicious proximity to the item
3. Attempts to open zippers or access contents
4. Any behavior that suggests theft or unauthorized access

Assess the images as one continuous sequence and respond in this exact JSON format:
{
    "suspicious": true/false,
    "confidence": <number between 0-100>,
    "explanation": "<short explanation>"
}"#;

/// Parsed classifier answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub threat: bool,
    /// 0-100
    pub confidence: u8,
    pub explanation: String,
}

/// Tagged result of one classifier call
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierOutcome {
    Success { verdict: Verdict, raw: Option<String> },
    TimedOut,
    /// Unusable reply; carries the raw text or the failure description
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier API key missing (set {0})")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("classifier returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    Response(String),

    #[error("cannot send {0:?} frames to the classifier")]
    UnsupportedFormat(crate::capture::PixelFormat),
}

/// Slow, accurate external classifier
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Judge an ordered image batch. Failures are folded into the outcome.
    async fn analyze(&self, images: &[Snapshot], instructions: &str) -> ClassifierOutcome;
}

/// How an analysis result came about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisOutcome {
    Success,
    TimedOut,
    Malformed,
    InsufficientData,
}

impl AnalysisOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisOutcome::Success => "success",
            AnalysisOutcome::TimedOut => "timed-out",
            AnalysisOutcome::Malformed => "malformed",
            AnalysisOutcome::InsufficientData => "insufficient-data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AnalysisOutcome::Success),
            "timed-out" => Some(AnalysisOutcome::TimedOut),
            "malformed" => Some(AnalysisOutcome::Malformed),
            "insufficient-data" => Some(AnalysisOutcome::InsufficientData),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        !matches!(self, AnalysisOutcome::Success)
    }
}

/// Batch of recent incident frames to classify
#[derive(Debug, Clone)]
pub struct EscalationRequest {
    pub incident_id: IncidentId,
    pub session_id: SessionId,
    /// Local sequence of the oldest frame in the window
    pub frame_start: u32,
    /// Local sequence of the newest frame in the window
    pub frame_end: u32,
    /// Snapshots of the window, oldest first
    pub images: Vec<Snapshot>,
    pub requested_at: DateTime<Utc>,
}

impl EscalationRequest {
    /// Build a request from the chronological frame window of an incident
    pub fn from_window<'a>(
        incident_id: IncidentId,
        session_id: SessionId,
        window: impl IntoIterator<Item = &'a FrameRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut frame_start = 0;
        let mut frame_end = 0;
        let mut images = Vec::new();

        for frame in window {
            if frame_start == 0 {
                frame_start = frame.local_sequence;
            }
            frame_end = frame.local_sequence;
            if let Some(snapshot) = &frame.snapshot {
                images.push(snapshot.clone());
            }
        }

        Self {
            incident_id,
            session_id,
            frame_start,
            frame_end,
            images,
            requested_at: now,
        }
    }
}

/// One recorded classifier call, fallbacks included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub incident_id: IncidentId,
    pub frame_start: u32,
    pub frame_end: u32,
    /// Number of images sent to the classifier
    pub images: usize,
    pub threat: bool,
    pub confidence: u8,
    pub explanation: String,
    pub outcome: AnalysisOutcome,
    pub raw_reply: Option<String>,
    pub latency_ms: u64,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn from_outcome(request: &EscalationRequest, outcome: ClassifierOutcome, latency: Duration) -> Self {
        let (kind, verdict, raw_reply) = match outcome {
            ClassifierOutcome::Success { verdict, raw } => (AnalysisOutcome::Success, Some(verdict), raw),
            ClassifierOutcome::TimedOut => (AnalysisOutcome::TimedOut, None, None),
            ClassifierOutcome::Malformed(raw) => (AnalysisOutcome::Malformed, None, Some(raw)),
        };

        let mut result = Self::fallback(request, kind, latency);
        result.raw_reply = raw_reply;
        if let Some(verdict) = verdict {
            result.threat = verdict.threat;
            result.confidence = verdict.confidence.min(100);
            result.explanation = verdict.explanation;
        }
        result
    }

    /// No-threat result recorded when no verdict was obtained
    pub fn fallback(request: &EscalationRequest, outcome: AnalysisOutcome, latency: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_id: request.incident_id,
            frame_start: request.frame_start,
            frame_end: request.frame_end,
            images: request.images.len(),
            threat: false,
            confidence: 0,
            explanation: FALLBACK_EXPLANATION.to_string(),
            outcome,
            raw_reply: None,
            latency_ms: latency.as_millis() as u64,
            analyzed_at: Utc::now(),
        }
    }
}

/// Analysis result travelling back to the state machine
#[derive(Debug, Clone)]
pub struct EscalationVerdict {
    pub incident_id: IncidentId,
    pub result: AnalysisResult,
}

/// Runs classifier calls off the detection hot path
#[derive(Clone)]
pub struct EscalationCoordinator {
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
    recorder: Arc<Recorder>,
    event_bus: Arc<EventBus>,
    stats: Arc<PipelineStats>,
}

impl EscalationCoordinator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        timeout: Duration,
        recorder: Arc<Recorder>,
        event_bus: Arc<EventBus>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            classifier,
            timeout,
            recorder,
            event_bus,
            stats,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spawn the classifier call; the verdict is sent on `reply`
    pub fn dispatch(
        &self,
        request: EscalationRequest,
        reply: mpsc::UnboundedSender<EscalationVerdict>,
    ) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let incident_id = request.incident_id;
            let result = coordinator.escalate(request).await;
            if reply.send(EscalationVerdict { incident_id, result }).is_err() {
                debug!("Verdict for incident {} arrived after the session ended", incident_id);
            }
        })
    }

    /// Classify one batch and record exactly one analysis result
    pub async fn escalate(&self, request: EscalationRequest) -> AnalysisResult {
        let started = Instant::now();

        let result = if request.images.is_empty() {
            debug!("Incident {} has no snapshots in frames {}-{}", request.incident_id, request.frame_start, request.frame_end);
            AnalysisResult::fallback(&request, AnalysisOutcome::InsufficientData, started.elapsed())
        } else {
            debug!(
                "Sending {} images of incident {} to '{}'",
                request.images.len(),
                request.incident_id,
                self.classifier.name()
            );
            // own task, so a panicking classifier still yields a recorded result
            let classifier = self.classifier.clone();
            let images = request.images.clone();
            let mut call = tokio::spawn(async move { classifier.analyze(&images, INSTRUCTIONS).await });

            let outcome = match tokio::time::timeout(self.timeout, &mut call).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    error!("Classifier '{}' failed on incident {}: {}", self.classifier.name(), request.incident_id, e);
                    ClassifierOutcome::Malformed(format!("classifier task failed: {}", e))
                }
                Err(_) => {
                    call.abort();
                    ClassifierOutcome::TimedOut
                }
            };
            AnalysisResult::from_outcome(&request, outcome, started.elapsed())
        };

        if result.outcome.is_fallback() {
            self.stats.classifier_fallbacks.inc();
            warn!(
                "Escalation of incident {} fell back ({}) after {}ms",
                request.incident_id,
                result.outcome.as_str(),
                result.latency_ms
            );
        } else {
            info!(
                "Incident {} frames {}-{}: threat={} confidence={}%",
                request.incident_id, result.frame_start, result.frame_end, result.threat, result.confidence
            );
        }

        self.recorder.analysis(&result);
        self.event_bus.publish(PipelineEvent::AnalysisRecorded {
            incident_id: result.incident_id,
            threat: result.threat,
            confidence: result.confidence,
            outcome: result.outcome,
        });

        result
    }
}
