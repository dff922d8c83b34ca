// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Incident state machine
//!
//! Single writer for the session and its incidents. Detection events and
//! escalation verdicts are applied one at a time; anything that has to
//! happen outside the machine (classifier calls, alert delivery) comes back
//! as an [`Effect`] for the caller to run.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{FrameRecord, Incident, Session, Snapshot};
use crate::alerts::{AlertKind, AlertManager, AlertRequest};
use crate::config::Config;
use crate::core::{CloseReason, EventBus, IncidentId, PipelineEvent, PipelineStats};
use crate::db::Recorder;
use crate::detection::DetectionEvent;
use crate::escalation::{AnalysisResult, EscalationCoordinator, EscalationRequest, EscalationVerdict};

/// Tunables of the incident lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentPolicy {
    /// Escalate whenever the incident frame count is a multiple of this
    pub escalation_threshold: u32,
    /// Frames per escalation batch
    pub batch_size: usize,
    /// Retain a snapshot on every n-th incident frame
    pub snapshot_interval: u32,
    /// A threat verdict must be strictly above this confidence to count
    pub threat_threshold: u8,
    pub alert_on_detection_started: bool,
    pub alert_on_escalation: bool,
}

impl IncidentPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            escalation_threshold: config.incident.escalation_threshold.max(1),
            batch_size: config.escalation.batch_size.max(1),
            snapshot_interval: config.incident.snapshot_interval.max(1),
            threat_threshold: config.incident.threat_threshold,
            alert_on_detection_started: config.alerts.on_detection_started,
            alert_on_escalation: config.alerts.on_escalation,
        }
    }

    pub fn confirms(&self, result: &AnalysisResult) -> bool {
        result.threat && result.confidence > self.threat_threshold
    }
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Work requested by a transition
#[derive(Debug, Clone)]
pub enum Effect {
    Escalate(EscalationRequest),
    Alert(AlertRequest),
    /// The incident is closed with no escalation outstanding, so it will
    /// not raise further alerts
    Settled(IncidentId),
}

struct OpenIncident {
    incident: Incident,
    /// Most recent frames, snapshots included, oldest first
    window: VecDeque<FrameRecord>,
    escalation_pending: bool,
}

pub struct IncidentStateMachine {
    policy: IncidentPolicy,
    session: Session,
    open: Option<OpenIncident>,
    /// Dispatched escalations without a verdict yet, per incident
    outstanding: HashMap<IncidentId, usize>,
    recorder: Arc<Recorder>,
    event_bus: Arc<EventBus>,
    stats: Arc<PipelineStats>,
}

impl IncidentStateMachine {
    /// Start a new session and record it
    pub fn start(
        policy: IncidentPolicy,
        now: DateTime<Utc>,
        recorder: Arc<Recorder>,
        event_bus: Arc<EventBus>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let session = Session::start(now);
        recorder.session(&session);
        info!("Session {} started", session.id);
        event_bus.publish(PipelineEvent::SessionStarted { session_id: session.id });

        Self {
            policy,
            session,
            open: None,
            outstanding: HashMap::new(),
            recorder,
            event_bus,
            stats,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn open_incident(&self) -> Option<&Incident> {
        self.open.as_ref().map(|open| &open.incident)
    }

    pub fn outstanding_escalations(&self) -> usize {
        self.outstanding.values().sum()
    }

    /// Incidents still waiting on at least one verdict
    pub fn unanswered_incidents(&self) -> Vec<IncidentId> {
        self.outstanding.keys().copied().collect()
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Apply one detection event
    pub fn on_detection(&mut self, event: DetectionEvent, now: DateTime<Utc>) -> Vec<Effect> {
        if !self.session.active || event.session_id != self.session.id {
            self.stats.events_dropped.inc();
            warn!(
                "Dropping detection event for frame #{} of inactive session {}",
                event.sequence, event.session_id
            );
            return Vec::new();
        }

        self.session.frame_count += 1;
        let mut effects = Vec::new();

        match (self.open.is_some(), event.has_detection()) {
            (false, true) => {
                self.open_new_incident(now, &mut effects);
                self.append_frame(event, now, &mut effects);
            }
            (true, true) => self.append_frame(event, now, &mut effects),
            (true, false) => self.close_open_incident(CloseReason::DetectionLost, now, &mut effects),
            (false, false) => {}
        }

        self.recorder.session(&self.session);
        effects
    }

    /// Apply a classifier verdict
    pub fn on_verdict(&mut self, verdict: EscalationVerdict, now: DateTime<Utc>) -> Vec<Effect> {
        let remaining = match self.outstanding.get_mut(&verdict.incident_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.outstanding.remove(&verdict.incident_id);
        }

        let confirmed = self.policy.confirms(&verdict.result);
        let mut effects = Vec::new();

        let is_open = self
            .open
            .as_ref()
            .map_or(false, |open| open.incident.id == verdict.incident_id);

        if is_open {
            let alert = match self.open.as_mut() {
                Some(open) => {
                    open.escalation_pending = false;
                    apply_analysis(&mut open.incident, &verdict.result, confirmed);
                    if confirmed {
                        open.incident.mark_alerted(now);
                    }
                    self.recorder.incident(&open.incident);
                    confirmed.then(|| threat_alert(&open.incident, &verdict.result))
                }
                None => None,
            };

            effects.extend(alert.map(Effect::Alert));
            if confirmed {
                self.close_open_incident(CloseReason::ThreatConfirmed, now, &mut effects);
            }
            return effects;
        }

        // the incident closed while the classifier was working
        effects.extend(
            self.apply_to_closed(verdict.incident_id, &verdict.result, confirmed, now)
                .map(Effect::Alert),
        );
        if remaining == 0 {
            effects.push(Effect::Settled(verdict.incident_id));
        }
        effects
    }

    /// Force-close any open incident, then end the session
    pub fn end_session(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.session.active {
            return effects;
        }

        self.close_open_incident(CloseReason::SessionEnded, now, &mut effects);
        self.session.end(now);
        self.recorder.session(&self.session);

        info!(
            "Session {} ended: {} frames, {} incidents, {} escalations",
            self.session.id, self.session.frame_count, self.session.incident_count, self.session.escalation_count
        );
        self.event_bus.publish(PipelineEvent::SessionEnded {
            session_id: self.session.id,
            frame_count: self.session.frame_count,
            incident_count: self.session.incident_count,
            escalation_count: self.session.escalation_count,
        });
        effects
    }

    fn open_new_incident(&mut self, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        let mut incident = Incident::open(self.session.id, now);
        self.session.incident_count += 1;
        info!("Incident {} opened in session {}", incident.id, self.session.id);
        self.event_bus.publish(PipelineEvent::IncidentOpened {
            session_id: self.session.id,
            incident_id: incident.id,
        });

        if self.policy.alert_on_detection_started {
            incident.mark_alerted(now);
            effects.push(Effect::Alert(AlertRequest {
                incident_id: incident.id,
                kind: AlertKind::DetectionStarted,
                confidence: 0,
                message: "Hand detected in the protected zone".to_string(),
            }));
        }

        self.recorder.incident(&incident);
        self.open = Some(OpenIncident {
            incident,
            window: VecDeque::with_capacity(self.policy.batch_size),
            escalation_pending: false,
        });
    }

    fn append_frame(&mut self, event: DetectionEvent, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        let policy = &self.policy;

        let local_sequence = open.incident.frame_count + 1;
        let crossing = local_sequence % policy.escalation_threshold == 0;
        let keep_snapshot = crossing || local_sequence % policy.snapshot_interval == 0;

        let detection_count = event.count() as u32;
        let detection_confidence = event.max_confidence();
        let snapshot = if keep_snapshot {
            event.frame.as_ref().map(Snapshot::from)
        } else {
            None
        };

        let record = FrameRecord {
            incident_id: open.incident.id,
            local_sequence,
            global_sequence: event.sequence,
            timestamp: event.captured_at,
            detection_count,
            detection_confidence,
            detections: event.detections,
            snapshot,
        };

        self.recorder.frame(&record);

        let incident = &mut open.incident;
        incident.frame_count = local_sequence;
        incident.max_detection_count = incident.max_detection_count.max(detection_count);
        incident.max_detection_confidence = incident.max_detection_confidence.max(detection_confidence);

        open.window.push_back(record);
        while open.window.len() > policy.batch_size {
            open.window.pop_front();
        }

        debug!("Incident {} frame {} (global #{})", incident.id, local_sequence, event.sequence);

        if crossing {
            if open.escalation_pending {
                self.stats.escalations_coalesced.inc();
                debug!("Escalation of incident {} still pending, skipping frame {}", incident.id, local_sequence);
                self.event_bus.publish(PipelineEvent::EscalationCoalesced {
                    incident_id: incident.id,
                    frame_count: local_sequence,
                });
            } else {
                let request = EscalationRequest::from_window(incident.id, self.session.id, &open.window, now);
                open.escalation_pending = true;
                incident.escalated = true;
                self.session.escalation_count += 1;
                *self.outstanding.entry(incident.id).or_insert(0) += 1;
                self.stats.escalations_dispatched.inc();

                info!(
                    "Escalating incident {} frames {}-{} ({} images)",
                    incident.id,
                    request.frame_start,
                    request.frame_end,
                    request.images.len()
                );
                self.event_bus.publish(PipelineEvent::EscalationDispatched {
                    incident_id: incident.id,
                    frame_start: request.frame_start,
                    frame_end: request.frame_end,
                    images: request.images.len(),
                });

                if policy.alert_on_escalation {
                    incident.mark_alerted(now);
                    effects.push(Effect::Alert(AlertRequest {
                        incident_id: incident.id,
                        kind: AlertKind::Escalation,
                        confidence: 0,
                        message: format!(
                            "Suspicious activity for {} frames, requesting analysis",
                            local_sequence
                        ),
                    }));
                }
                effects.push(Effect::Escalate(request));
            }
        }

        self.recorder.incident(&open.incident);
    }

    fn close_open_incident(&mut self, reason: CloseReason, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        let Some(mut open) = self.open.take() else {
            return;
        };

        open.incident.close(now);
        self.recorder.incident(&open.incident);
        info!(
            "Incident {} closed after {} frames ({:?})",
            open.incident.id, open.incident.frame_count, reason
        );
        self.event_bus.publish(PipelineEvent::IncidentClosed {
            incident_id: open.incident.id,
            frame_count: open.incident.frame_count,
            reason,
        });

        if !self.outstanding.contains_key(&open.incident.id) {
            effects.push(Effect::Settled(open.incident.id));
        }
    }

    fn apply_to_closed(
        &mut self,
        incident_id: IncidentId,
        result: &AnalysisResult,
        confirmed: bool,
        now: DateTime<Utc>,
    ) -> Option<AlertRequest> {
        let mut incident = match self.recorder.store().incident(incident_id) {
            Ok(Some(incident)) => incident,
            Ok(None) => {
                warn!("Verdict for unknown incident {}", incident_id);
                return None;
            }
            Err(e) => {
                self.stats.persistence_failures.inc();
                warn!("Cannot load incident {} for late verdict: {}", incident_id, e);
                return None;
            }
        };

        let newly_confirmed = confirmed && !incident.threat_detected;
        apply_analysis(&mut incident, result, confirmed);
        if newly_confirmed {
            incident.mark_alerted(now);
        }
        self.recorder.incident(&incident);

        newly_confirmed.then(|| threat_alert(&incident, result))
    }
}

fn apply_analysis(incident: &mut Incident, result: &AnalysisResult, confirmed: bool) {
    incident.analyzed = true;
    if confirmed {
        incident.threat_detected = true;
        incident.threat_confidence = Some(result.confidence);
        incident.threat_explanation = Some(result.explanation.clone());
    } else if !incident.threat_detected {
        incident.threat_confidence = Some(result.confidence);
        incident.threat_explanation = Some(result.explanation.clone());
    }
}

fn threat_alert(incident: &Incident, result: &AnalysisResult) -> AlertRequest {
    AlertRequest {
        incident_id: incident.id,
        kind: AlertKind::ThreatConfirmed,
        confidence: result.confidence,
        message: format!("Threat confirmed ({}%): {}", result.confidence, result.explanation),
    }
}

/// Drive a session until the detection channel closes.
///
/// Verdicts of escalations still running at that point are awaited for at
/// most `verdict_grace`, then the session is returned.
pub async fn run_session(
    mut machine: IncidentStateMachine,
    mut events: mpsc::UnboundedReceiver<DetectionEvent>,
    coordinator: EscalationCoordinator,
    alerts: Arc<AlertManager>,
    verdict_grace: Duration,
) -> Session {
    let (verdict_tx, mut verdicts) = mpsc::unbounded_channel::<EscalationVerdict>();

    let run = |effects: Vec<Effect>| {
        for effect in effects {
            match effect {
                Effect::Escalate(request) => {
                    coordinator.dispatch(request, verdict_tx.clone());
                }
                Effect::Alert(request) => {
                    alerts.raise(request, Utc::now());
                }
                Effect::Settled(incident_id) => alerts.release(incident_id),
            }
        }
    };

    loop {
        tokio::select! {
            biased;
            Some(verdict) = verdicts.recv() => run(machine.on_verdict(verdict, Utc::now())),
            event = events.recv() => match event {
                Some(event) => run(machine.on_detection(event, Utc::now())),
                None => break,
            },
        }
    }

    run(machine.end_session(Utc::now()));

    let deadline = tokio::time::Instant::now() + verdict_grace;
    while machine.outstanding_escalations() > 0 {
        match tokio::time::timeout_at(deadline, verdicts.recv()).await {
            Ok(Some(verdict)) => run(machine.on_verdict(verdict, Utc::now())),
            _ => {
                warn!(
                    "Ending with {} escalations unanswered",
                    machine.outstanding_escalations()
                );
                for incident_id in machine.unanswered_incidents() {
                    alerts.release(incident_id);
                }
                break;
            }
        }
    }

    machine.into_session()
}
