// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Event bus for pipeline lifecycle notifications

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::{AlertId, IncidentId, SessionId};
use crate::alerts::AlertKind;
use crate::escalation::AnalysisOutcome;

/// Why an incident was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    DetectionLost,
    ThreatConfirmed,
    SessionEnded,
}

/// Why the capture stage stopped on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    EndOfStream,
    SourceUnavailable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    SessionStarted {
        session_id: SessionId,
    },
    SessionEnded {
        session_id: SessionId,
        frame_count: u64,
        incident_count: u64,
        escalation_count: u64,
    },
    IncidentOpened {
        session_id: SessionId,
        incident_id: IncidentId,
    },
    IncidentClosed {
        incident_id: IncidentId,
        frame_count: u32,
        reason: CloseReason,
    },
    EscalationDispatched {
        incident_id: IncidentId,
        frame_start: u32,
        frame_end: u32,
        images: usize,
    },
    EscalationCoalesced {
        incident_id: IncidentId,
        frame_count: u32,
    },
    AnalysisRecorded {
        incident_id: IncidentId,
        threat: bool,
        confidence: u8,
        outcome: AnalysisOutcome,
    },
    AlertRaised {
        incident_id: IncidentId,
        alert_id: AlertId,
        kind: AlertKind,
    },
    SourceHalted {
        reason: HaltReason,
    },
}

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: PipelineEvent,
}

/// Central event bus for pub/sub communication
pub struct EventBus {
    event_tx: broadcast::Sender<Event>,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            event_tx,
            event_counter: AtomicU64::new(0),
        }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, payload: PipelineEvent) {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let event = Event {
            id,
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Number of events published so far
    pub fn published(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
