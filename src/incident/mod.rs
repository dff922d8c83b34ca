// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Incident module - sessions, incidents and their frame records

mod machine;

pub use machine::{run_session, Effect, IncidentPolicy, IncidentStateMachine};

use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::{Frame, PixelFormat};
use crate::core::{IncidentId, SessionId};
use crate::detection::Detection;

/// One monitoring run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Detection events accepted during the session
    pub frame_count: u64,
    pub incident_count: u64,
    pub escalation_count: u64,
}

impl Session {
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            ended_at: None,
            active: true,
            frame_count: 0,
            incident_count: 0,
            escalation_count: 0,
        }
    }

    /// Mark the session ended. Only the first call has an effect.
    pub fn end(&mut self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.ended_at = Some(now.max(self.started_at));
        true
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// A contiguous span of frames with detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub frame_count: u32,
    pub max_detection_count: u32,
    pub max_detection_confidence: f32,
    pub escalated: bool,
    pub analyzed: bool,
    pub threat_detected: bool,
    /// Latest classifier confidence, 0-100
    pub threat_confidence: Option<u8>,
    pub threat_explanation: Option<String>,
    pub alerted: bool,
    pub alerted_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn open(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            started_at: now,
            ended_at: None,
            active: true,
            frame_count: 0,
            max_detection_count: 0,
            max_detection_confidence: 0.0,
            escalated: false,
            analyzed: false,
            threat_detected: false,
            threat_confidence: None,
            threat_explanation: None,
            alerted: false,
            alerted_at: None,
        }
    }

    /// Close the incident. Closed incidents stay closed.
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.ended_at = Some(now.max(self.started_at));
        true
    }

    pub fn mark_alerted(&mut self, now: DateTime<Utc>) {
        if !self.alerted {
            self.alerted = true;
            self.alerted_at = Some(now);
        }
    }
}

/// Image retained with a frame for later escalation
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl From<&Frame> for Snapshot {
    fn from(frame: &Frame) -> Self {
        Self {
            format: frame.format,
            width: frame.width,
            height: frame.height,
            data: frame.data.clone(),
        }
    }
}

/// One frame of an incident
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub incident_id: IncidentId,
    /// Position within the incident, starting at 1
    pub local_sequence: u32,
    /// Capture sequence within the session
    pub global_sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub detection_count: u32,
    pub detection_confidence: f32,
    pub detections: Vec<Detection>,
    pub snapshot: Option<Snapshot>,
}

impl FrameRecord {
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_session_ends_once() {
        let start = Utc::now();
        let mut session = Session::start(start);
        assert!(session.end(start + Duration::seconds(5)));
        assert!(!session.end(start + Duration::seconds(9)));
        assert_eq!(session.ended_at, Some(start + Duration::seconds(5)));
        assert_eq!(session.duration(), Some(Duration::seconds(5)));
    }

    #[test]
    fn test_end_never_precedes_start() {
        let start = Utc::now();
        let mut incident = Incident::open(Uuid::new_v4(), start);
        incident.close(start - Duration::seconds(1));
        assert_eq!(incident.ended_at, Some(start));
    }

    #[test]
    fn test_alerted_at_set_once() {
        let now = Utc::now();
        let mut incident = Incident::open(Uuid::new_v4(), now);
        incident.mark_alerted(now);
        incident.mark_alerted(now + Duration::seconds(3));
        assert_eq!(incident.alerted_at, Some(now));
    }
}
