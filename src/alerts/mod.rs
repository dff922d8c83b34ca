// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Alert module - alert records and best-effort delivery

mod sinks;

pub use sinks::{LogSink, WebhookSink};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{AlertId, EventBus, IncidentId, PipelineEvent, PipelineStats};
use crate::db::Recorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    DetectionStarted,
    Escalation,
    ThreatConfirmed,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::DetectionStarted => "detection-started",
            AlertKind::Escalation => "escalation",
            AlertKind::ThreatConfirmed => "threat-confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "detection-started" => Some(AlertKind::DetectionStarted),
            "escalation" => Some(AlertKind::Escalation),
            "threat-confirmed" => Some(AlertKind::ThreatConfirmed),
            _ => None,
        }
    }
}

/// Request from the incident state machine to raise an alert
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRequest {
    pub incident_id: IncidentId,
    pub kind: AlertKind,
    /// 0-100
    pub confidence: u8,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub incident_id: IncidentId,
    pub kind: AlertKind,
    pub confidence: u8,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    /// Set once the sink accepted the alert
    pub delivered: bool,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("sink returned HTTP {0}")]
    HttpStatus(u16),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Where alerts are delivered to
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<(), SinkError>;
}

/// Persists alerts and hands them to the sink.
///
/// Each (incident, kind) pair is raised at most once until the incident is
/// released. Delivery runs on its own task and a failure never undoes the
/// persisted record.
pub struct AlertManager {
    sink: Arc<dyn AlertSink>,
    delivery_timeout: Duration,
    recorder: Arc<Recorder>,
    event_bus: Arc<EventBus>,
    stats: Arc<PipelineStats>,
    /// Kinds already raised, per incident that may still raise alerts
    raised: Mutex<HashMap<IncidentId, HashSet<AlertKind>>>,
}

impl AlertManager {
    pub fn new(
        sink: Arc<dyn AlertSink>,
        delivery_timeout: Duration,
        recorder: Arc<Recorder>,
        event_bus: Arc<EventBus>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            sink,
            delivery_timeout,
            recorder,
            event_bus,
            stats,
            raised: Mutex::new(HashMap::new()),
        }
    }

    /// Record and deliver an alert. Returns `None` for a repeat request.
    ///
    /// Must be called from within a tokio runtime.
    pub fn raise(&self, request: AlertRequest, now: DateTime<Utc>) -> Option<Alert> {
        if !self.raised.lock().entry(request.incident_id).or_default().insert(request.kind) {
            debug!("Alert {} for incident {} already raised", request.kind.as_str(), request.incident_id);
            return None;
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            incident_id: request.incident_id,
            kind: request.kind,
            confidence: request.confidence,
            message: request.message,
            sent_at: now,
            delivered: false,
            acknowledged: false,
            acknowledged_at: None,
        };

        self.recorder.alert(&alert);
        self.stats.alerts_raised.inc();
        info!("ALERT [{}] {}", alert.kind.as_str(), alert.message);
        self.event_bus.publish(PipelineEvent::AlertRaised {
            incident_id: alert.incident_id,
            alert_id: alert.id,
            kind: alert.kind,
        });

        let sink = self.sink.clone();
        let recorder = self.recorder.clone();
        let stats = self.stats.clone();
        let timeout = self.delivery_timeout;
        let mut delivered = alert.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, sink.deliver(&delivered)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(timeout)),
            };
            match result {
                Ok(()) => {
                    delivered.delivered = true;
                    recorder.alert(&delivered);
                }
                Err(e) => {
                    stats.alert_delivery_failures.inc();
                    warn!("Alert {} delivery via '{}' failed: {}", delivered.id, sink.name(), e);
                }
            }
        });

        Some(alert)
    }

    /// Forget an incident that can no longer raise alerts
    pub fn release(&self, incident_id: IncidentId) {
        self.raised.lock().remove(&incident_id);
    }

    /// Incidents still tracked for de-duplication
    pub fn tracked_incidents(&self) -> usize {
        self.raised.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Store};

    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, _alert: &Alert) -> Result<(), SinkError> {
            Err(SinkError::HttpStatus(503))
        }
    }

    fn manager(sink: Arc<dyn AlertSink>) -> (AlertManager, Arc<Database>, Arc<PipelineStats>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let stats = Arc::new(PipelineStats::default());
        let recorder = Arc::new(Recorder::new(db.clone(), stats.clone()));
        let manager = AlertManager::new(
            sink,
            Duration::from_secs(1),
            recorder,
            Arc::new(EventBus::default()),
            stats.clone(),
        );
        (manager, db, stats)
    }

    fn request(incident_id: IncidentId, kind: AlertKind) -> AlertRequest {
        AlertRequest {
            incident_id,
            kind,
            confidence: 80,
            message: "hand in bag".into(),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_raise_is_idempotent_per_kind() {
        let (manager, db, stats) = manager(Arc::new(LogSink));
        let incident = Uuid::new_v4();

        assert!(manager.raise(request(incident, AlertKind::ThreatConfirmed), Utc::now()).is_some());
        assert!(manager.raise(request(incident, AlertKind::ThreatConfirmed), Utc::now()).is_none());
        assert!(manager.raise(request(incident, AlertKind::DetectionStarted), Utc::now()).is_some());

        assert_eq!(stats.alerts_raised.get(), 2);
        assert_eq!(db.alerts_for_incident(incident).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_release_drops_incident_entries() {
        let (manager, _db, _stats) = manager(Arc::new(LogSink));
        let settled = Uuid::new_v4();
        let open = Uuid::new_v4();

        manager.raise(request(settled, AlertKind::DetectionStarted), Utc::now());
        manager.raise(request(settled, AlertKind::ThreatConfirmed), Utc::now());
        manager.raise(request(open, AlertKind::DetectionStarted), Utc::now());
        assert_eq!(manager.tracked_incidents(), 2);

        manager.release(settled);
        assert_eq!(manager.tracked_incidents(), 1);
        assert!(manager.raise(request(open, AlertKind::DetectionStarted), Utc::now()).is_none());

        manager.release(open);
        manager.release(open);
        assert_eq!(manager.tracked_incidents(), 0);
    }

    #[tokio::test]
    async fn test_successful_delivery_is_recorded() {
        let (manager, db, _stats) = manager(Arc::new(LogSink));
        let alert = manager
            .raise(request(Uuid::new_v4(), AlertKind::ThreatConfirmed), Utc::now())
            .unwrap();
        settle().await;

        let stored = db.alert(alert.id).unwrap().unwrap();
        assert!(stored.delivered);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_record() {
        let (manager, db, stats) = manager(Arc::new(FailingSink));
        let alert = manager
            .raise(request(Uuid::new_v4(), AlertKind::ThreatConfirmed), Utc::now())
            .unwrap();
        settle().await;

        assert_eq!(stats.alert_delivery_failures.get(), 1);
        let stored = db.alert(alert.id).unwrap().unwrap();
        assert!(!stored.delivered);
        assert_eq!(stored.kind, AlertKind::ThreatConfirmed);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(AlertKind::parse("threat-confirmed"), Some(AlertKind::ThreatConfirmed));
        assert_eq!(AlertKind::DetectionStarted.as_str(), "detection-started");
        assert_eq!(AlertKind::parse("bogus"), None);
    }
}
