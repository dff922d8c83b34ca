// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Database module for persistent storage
//!
//! [`Store`] is the persistence boundary, [`Database`] its SQLite
//! implementation. Pipeline code never talks to a store directly: it goes
//! through [`Recorder`], which retries a failed write once and then counts
//! the failure instead of surfacing it.

mod sqlite;

pub use sqlite::{Database, DatabaseStats};

use std::sync::Arc;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::alerts::Alert;
use crate::core::{AlertId, IncidentId, PipelineStats, SessionId};
use crate::escalation::AnalysisResult;
use crate::incident::{FrameRecord, Incident, Session};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable record of sessions, incidents, frames, analyses and alerts.
///
/// Writes are upserts keyed by id, so repeating one is harmless. Reads
/// scoped to an incident come back in sequence order.
pub trait Store: Send + Sync {
    fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    fn save_incident(&self, incident: &Incident) -> Result<(), StoreError>;

    fn append_frame(&self, frame: &FrameRecord) -> Result<(), StoreError>;

    fn append_analysis(&self, result: &AnalysisResult) -> Result<(), StoreError>;

    fn save_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Returns false when no such alert exists
    fn acknowledge_alert(&self, id: AlertId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    fn active_sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// Most recently started first
    fn recent_sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError>;

    fn incident(&self, id: IncidentId) -> Result<Option<Incident>, StoreError>;

    fn incidents_for_session(&self, session_id: SessionId) -> Result<Vec<Incident>, StoreError>;

    fn frames_for_incident(&self, incident_id: IncidentId) -> Result<Vec<FrameRecord>, StoreError>;

    fn analyses_for_incident(&self, incident_id: IncidentId) -> Result<Vec<AnalysisResult>, StoreError>;

    fn alerts_for_incident(&self, incident_id: IncidentId) -> Result<Vec<Alert>, StoreError>;

    fn alert(&self, id: AlertId) -> Result<Option<Alert>, StoreError>;
}

/// Write path used by the pipeline
pub struct Recorder {
    store: Arc<dyn Store>,
    stats: Arc<PipelineStats>,
}

impl Recorder {
    pub fn new(store: Arc<dyn Store>, stats: Arc<PipelineStats>) -> Self {
        Self { store, stats }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn session(&self, session: &Session) -> bool {
        self.write("session", || self.store.save_session(session))
    }

    pub fn incident(&self, incident: &Incident) -> bool {
        self.write("incident", || self.store.save_incident(incident))
    }

    pub fn frame(&self, frame: &FrameRecord) -> bool {
        self.write("frame", || self.store.append_frame(frame))
    }

    pub fn analysis(&self, result: &AnalysisResult) -> bool {
        self.write("analysis", || self.store.append_analysis(result))
    }

    pub fn alert(&self, alert: &Alert) -> bool {
        self.write("alert", || self.store.save_alert(alert))
    }

    /// One synchronous retry, then count and drop
    fn write(&self, what: &str, op: impl Fn() -> Result<(), StoreError>) -> bool {
        let first = match op() {
            Ok(()) => return true,
            Err(e) => e,
        };
        debug!("Retrying {} write after: {}", what, first);

        match op() {
            Ok(()) => true,
            Err(e) => {
                self.stats.persistence_failures.inc();
                warn!("Dropping {} write: {}", what, e);
                false
            }
        }
    }
}
