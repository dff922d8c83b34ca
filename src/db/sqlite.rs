// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! SQLite store

use std::sync::Arc;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::alerts::{Alert, AlertKind};
use crate::capture::PixelFormat;
use crate::config::DatabaseConfig;
use crate::core::{AlertId, IncidentId, SessionId};
use crate::escalation::{AnalysisOutcome, AnalysisResult};
use crate::incident::{FrameRecord, Incident, Session, Snapshot};

const SESSION_COLUMNS: &str =
    "id, started_at, ended_at, active, frame_count, incident_count, escalation_count";

const INCIDENT_COLUMNS: &str = "id, session_id, started_at, ended_at, active, frame_count, \
    max_detection_count, max_detection_confidence, escalated, analyzed, threat_detected, \
    threat_confidence, threat_explanation, alerted, alerted_at";

const FRAME_COLUMNS: &str = "incident_id, local_sequence, global_sequence, timestamp, \
    detection_count, detection_confidence, detections, snapshot_format, snapshot_width, \
    snapshot_height, snapshot";

const ANALYSIS_COLUMNS: &str = "id, incident_id, frame_start, frame_end, images, threat, \
    confidence, explanation, outcome, raw_reply, latency_ms, analyzed_at";

const ALERT_COLUMNS: &str =
    "id, incident_id, kind, confidence, message, sent_at, delivered, acknowledged, acknowledged_at";

/// Database manager
pub struct Database {
    conn: Mutex<Connection>,
    store_snapshots: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub sessions: u64,
    pub incidents: u64,
    pub frames: u64,
    pub analyses: u64,
    pub alerts: u64,
}

impl Database {
    /// Open or create database
    pub fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&config.path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        let db = Self::with_connection(conn, config.store_snapshots)?;
        info!("Database opened at {:?}", config.path);
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, true)
    }

    fn with_connection(conn: Connection, store_snapshots: bool) -> Result<Self, StoreError> {
        let db = Self {
            conn: Mutex::new(conn),
            store_snapshots,
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                active INTEGER NOT NULL,
                frame_count INTEGER NOT NULL DEFAULT 0,
                incident_count INTEGER NOT NULL DEFAULT 0,
                escalation_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_active ON sessions(active);

            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                started_at TEXT NOT NULL,
                ended_at TEXT,
                active INTEGER NOT NULL,
                frame_count INTEGER NOT NULL DEFAULT 0,
                max_detection_count INTEGER NOT NULL DEFAULT 0,
                max_detection_confidence REAL NOT NULL DEFAULT 0,
                escalated INTEGER NOT NULL DEFAULT 0,
                analyzed INTEGER NOT NULL DEFAULT 0,
                threat_detected INTEGER NOT NULL DEFAULT 0,
                threat_confidence INTEGER,
                threat_explanation TEXT,
                alerted INTEGER NOT NULL DEFAULT 0,
                alerted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_incidents_session ON incidents(session_id);

            CREATE TABLE IF NOT EXISTS frames (
                incident_id TEXT NOT NULL REFERENCES incidents(id),
                local_sequence INTEGER NOT NULL,
                global_sequence INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                detection_count INTEGER NOT NULL,
                detection_confidence REAL NOT NULL,
                detections TEXT NOT NULL,
                snapshot_format TEXT,
                snapshot_width INTEGER,
                snapshot_height INTEGER,
                snapshot BLOB,
                PRIMARY KEY (incident_id, local_sequence)
            );

            CREATE TABLE IF NOT EXISTS analyses (
                id TEXT PRIMARY KEY,
                incident_id TEXT NOT NULL,
                frame_start INTEGER NOT NULL,
                frame_end INTEGER NOT NULL,
                images INTEGER NOT NULL,
                threat INTEGER NOT NULL,
                confidence INTEGER NOT NULL,
                explanation TEXT NOT NULL,
                outcome TEXT NOT NULL,
                raw_reply TEXT,
                latency_ms INTEGER NOT NULL,
                analyzed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_analyses_incident ON analyses(incident_id);

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                incident_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                message TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                acknowledged INTEGER NOT NULL DEFAULT 0,
                acknowledged_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_incident ON alerts(incident_id);
            "#,
        )?;

        Ok(())
    }

    /// Row counts per table
    pub fn stats(&self) -> Result<DatabaseStats, StoreError> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<u64, StoreError> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as u64)
        };

        Ok(DatabaseStats {
            sessions: count("sessions")?,
            incidents: count("incidents")?,
            frames: count("frames")?,
            analyses: count("analyses")?,
            alerts: count("alerts")?,
        })
    }

    /// Delete ended sessions older than `retention_days`, with everything they own
    pub fn cleanup(&self, retention_days: u32) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let old_incidents = "SELECT i.id FROM incidents i JOIN sessions s ON s.id = i.session_id \
                             WHERE s.active = 0 AND s.started_at < ?1";
        tx.execute(&format!("DELETE FROM frames WHERE incident_id IN ({})", old_incidents), params![cutoff.to_rfc3339()])?;
        tx.execute(&format!("DELETE FROM analyses WHERE incident_id IN ({})", old_incidents), params![cutoff.to_rfc3339()])?;
        tx.execute(&format!("DELETE FROM alerts WHERE incident_id IN ({})", old_incidents), params![cutoff.to_rfc3339()])?;
        tx.execute(
            "DELETE FROM incidents WHERE session_id IN (SELECT id FROM sessions WHERE active = 0 AND started_at < ?1)",
            params![cutoff.to_rfc3339()],
        )?;
        let deleted = tx.execute(
            "DELETE FROM sessions WHERE active = 0 AND started_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        tx.commit()?;

        if deleted > 0 {
            info!("Cleaned up {} sessions older than {} days", deleted, retention_days);
        }
        Ok(deleted)
    }
}

impl Store for Database {
    fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("INSERT OR REPLACE INTO sessions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", SESSION_COLUMNS),
            params![
                session.id.to_string(),
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.active,
                session.frame_count as i64,
                session.incident_count as i64,
                session.escalation_count as i64,
            ],
        )?;
        Ok(())
    }

    fn save_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO incidents ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                INCIDENT_COLUMNS
            ),
            params![
                incident.id.to_string(),
                incident.session_id.to_string(),
                incident.started_at.to_rfc3339(),
                incident.ended_at.map(|t| t.to_rfc3339()),
                incident.active,
                i64::from(incident.frame_count),
                i64::from(incident.max_detection_count),
                f64::from(incident.max_detection_confidence),
                incident.escalated,
                incident.analyzed,
                incident.threat_detected,
                incident.threat_confidence.map(i64::from),
                incident.threat_explanation,
                incident.alerted,
                incident.alerted_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn append_frame(&self, frame: &FrameRecord) -> Result<(), StoreError> {
        let detections = serde_json::to_string(&frame.detections)?;
        let snapshot = frame.snapshot.as_ref().filter(|_| self.store_snapshots);

        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO frames ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                FRAME_COLUMNS
            ),
            params![
                frame.incident_id.to_string(),
                i64::from(frame.local_sequence),
                frame.global_sequence as i64,
                frame.timestamp.to_rfc3339(),
                i64::from(frame.detection_count),
                f64::from(frame.detection_confidence),
                detections,
                snapshot.map(|s| format_name(s.format)),
                snapshot.map(|s| i64::from(s.width)),
                snapshot.map(|s| i64::from(s.height)),
                snapshot.map(|s| s.data.to_vec()),
            ],
        )?;
        Ok(())
    }

    fn append_analysis(&self, result: &AnalysisResult) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO analyses ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                ANALYSIS_COLUMNS
            ),
            params![
                result.id.to_string(),
                result.incident_id.to_string(),
                i64::from(result.frame_start),
                i64::from(result.frame_end),
                result.images as i64,
                result.threat,
                i64::from(result.confidence),
                result.explanation,
                result.outcome.as_str(),
                result.raw_reply,
                result.latency_ms as i64,
                result.analyzed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        // acknowledgement is owned by acknowledge_alert and survives re-saves
        conn.execute(
            &format!(
                "INSERT INTO alerts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(id) DO UPDATE SET delivered = excluded.delivered",
                ALERT_COLUMNS
            ),
            params![
                alert.id.to_string(),
                alert.incident_id.to_string(),
                alert.kind.as_str(),
                i64::from(alert.confidence),
                alert.message,
                alert.sent_at.to_rfc3339(),
                alert.delivered,
                alert.acknowledged,
                alert.acknowledged_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn acknowledge_alert(&self, id: AlertId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE alerts SET acknowledged = 1, acknowledged_at = COALESCE(acknowledged_at, ?2) WHERE id = ?1",
            params![id.to_string(), at.to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![id.to_string()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn active_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions WHERE active = 1 ORDER BY started_at",
            SESSION_COLUMNS
        ))?;
        let rows = stmt.query_map([], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn recent_sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY started_at DESC LIMIT ?1",
            SESSION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn incident(&self, id: IncidentId) -> Result<Option<Incident>, StoreError> {
        let conn = self.conn.lock();
        let incident = conn
            .query_row(
                &format!("SELECT {} FROM incidents WHERE id = ?1", INCIDENT_COLUMNS),
                params![id.to_string()],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    fn incidents_for_session(&self, session_id: SessionId) -> Result<Vec<Incident>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM incidents WHERE session_id = ?1 ORDER BY started_at",
            INCIDENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![session_id.to_string()], incident_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn frames_for_incident(&self, incident_id: IncidentId) -> Result<Vec<FrameRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM frames WHERE incident_id = ?1 ORDER BY local_sequence",
            FRAME_COLUMNS
        ))?;
        let rows = stmt.query_map(params![incident_id.to_string()], frame_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn analyses_for_incident(&self, incident_id: IncidentId) -> Result<Vec<AnalysisResult>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM analyses WHERE incident_id = ?1 ORDER BY frame_end, analyzed_at",
            ANALYSIS_COLUMNS
        ))?;
        let rows = stmt.query_map(params![incident_id.to_string()], analysis_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn alerts_for_incident(&self, incident_id: IncidentId) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM alerts WHERE incident_id = ?1 ORDER BY sent_at",
            ALERT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![incident_id.to_string()], alert_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn alert(&self, id: AlertId) -> Result<Option<Alert>, StoreError> {
        let conn = self.conn.lock();
        let alert = conn
            .query_row(
                &format!("SELECT {} FROM alerts WHERE id = ?1", ALERT_COLUMNS),
                params![id.to_string()],
                alert_from_row,
            )
            .optional()?;
        Ok(alert)
    }
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn invalid_text(idx: usize, what: &str, value: String) -> rusqlite::Error {
    let err = std::io::Error::new(std::io::ErrorKind::InvalidData, format!("invalid {}: {}", what, value));
    conversion_error(idx, err)
}

fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, e))
}

fn time_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_time_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => time_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn count_at(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    let n: i64 = row.get(idx)?;
    Ok(n.max(0) as u64)
}

fn format_name(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Jpeg => "jpeg",
        PixelFormat::Png => "png",
        PixelFormat::Rgb8 => "rgb8",
        PixelFormat::Bgr8 => "bgr8",
    }
}

fn parse_format(name: &str) -> Option<PixelFormat> {
    match name {
        "jpeg" => Some(PixelFormat::Jpeg),
        "png" => Some(PixelFormat::Png),
        "rgb8" => Some(PixelFormat::Rgb8),
        "bgr8" => Some(PixelFormat::Bgr8),
        _ => None,
    }
}

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: uuid_at(row, 0)?,
        started_at: time_at(row, 1)?,
        ended_at: optional_time_at(row, 2)?,
        active: row.get(3)?,
        frame_count: count_at(row, 4)?,
        incident_count: count_at(row, 5)?,
        escalation_count: count_at(row, 6)?,
    })
}

fn incident_from_row(row: &Row) -> rusqlite::Result<Incident> {
    let confidence: f64 = row.get(7)?;
    let threat_confidence: Option<i64> = row.get(11)?;

    Ok(Incident {
        id: uuid_at(row, 0)?,
        session_id: uuid_at(row, 1)?,
        started_at: time_at(row, 2)?,
        ended_at: optional_time_at(row, 3)?,
        active: row.get(4)?,
        frame_count: count_at(row, 5)? as u32,
        max_detection_count: count_at(row, 6)? as u32,
        max_detection_confidence: confidence as f32,
        escalated: row.get(8)?,
        analyzed: row.get(9)?,
        threat_detected: row.get(10)?,
        threat_confidence: threat_confidence.map(|c| c.clamp(0, 100) as u8),
        threat_explanation: row.get(12)?,
        alerted: row.get(13)?,
        alerted_at: optional_time_at(row, 14)?,
    })
}

fn frame_from_row(row: &Row) -> rusqlite::Result<FrameRecord> {
    let confidence: f64 = row.get(5)?;
    let detections: String = row.get(6)?;
    let detections = serde_json::from_str(&detections).map_err(|e| conversion_error(6, e))?;

    let format: Option<String> = row.get(7)?;
    let data: Option<Vec<u8>> = row.get(10)?;
    let snapshot = match (format, data) {
        (Some(format), Some(data)) => Some(Snapshot {
            format: parse_format(&format).ok_or_else(|| invalid_text(7, "pixel format", format.clone()))?,
            width: row.get::<_, Option<i64>>(8)?.unwrap_or(0) as u32,
            height: row.get::<_, Option<i64>>(9)?.unwrap_or(0) as u32,
            data: Arc::from(data),
        }),
        _ => None,
    };

    Ok(FrameRecord {
        incident_id: uuid_at(row, 0)?,
        local_sequence: count_at(row, 1)? as u32,
        global_sequence: count_at(row, 2)?,
        timestamp: time_at(row, 3)?,
        detection_count: count_at(row, 4)? as u32,
        detection_confidence: confidence as f32,
        detections,
        snapshot,
    })
}

fn analysis_from_row(row: &Row) -> rusqlite::Result<AnalysisResult> {
    let outcome: String = row.get(8)?;

    Ok(AnalysisResult {
        id: uuid_at(row, 0)?,
        incident_id: uuid_at(row, 1)?,
        frame_start: count_at(row, 2)? as u32,
        frame_end: count_at(row, 3)? as u32,
        images: count_at(row, 4)? as usize,
        threat: row.get(5)?,
        confidence: count_at(row, 6)?.min(100) as u8,
        explanation: row.get(7)?,
        outcome: AnalysisOutcome::parse(&outcome).ok_or_else(|| invalid_text(8, "outcome", outcome.clone()))?,
        raw_reply: row.get(9)?,
        latency_ms: count_at(row, 10)?,
        analyzed_at: time_at(row, 11)?,
    })
}

fn alert_from_row(row: &Row) -> rusqlite::Result<Alert> {
    let kind: String = row.get(2)?;

    Ok(Alert {
        id: uuid_at(row, 0)?,
        incident_id: uuid_at(row, 1)?,
        kind: AlertKind::parse(&kind).ok_or_else(|| invalid_text(2, "alert kind", kind.clone()))?,
        confidence: count_at(row, 3)?.min(100) as u8,
        message: row.get(4)?,
        sent_at: time_at(row, 5)?,
        delivered: row.get(6)?,
        acknowledged: row.get(7)?,
        acknowledged_at: optional_time_at(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, Detection};

    fn frame(incident_id: IncidentId, local_sequence: u32, with_snapshot: bool) -> FrameRecord {
        FrameRecord {
            incident_id,
            local_sequence,
            global_sequence: 100 + u64::from(local_sequence),
            timestamp: Utc::now(),
            detection_count: 1,
            detection_confidence: 0.875,
            detections: vec![Detection {
                confidence: 0.875,
                bbox: BoundingBox::new(1.0, 2.0, 30.0, 40.0),
                label: "hand".into(),
            }],
            snapshot: with_snapshot.then(|| Snapshot {
                format: PixelFormat::Jpeg,
                width: 640,
                height: 480,
                data: Arc::from(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9]),
            }),
        }
    }

    #[test]
    fn test_session_upsert() {
        let db = Database::open_in_memory().unwrap();
        let mut session = Session::start(Utc::now());
        db.save_session(&session).unwrap();
        assert_eq!(db.active_sessions().unwrap(), vec![session.clone()]);

        session.frame_count = 42;
        session.end(Utc::now());
        db.save_session(&session).unwrap();

        assert!(db.active_sessions().unwrap().is_empty());
        assert_eq!(db.session(session.id).unwrap(), Some(session.clone()));
        assert_eq!(db.recent_sessions(5).unwrap(), vec![session]);
    }

    #[test]
    fn test_incident_fields_survive() {
        let db = Database::open_in_memory().unwrap();
        let session = Session::start(Utc::now());
        let mut incident = Incident::open(session.id, Utc::now());
        incident.frame_count = 12;
        incident.max_detection_count = 2;
        incident.max_detection_confidence = 0.9375;
        incident.escalated = true;
        incident.analyzed = true;
        incident.threat_detected = true;
        incident.threat_confidence = Some(75);
        incident.threat_explanation = Some("zipper".into());
        incident.mark_alerted(Utc::now());
        incident.close(Utc::now());

        db.save_session(&session).unwrap();
        db.save_incident(&incident).unwrap();

        assert_eq!(db.incident(incident.id).unwrap(), Some(incident.clone()));
        assert_eq!(db.incidents_for_session(session.id).unwrap(), vec![incident]);
        assert_eq!(db.incident(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_frames_ordered_by_local_sequence() {
        let db = Database::open_in_memory().unwrap();
        let incident_id = Uuid::new_v4();
        for n in [3, 1, 2] {
            db.append_frame(&frame(incident_id, n, n == 2)).unwrap();
        }

        let frames = db.frames_for_incident(incident_id).unwrap();
        let sequences: Vec<u32> = frames.iter().map(|f| f.local_sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(frames[1], frame_with_time(frame(incident_id, 2, true), frames[1].timestamp));
        assert!(!frames[0].has_snapshot());
    }

    fn frame_with_time(mut record: FrameRecord, timestamp: DateTime<Utc>) -> FrameRecord {
        record.timestamp = timestamp;
        record
    }

    #[test]
    fn test_snapshots_can_be_disabled() {
        let dir = std::env::temp_dir().join(format!("zoneguard-test-{}", Uuid::new_v4()));
        let config = DatabaseConfig {
            path: dir.join("zoneguard.db"),
            store_snapshots: false,
            ..DatabaseConfig::default()
        };
        let db = Database::open(&config).unwrap();
        let incident_id = Uuid::new_v4();
        db.append_frame(&frame(incident_id, 1, true)).unwrap();

        let frames = db.frames_for_incident(incident_id).unwrap();
        assert!(frames[0].snapshot.is_none());
        drop(db);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_alert_acknowledge_survives_resave() {
        let db = Database::open_in_memory().unwrap();
        let mut alert = Alert {
            id: Uuid::new_v4(),
            incident_id: Uuid::new_v4(),
            kind: AlertKind::ThreatConfirmed,
            confidence: 88,
            message: "threat".into(),
            sent_at: Utc::now(),
            delivered: false,
            acknowledged: false,
            acknowledged_at: None,
        };
        db.save_alert(&alert).unwrap();

        let at = Utc::now();
        assert!(db.acknowledge_alert(alert.id, at).unwrap());
        assert!(!db.acknowledge_alert(Uuid::new_v4(), at).unwrap());

        alert.delivered = true;
        db.save_alert(&alert).unwrap();

        let stored = db.alert(alert.id).unwrap().unwrap();
        assert!(stored.delivered);
        assert!(stored.acknowledged);
        assert_eq!(stored.acknowledged_at, Some(at));
        assert_eq!(db.alerts_for_incident(alert.incident_id).unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_keeps_recent_and_active() {
        let db = Database::open_in_memory().unwrap();
        let old_start = Utc::now() - chrono::Duration::days(40);

        let mut old = Session::start(old_start);
        old.end(old_start + chrono::Duration::hours(1));
        let stale_active = Session::start(old_start);
        let mut recent = Session::start(Utc::now());
        recent.end(Utc::now());

        let incident = Incident::open(old.id, old_start);
        db.save_incident(&incident).unwrap();
        db.append_frame(&frame(incident.id, 1, false)).unwrap();
        for session in [&old, &stale_active, &recent] {
            db.save_session(session).unwrap();
        }

        assert_eq!(db.cleanup(30).unwrap(), 1);
        let stats = db.stats().unwrap();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.incidents, 0);
        assert_eq!(stats.frames, 0);
    }
}
