// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Configuration module

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::capture::HandSchedule;
use crate::escalation::GEMINI_ENDPOINT;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Enable demo mode (synthetic camera, simulated models)
    pub demo_mode: bool,

    /// Bound on each worker join during shutdown
    pub shutdown_grace_ms: u64,

    /// Capture configuration
    pub capture: CaptureConfig,

    /// Detection configuration
    pub detection: DetectionConfig,

    /// Incident lifecycle configuration
    pub incident: IncidentConfig,

    /// Escalation configuration
    pub escalation: EscalationConfig,

    /// Alert configuration
    pub alerts: AlertsConfig,

    /// Demo mode configuration
    pub demo: DemoConfig,

    /// Database configuration
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            demo_mode: true,
            shutdown_grace_ms: 3000,
            capture: CaptureConfig::default(),
            detection: DetectionConfig::default(),
            incident: IncidentConfig::default(),
            escalation: EscalationConfig::default(),
            alerts: AlertsConfig::default(),
            demo: DemoConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("zoneguard"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.capture.queue_capacity == 0 || self.detection.output_capacity == 0 {
            bail!("queue capacities must be at least 1");
        }
        if let SourceConfig::Synthetic { fps, .. } = &self.capture.source {
            if !(*fps > 0.0) {
                bail!("synthetic source fps must be positive, got {}", fps);
            }
        }
        if self.detection.sample_interval == 0 {
            bail!("detection.sample_interval must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            bail!("detection.min_confidence must be within 0..=1");
        }
        if self.incident.escalation_threshold == 0 || self.incident.snapshot_interval == 0 {
            bail!("incident.escalation_threshold and snapshot_interval must be at least 1");
        }
        if self.incident.threat_threshold > 100 {
            bail!("incident.threat_threshold is a percentage, got {}", self.incident.threat_threshold);
        }
        if self.escalation.batch_size == 0 {
            bail!("escalation.batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frames buffered between capture and detection
    pub queue_capacity: usize,

    /// A source silent for this long is treated as unavailable
    pub read_timeout_ms: u64,

    /// Frame source
    pub source: SourceConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            read_timeout_ms: 5000,
            source: SourceConfig::default(),
        }
    }
}

impl CaptureConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Synthetic {
        fps: f64,
        width: u32,
        height: u32,
    },
    Mjpeg {
        url: String,
        max_frame_bytes: usize,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Synthetic {
            fps: 30.0,
            width: 320,
            height: 240,
        }
    }
}

/// Detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Run the detector on every n-th frame
    pub sample_interval: u32,

    /// Analyzed frames to keep detecting after a positive result
    pub cooldown_frames: u32,

    /// Minimum confidence for detection
    pub min_confidence: f32,

    /// Wait on an empty capture queue before re-checking for shutdown
    pub queue_wait_ms: u64,

    /// Annotated frames buffered for display
    pub output_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sample_interval: 5,
            cooldown_frames: 15,
            min_confidence: 0.5,
            queue_wait_ms: 1000,
            output_capacity: 10,
        }
    }
}

/// Incident lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentConfig {
    /// Escalate at every multiple of this incident frame count
    pub escalation_threshold: u32,

    /// Classifier confidence (0-100) a threat verdict must exceed
    pub threat_threshold: u8,

    /// Keep a snapshot on every n-th incident frame
    pub snapshot_interval: u32,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 10,
            threat_threshold: 60,
            snapshot_interval: 2,
        }
    }
}

/// Escalation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Most recent frames considered per escalation
    pub batch_size: usize,

    /// Bound on a single classifier call
    pub timeout_ms: u64,

    /// Gemini model name
    pub model: String,

    /// Gemini API base URL
    pub endpoint: String,

    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            timeout_ms: 30_000,
            model: "gemini-1.5-flash".to_string(),
            endpoint: GEMINI_ENDPOINT.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

impl EscalationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Alert configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Alert as soon as an incident opens
    pub on_detection_started: bool,

    /// Alert whenever an incident is escalated
    pub on_escalation: bool,

    /// Bound on a single sink delivery
    pub delivery_timeout_ms: u64,

    /// POST alerts here instead of logging them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            on_detection_started: false,
            on_escalation: false,
            delivery_timeout_ms: 10_000,
            webhook_url: None,
        }
    }
}

impl AlertsConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// Demo mode configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Simulated classifier latency
    pub classifier_latency_ms: u64,

    /// Share of simulated verdicts that confirm a threat
    pub threat_ratio: f64,

    /// When the synthetic camera shows a hand
    pub schedule: HandSchedule,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            classifier_latency_ms: 1500,
            threat_ratio: 0.5,
            schedule: HandSchedule::default(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database path
    pub path: PathBuf,

    /// Persist retained snapshots with their frames
    pub store_snapshots: bool,

    /// Ended sessions older than this are deleted on startup, 0 keeps everything
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/zoneguard.db"),
            store_snapshots: true,
            retention_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_survives_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let text = r#"
            demo_mode = false

            [capture.source]
            kind = "mjpeg"
            url = "http://10.0.0.7:8080/stream"
            max_frame_bytes = 2000000

            [incident]
            escalation_threshold = 20
        "#;
        let config: Config = toml::from_str(text).unwrap();

        assert!(!config.demo_mode);
        assert_eq!(
            config.capture.source,
            SourceConfig::Mjpeg {
                url: "http://10.0.0.7:8080/stream".into(),
                max_frame_bytes: 2_000_000
            }
        );
        assert_eq!(config.capture.queue_capacity, 10);
        assert_eq!(config.incident.escalation_threshold, 20);
        assert_eq!(config.incident.threat_threshold, 60);
        assert_eq!(config.detection.sample_interval, 5);
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = Config::default();
        config.incident.escalation_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.incident.threat_threshold = 150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = std::env::temp_dir().join(format!("zoneguard-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(created, loaded);

        let _ = std::fs::remove_dir_all(dir);
    }
}
