// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Alert sinks

use std::time::Duration;
use async_trait::async_trait;
use tracing::warn;

use super::{Alert, AlertKind, AlertSink, SinkError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes alerts to the log
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        match alert.kind {
            AlertKind::ThreatConfirmed => warn!(
                "🚨 THREAT CONFIRMED ({}%): {}",
                alert.confidence, alert.message
            ),
            _ => warn!("⚠️ {} ({}%): {}", alert.kind.as_str(), alert.confidence, alert.message),
        }
        Ok(())
    }
}

/// POSTs alerts as JSON to an HTTP endpoint
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

fn payload(alert: &Alert) -> serde_json::Value {
    serde_json::json!({
        "alert_id": alert.id,
        "incident_id": alert.incident_id,
        "type": alert.kind,
        "confidence": alert.confidence,
        "message": alert.message,
        "sent_at": alert.sent_at,
    })
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        &self.url
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(&payload(alert)).send().await?;
        if !response.status().is_success() {
            return Err(SinkError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
