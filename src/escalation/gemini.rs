// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Gemini `generateContent` classifier

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{parse_reply, Classifier, ClassifierError, ClassifierOutcome};
use crate::config::EscalationConfig;
use crate::incident::Snapshot;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClassifier {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClassifier {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Build the client from config, reading the key from the configured variable
    pub fn from_config(config: &EscalationConfig) -> Result<Self, ClassifierError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ClassifierError::MissingApiKey(config.api_key_env.clone()))?;

        Ok(Self::new(&config.endpoint, &config.model, &api_key))
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    async fn generate(&self, images: &[Snapshot], instructions: &str) -> Result<String, ClassifierError> {
        let body = request_body(images, instructions)?;

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: GenerateResponse = response.json().await?;
        reply_text(reply)
    }
}

fn request_body(images: &[Snapshot], instructions: &str) -> Result<Value, ClassifierError> {
    let mut parts = vec![json!({ "text": instructions })];

    for image in images {
        let mime = image
            .format
            .mime_type()
            .ok_or(ClassifierError::UnsupportedFormat(image.format))?;
        parts.push(json!({
            "inline_data": {
                "mime_type": mime,
                "data": STANDARD.encode(&image.data),
            }
        }));
    }

    Ok(json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": { "temperature": 0.2 },
    }))
}

fn reply_text(reply: GenerateResponse) -> Result<String, ClassifierError> {
    let text: String = reply
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ClassifierError::Response("no text in first candidate".into()));
    }
    Ok(text)
}

#[async_trait]
impl Classifier for GeminiClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, images: &[Snapshot], instructions: &str) -> ClassifierOutcome {
        match self.generate(images, instructions).await {
            Ok(text) => {
                debug!("Gemini replied with {} chars", text.len());
                parse_reply(&text)
            }
            Err(ClassifierError::Http(e)) if e.is_timeout() => ClassifierOutcome::TimedOut,
            Err(e) => {
                warn!("Gemini request failed: {}", e);
                ClassifierOutcome::Malformed(e.to_string())
            }
        }
    }
}
