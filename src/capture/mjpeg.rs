// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! MJPEG-over-HTTP frame source
//!
//! Reads a `multipart/x-mixed-replace` camera stream and cuts individual
//! JPEG images out of it by their SOI/EOI markers, ignoring part headers.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CaptureError, Frame, FrameSource, PixelFormat};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MjpegSource {
    url: String,
    client: reqwest::Client,
    response: Option<reqwest::Response>,
    buffer: Vec<u8>,
    max_frame_bytes: usize,
}

impl MjpegSource {
    pub fn new(url: &str, max_frame_bytes: usize) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
            response: None,
            buffer: Vec::with_capacity(256 * 1024),
            max_frame_bytes: max_frame_bytes.max(1024),
        }
    }
}

#[async_trait]
impl FrameSource for MjpegSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn open(&mut self) -> Result<(), CaptureError> {
        let response = tokio::time::timeout(CONNECT_TIMEOUT, self.client.get(&self.url).send())
            .await
            .map_err(|_| CaptureError::SourceUnavailable(format!("connect to {} timed out", self.url)))??;

        if !response.status().is_success() {
            return Err(CaptureError::SourceUnavailable(format!(
                "{} returned HTTP {}",
                self.url,
                response.status().as_u16()
            )));
        }

        info!("Connected to MJPEG stream at {}", self.url);
        self.buffer.clear();
        self.response = Some(response);
        Ok(())
    }

    async fn pull_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        loop {
            if let Some(jpeg) = extract_jpeg(&mut self.buffer) {
                return Ok(Some(Frame::encoded(PixelFormat::Jpeg, jpeg)));
            }

            let response = self
                .response
                .as_mut()
                .ok_or_else(|| CaptureError::SourceUnavailable("stream not opened".into()))?;

            match response.chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => {
                    debug!("MJPEG stream closed by {}", self.url);
                    return Ok(None);
                }
            }

            if self.buffer.len() > self.max_frame_bytes {
                warn!("Discarding {} bytes without a complete JPEG", self.buffer.len());
                discard_to_last_soi(&mut self.buffer);
            }
        }
    }

    async fn close(&mut self) {
        self.response = None;
        self.buffer.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Remove and return the first complete JPEG in `buffer`
fn extract_jpeg(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = find(buffer, &SOI, 0)?;
    let end = find(buffer, &EOI, start + 2)? + 2;
    let jpeg = buffer[start..end].to_vec();
    buffer.drain(..end);
    Some(jpeg)
}

/// Keep only the data from the most recent start marker on
fn discard_to_last_soi(buffer: &mut Vec<u8>) {
    let last = buffer.windows(2).rposition(|w| w == SOI);
    match last {
        Some(pos) if pos > 0 => {
            buffer.drain(..pos);
        }
        Some(_) => buffer.clear(),
        None => buffer.clear(),
    }
}
