// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Frame source traits and common types

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Jpeg,
    Png,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    /// MIME type for encoded formats, `None` for raw buffers
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            PixelFormat::Jpeg => Some("image/jpeg"),
            PixelFormat::Png => Some("image/png"),
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => None,
        }
    }
}

/// A single raster frame.
///
/// The pixel buffer is shared, so cloning a frame never copies image data.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Arrival order assigned by the capture stage, starting at 1
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    /// 0 when unknown (encoded frames are not decoded)
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Arc<[u8]>,
}

impl Frame {
    pub fn new(format: PixelFormat, width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            sequence: 0,
            captured_at: Utc::now(),
            width,
            height,
            format,
            data: data.into(),
        }
    }

    /// Encoded frame of unknown dimensions
    pub fn encoded(format: PixelFormat, data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(format, 0, 0, data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("no frame within {0:?}")]
    ReadTimeout(Duration),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Anything that can produce a stream of frames
#[async_trait]
pub trait FrameSource: Send {
    /// Human-readable source name for logs
    fn name(&self) -> &str;

    /// Connect to the underlying device or stream
    async fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Next frame, `Ok(None)` at end of stream
    async fn pull_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Release the underlying device or stream
    async fn close(&mut self) {}
}
