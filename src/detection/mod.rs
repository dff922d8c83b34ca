// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Detection module - fast per-frame hand detection and the detection stage

mod stage;
mod simulator;

pub use stage::{AnnotatedFrame, DetectionStage, Sampler};
pub use simulator::SimulatedDetector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::Frame;
use crate::core::SessionId;

/// Axis-aligned box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// One detected object in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detector confidence in [0, 1]
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub label: String,
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detector model not ready: {0}")]
    NotReady(String),

    #[error("unsupported frame format {0:?}")]
    UnsupportedFormat(crate::capture::PixelFormat),

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Fast per-frame detector.
///
/// Called on the detection hot path, so implementations must be cheap
/// relative to the frame interval.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;
}

/// Result of analyzing one frame, sent to the incident state machine
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub session_id: SessionId,
    /// Capture sequence of the analyzed frame
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub detections: Vec<Detection>,
    /// The analyzed frame, attached only when something was detected
    pub frame: Option<Frame>,
}

impl DetectionEvent {
    pub fn new(session_id: SessionId, frame: &Frame, detections: Vec<Detection>) -> Self {
        let attached = if detections.is_empty() {
            None
        } else {
            Some(frame.clone())
        };

        Self {
            session_id,
            sequence: frame.sequence,
            captured_at: frame.captured_at,
            detections,
            frame: attached,
        }
    }

    pub fn has_detection(&self) -> bool {
        !self.detections.is_empty()
    }

    pub fn count(&self) -> usize {
        self.detections.len()
    }

    /// Highest confidence among the detections, 0 when there are none
    pub fn max_confidence(&self) -> f32 {
        self.detections
            .iter()
            .map(|d| d.confidence)
            .fold(0.0, f32::max)
    }
}
