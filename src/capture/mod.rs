// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Capture module - frame sources and the capture stage

mod traits;
mod stage;
mod simulator;
mod mjpeg;

pub use traits::*;
pub use stage::{CaptureOutcome, CaptureStage};
pub use simulator::{HandSchedule, SyntheticSource};
pub use mjpeg::MjpegSource;

use crate::config::SourceConfig;

/// Build the frame source described by the configuration
pub fn source_from_config(config: &SourceConfig, schedule: HandSchedule) -> Box<dyn FrameSource> {
    match config {
        SourceConfig::Synthetic { fps, width, height } => {
            Box::new(SyntheticSource::new(*fps, *width, *height, schedule))
        }
        SourceConfig::Mjpeg { url, max_frame_bytes } => {
            Box::new(MjpegSource::new(url, *max_frame_bytes))
        }
    }
}
