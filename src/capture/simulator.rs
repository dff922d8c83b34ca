// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Synthetic frame source for demo/testing

use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};

use super::{CaptureError, Frame, FrameSource, PixelFormat};

/// Scripted bursts of hand presence, keyed by frame sequence.
///
/// A hand is visible for `visible` frames out of every `period`, starting
/// after `offset` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandSchedule {
    pub period: u64,
    pub visible: u64,
    pub offset: u64,
}

impl HandSchedule {
    pub fn hand_visible(&self, sequence: u64) -> bool {
        if sequence <= self.offset || self.period == 0 {
            return false;
        }
        (sequence - self.offset - 1) % self.period < self.visible
    }
}

impl Default for HandSchedule {
    fn default() -> Self {
        Self {
            period: 300,
            visible: 90,
            offset: 60,
        }
    }
}

/// Generates an endless paced stream of raw RGB frames.
///
/// Frames in which the schedule shows a hand carry a bright block in the
/// lower third, so the output stream visibly changes.
pub struct SyntheticSource {
    fps: f64,
    width: u32,
    height: u32,
    schedule: HandSchedule,
    sequence: u64,
    ticker: Option<Interval>,
    empty_scene: Arc<[u8]>,
    hand_scene: Arc<[u8]>,
}

impl SyntheticSource {
    pub fn new(fps: f64, width: u32, height: u32, schedule: HandSchedule) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let empty = vec![48u8; (width * height * 3) as usize];
        let mut hand = empty.clone();

        let (x0, x1) = (width / 3, 2 * width / 3);
        let (y0, y1) = (2 * height / 3, height);
        for y in y0..y1 {
            for x in x0..x1 {
                let i = ((y * width + x) * 3) as usize;
                hand[i] = 224;
                hand[i + 1] = 172;
                hand[i + 2] = 140;
            }
        }

        Self {
            fps: fps.max(0.1),
            width,
            height,
            schedule,
            sequence: 0,
            ticker: None,
            empty_scene: empty.into(),
            hand_scene: hand.into(),
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn open(&mut self) -> Result<(), CaptureError> {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / self.fps));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn pull_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let ticker = self
            .ticker
            .as_mut()
            .ok_or_else(|| CaptureError::SourceUnavailable("synthetic source not opened".into()))?;
        ticker.tick().await;

        self.sequence += 1;
        let scene = if self.schedule.hand_visible(self.sequence) {
            self.hand_scene.clone()
        } else {
            self.empty_scene.clone()
        };

        Ok(Some(Frame::new(PixelFormat::Rgb8, self.width, self.height, scene)))
    }

    async fn close(&mut self) {
        self.ticker = None;
    }
}
