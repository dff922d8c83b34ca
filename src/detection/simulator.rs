// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Simulated hand detector for demo mode

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::{BoundingBox, Detection, DetectionError, Detector};
use crate::capture::{Frame, HandSchedule};

const CONFIDENCE_MEAN: f32 = 0.82;
const CONFIDENCE_STD: f32 = 0.06;

/// Reports a hand whenever the shared schedule says one is visible
pub struct SimulatedDetector {
    schedule: HandSchedule,
    rng: Mutex<StdRng>,
}

impl SimulatedDetector {
    pub fn new(schedule: HandSchedule) -> Self {
        Self::with_rng(schedule, StdRng::from_entropy())
    }

    /// Deterministic detector for tests
    pub fn seeded(schedule: HandSchedule, seed: u64) -> Self {
        Self::with_rng(schedule, StdRng::seed_from_u64(seed))
    }

    fn with_rng(schedule: HandSchedule, rng: StdRng) -> Self {
        Self {
            schedule,
            rng: Mutex::new(rng),
        }
    }
}

impl Detector for SimulatedDetector {
    fn name(&self) -> &str {
        "simulated"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        if !self.schedule.hand_visible(frame.sequence) {
            return Ok(Vec::new());
        }

        let mut rng = self.rng.lock();
        let noise: f32 = rng.sample(StandardNormal);
        let confidence = (CONFIDENCE_MEAN + CONFIDENCE_STD * noise).clamp(0.5, 0.99);

        let w = frame.width.max(3) as f32;
        let h = frame.height.max(3) as f32;
        let jitter_x = rng.gen_range(-0.02..0.02) * w;
        let jitter_y = rng.gen_range(-0.02..0.02) * h;
        let bbox = BoundingBox::new(
            (w / 3.0 + jitter_x).max(0.0),
            (2.0 * h / 3.0 + jitter_y).max(0.0),
            (2.0 * w / 3.0 + jitter_x).min(w),
            h,
        );

        Ok(vec![Detection {
            confidence,
            bbox,
            label: "hand".to_string(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    fn frame(sequence: u64) -> Frame {
        let mut frame = Frame::new(PixelFormat::Rgb8, 90, 60, vec![0u8; 90 * 60 * 3]);
        frame.sequence = sequence;
        frame
    }

    #[test]
    fn test_follows_schedule() {
        let schedule = HandSchedule { period: 10, visible: 2, offset: 0 };
        let detector = SimulatedDetector::seeded(schedule, 7);

        assert_eq!(detector.detect(&frame(1)).unwrap().len(), 1);
        assert_eq!(detector.detect(&frame(2)).unwrap().len(), 1);
        assert!(detector.detect(&frame(3)).unwrap().is_empty());
        assert_eq!(detector.detect(&frame(11)).unwrap().len(), 1);
    }

    #[test]
    fn test_detection_within_frame() {
        let schedule = HandSchedule { period: 1, visible: 1, offset: 0 };
        let detector = SimulatedDetector::seeded(schedule, 42);

        for seq in 1..50 {
            let detection = &detector.detect(&frame(seq)).unwrap()[0];
            assert!((0.5..=0.99).contains(&detection.confidence));
            assert!(detection.bbox.x1 >= 0.0 && detection.bbox.x2 <= 90.0);
            assert!(detection.bbox.area() > 0.0);
            assert_eq!(detection.label, "hand");
        }
    }
}
