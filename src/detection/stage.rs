// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Detection stage - sampled detection with overlay hysteresis

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use super::{Detection, DetectionEvent, Detector};
use crate::capture::Frame;
use crate::config::DetectionConfig;
use crate::core::{DropOldestQueue, PipelineStats, SessionId, WorkerHandle};

/// Frame with the overlay that should be drawn on it
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    /// Last known detections, kept visible during the cooldown window
    pub overlay: Vec<Detection>,
    /// Whether the detector actually ran on this frame
    pub analyzed: bool,
    pub frames_seen: u64,
    pub frames_analyzed: u64,
}

/// Decides which frames go through the detector.
///
/// Every `sample_interval`-th frame is analyzed. A positive result arms a
/// cooldown of `cooldown_frames` analyzed frames during which every frame is
/// analyzed and the last detections stay on the overlay.
#[derive(Debug, Clone)]
pub struct Sampler {
    sample_interval: u64,
    cooldown_frames: u32,
    frames_seen: u64,
    frames_analyzed: u64,
    cooldown: u32,
    last_detections: Vec<Detection>,
}

impl Sampler {
    pub fn new(sample_interval: u32, cooldown_frames: u32) -> Self {
        Self {
            sample_interval: u64::from(sample_interval.max(1)),
            cooldown_frames,
            frames_seen: 0,
            frames_analyzed: 0,
            cooldown: 0,
            last_detections: Vec::new(),
        }
    }

    /// Count one incoming frame and report whether to analyze it
    pub fn next_frame(&mut self) -> bool {
        self.frames_seen += 1;
        let analyze = self.frames_seen % self.sample_interval == 0 || self.cooldown > 0;
        if analyze {
            self.frames_analyzed += 1;
        }
        analyze
    }

    /// Feed back the detector result for an analyzed frame
    pub fn observe(&mut self, detections: &[Detection]) {
        if detections.is_empty() {
            self.cooldown = self.cooldown.saturating_sub(1);
        } else {
            self.last_detections = detections.to_vec();
            self.cooldown = self.cooldown_frames;
        }
    }

    pub fn overlay(&self) -> &[Detection] {
        if self.cooldown > 0 {
            &self.last_detections
        } else {
            &[]
        }
    }

    pub fn cooldown(&self) -> u32 {
        self.cooldown
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }
}

pub struct DetectionStage {
    session_id: SessionId,
    detector: Arc<dyn Detector>,
    input: Arc<DropOldestQueue<Frame>>,
    output: Arc<DropOldestQueue<AnnotatedFrame>>,
    events: mpsc::UnboundedSender<DetectionEvent>,
    stats: Arc<PipelineStats>,
    sampler: Sampler,
    min_confidence: f32,
    queue_wait: Duration,
}

impl DetectionStage {
    pub fn new(
        session_id: SessionId,
        config: &DetectionConfig,
        detector: Arc<dyn Detector>,
        input: Arc<DropOldestQueue<Frame>>,
        output: Arc<DropOldestQueue<AnnotatedFrame>>,
        events: mpsc::UnboundedSender<DetectionEvent>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            session_id,
            detector,
            input,
            output,
            events,
            stats,
            sampler: Sampler::new(config.sample_interval, config.cooldown_frames),
            min_confidence: config.min_confidence,
            queue_wait: Duration::from_millis(config.queue_wait_ms),
        }
    }

    /// Spawn the detection loop as a worker task
    pub fn start(self) -> WorkerHandle<()> {
        WorkerHandle::spawn("detection", move |shutdown| self.run(shutdown))
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting detection with '{}'...", self.detector.name());

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                popped = self.input.pop_timeout(self.queue_wait) => {
                    if let Some(frame) = popped {
                        self.process(frame);
                    }
                }
            }
        }

        let backlog = self.input.drain();
        if !backlog.is_empty() {
            debug!("Draining {} queued frames before stopping", backlog.len());
        }
        for frame in backlog {
            self.process(frame);
        }

        info!(
            "Detection stopped: analyzed {} of {} frames",
            self.sampler.frames_analyzed(),
            self.sampler.frames_seen()
        );
    }

    /// Handle one frame: maybe detect, emit the event, forward the annotated frame
    pub fn process(&mut self, frame: Frame) {
        self.stats.frames_processed.inc();
        let analyze = self.sampler.next_frame();

        if analyze {
            self.stats.frames_analyzed.inc();
            let detections = self.detect(&frame);
            self.sampler.observe(&detections);

            if !detections.is_empty() {
                trace!("Frame #{}: {} hands detected", frame.sequence, detections.len());
            }

            let event = DetectionEvent::new(self.session_id, &frame, detections);
            if self.events.send(event).is_err() {
                self.stats.events_dropped.inc();
                debug!("Incident state machine gone, dropped event for frame #{}", frame.sequence);
            }
        }

        let annotated = AnnotatedFrame {
            overlay: self.sampler.overlay().to_vec(),
            analyzed: analyze,
            frames_seen: self.sampler.frames_seen(),
            frames_analyzed: self.sampler.frames_analyzed(),
            frame,
        };
        if self.output.push(annotated).is_some() {
            self.stats.output_evicted.inc();
        }
    }

    fn detect(&self, frame: &Frame) -> Vec<Detection> {
        match self.detector.detect(frame) {
            Ok(detections) => detections
                .into_iter()
                .filter(|d| d.confidence >= self.min_confidence)
                .collect(),
            Err(e) => {
                self.stats.detection_failures.inc();
                warn!("Detection failed on frame #{}: {}", frame.sequence, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use crate::detection::{BoundingBox, DetectionError};
    use parking_lot::Mutex;
    use uuid::Uuid;

    fn hand(confidence: f32) -> Detection {
        Detection {
            confidence,
            bbox: BoundingBox::new(10.0, 10.0, 50.0, 60.0),
            label: "hand".to_string(),
        }
    }

    /// Detects a hand on the listed sequences, fails on the failing ones
    struct ListDetector {
        hands: Vec<u64>,
        failing: Vec<u64>,
        calls: Mutex<Vec<u64>>,
    }

    impl Detector for ListDetector {
        fn name(&self) -> &str {
            "list"
        }

        fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
            self.calls.lock().push(frame.sequence);
            if self.failing.contains(&frame.sequence) {
                return Err(DetectionError::Inference("boom".into()));
            }
            if self.hands.contains(&frame.sequence) {
                Ok(vec![hand(0.9), hand(0.3)])
            } else {
                Ok(vec![])
            }
        }
    }

    fn frame(sequence: u64) -> Frame {
        let mut frame = Frame::new(PixelFormat::Rgb8, 1, 1, vec![0u8; 3]);
        frame.sequence = sequence;
        frame
    }

    struct Harness {
        stage: DetectionStage,
        events: mpsc::UnboundedReceiver<DetectionEvent>,
        output: Arc<DropOldestQueue<AnnotatedFrame>>,
        detector: Arc<ListDetector>,
        stats: Arc<PipelineStats>,
    }

    fn harness(hands: Vec<u64>, failing: Vec<u64>, sample_interval: u32, cooldown: u32) -> Harness {
        let config = DetectionConfig {
            sample_interval,
            cooldown_frames: cooldown,
            ..DetectionConfig::default()
        };
        let detector = Arc::new(ListDetector { hands, failing, calls: Mutex::new(Vec::new()) });
        let (tx, events) = mpsc::unbounded_channel();
        let output = Arc::new(DropOldestQueue::new("output", 100));
        let stats = Arc::new(PipelineStats::default());
        let stage = DetectionStage::new(
            Uuid::new_v4(),
            &config,
            detector.clone(),
            Arc::new(DropOldestQueue::new("capture", 10)),
            output.clone(),
            tx,
            stats.clone(),
        );
        Harness { stage, events, output, detector, stats }
    }

    #[test]
    fn test_sampler_runs_every_nth_frame() {
        let mut sampler = Sampler::new(5, 15);
        let mut analyzed = Vec::new();
        for seq in 1..=20u64 {
            if sampler.next_frame() {
                analyzed.push(seq);
            }
        }
        assert_eq!(analyzed, vec![5, 10, 15, 20]);
        assert_eq!(sampler.frames_analyzed(), 4);
    }

    #[test]
    fn test_sampler_cooldown_keeps_analyzing_and_overlay() {
        let mut sampler = Sampler::new(5, 3);
        for _ in 0..4 {
            assert!(!sampler.next_frame());
        }
        assert!(sampler.next_frame());
        sampler.observe(&[hand(0.9)]);
        assert_eq!(sampler.overlay().len(), 1);

        // three empty analyzed frames drain the cooldown
        for remaining in (0..3).rev() {
            assert!(sampler.next_frame());
            sampler.observe(&[]);
            assert_eq!(sampler.cooldown(), remaining);
        }
        assert!(sampler.overlay().is_empty());
        assert!(!sampler.next_frame());
    }

    #[test]
    fn test_skipped_frames_emit_no_events() {
        let mut h = harness(vec![], vec![], 5, 15);
        for seq in 1..=12 {
            h.stage.process(frame(seq));
        }

        let mut sequences = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            assert!(!event.has_detection());
            sequences.push(event.sequence);
        }
        assert_eq!(sequences, vec![5, 10]);
        assert_eq!(h.output.len(), 12);
        assert_eq!(*h.detector.calls.lock(), vec![5, 10]);
    }

    #[test]
    fn test_detection_filters_by_confidence_and_attaches_frame() {
        let mut h = harness(vec![5], vec![], 5, 15);
        for seq in 1..=5 {
            h.stage.process(frame(seq));
        }

        let event = h.events.try_recv().unwrap();
        assert_eq!(event.sequence, 5);
        assert_eq!(event.count(), 1);
        assert!((event.max_confidence() - 0.9).abs() < f32::EPSILON);
        assert!(event.frame.is_some());
    }

    #[test]
    fn test_cooldown_analyzes_following_frames() {
        let mut h = harness(vec![5], vec![], 5, 2);
        for seq in 1..=9 {
            h.stage.process(frame(seq));
        }
        assert_eq!(*h.detector.calls.lock(), vec![5, 6, 7]);

        let annotated = h.output.drain();
        let overlays: Vec<usize> = annotated.iter().map(|a| a.overlay.len()).collect();
        assert_eq!(overlays, vec![0, 0, 0, 0, 2, 2, 0, 0, 0]);
    }

    #[test]
    fn test_detector_failure_counts_as_no_detection() {
        let mut h = harness(vec![], vec![1], 1, 15);
        h.stage.process(frame(1));

        let event = h.events.try_recv().unwrap();
        assert!(!event.has_detection());
        assert!(event.frame.is_none());
        assert_eq!(h.stats.detection_failures.get(), 1);
    }

    #[test]
    fn test_closed_receiver_counts_dropped_events() {
        let mut h = harness(vec![], vec![], 1, 15);
        drop(h.events);
        h.stage.process(frame(1));
        assert_eq!(h.stats.events_dropped.get(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_backlog_on_shutdown() {
        let h = harness(vec![], vec![], 1, 15);
        let input = h.stage.input.clone();
        let mut events = h.events;
        for seq in 1..=4 {
            input.push(frame(seq));
        }

        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        h.stage.run(rx).await;

        let mut count = 0;
        while events.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 4);
        assert!(input.is_empty());
    }
}
