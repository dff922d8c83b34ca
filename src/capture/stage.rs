// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Capture stage - pulls frames from the source into the capture queue

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use super::{CaptureError, Frame, FrameSource};
use crate::core::{DropOldestQueue, EventBus, HaltReason, PipelineEvent, PipelineStats, WorkerHandle};

/// How the capture loop ended
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Stopped by the supervisor
    Stopped,
    /// Source reported end of stream
    EndOfStream,
    /// Source failed; the stage does not retry
    Failed(CaptureError),
}

pub struct CaptureStage {
    source: Box<dyn FrameSource>,
    queue: Arc<DropOldestQueue<Frame>>,
    stats: Arc<PipelineStats>,
    event_bus: Arc<EventBus>,
    read_timeout: Duration,
    sequence: u64,
}

impl CaptureStage {
    pub fn new(
        source: Box<dyn FrameSource>,
        queue: Arc<DropOldestQueue<Frame>>,
        stats: Arc<PipelineStats>,
        event_bus: Arc<EventBus>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            source,
            queue,
            stats,
            event_bus,
            read_timeout,
            sequence: 0,
        }
    }

    /// Spawn the pull loop as a worker task
    pub fn start(self) -> WorkerHandle<CaptureOutcome> {
        WorkerHandle::spawn("capture", move |shutdown| self.run(shutdown))
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> CaptureOutcome {
        info!("Starting capture from '{}'...", self.source.name());

        let outcome = match self.source.open().await {
            Ok(()) => self.pull_loop(&mut shutdown).await,
            Err(e) => CaptureOutcome::Failed(e),
        };

        self.source.close().await;

        match &outcome {
            CaptureOutcome::Stopped => {
                info!("Capture stopped after {} frames", self.sequence);
            }
            CaptureOutcome::EndOfStream => {
                info!("Source '{}' ended after {} frames", self.source.name(), self.sequence);
                self.event_bus.publish(PipelineEvent::SourceHalted {
                    reason: HaltReason::EndOfStream,
                });
            }
            CaptureOutcome::Failed(e) => {
                error!("Capture halted, source '{}' unavailable: {}", self.source.name(), e);
                self.event_bus.publish(PipelineEvent::SourceHalted {
                    reason: HaltReason::SourceUnavailable(e.to_string()),
                });
            }
        }

        outcome
    }

    async fn pull_loop(&mut self, shutdown: &mut broadcast::Receiver<()>) -> CaptureOutcome {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    return CaptureOutcome::Stopped;
                }
                pulled = tokio::time::timeout(self.read_timeout, self.source.pull_frame()) => {
                    match pulled {
                        Ok(Ok(Some(frame))) => self.enqueue(frame),
                        Ok(Ok(None)) => return CaptureOutcome::EndOfStream,
                        Ok(Err(e)) => return CaptureOutcome::Failed(e),
                        Err(_) => return CaptureOutcome::Failed(CaptureError::ReadTimeout(self.read_timeout)),
                    }
                }
            }
        }
    }

    fn enqueue(&mut self, mut frame: Frame) {
        self.sequence += 1;
        frame.sequence = self.sequence;
        self.stats.frames_captured.inc();

        if let Some(evicted) = self.queue.push(frame) {
            self.stats.capture_evicted.inc();
            trace!("Capture queue full, dropped frame #{}", evicted.sequence);
        }

        if self.sequence % 300 == 0 {
            debug!("Captured frame #{}", self.sequence);
        }
        if self.stats.capture_evicted.get() > 0 && self.sequence % 1000 == 0 {
            warn!(
                "Capture queue has evicted {} of {} frames",
                self.stats.capture_evicted.get(),
                self.sequence
            );
        }
    }
}
