// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Core module - engine supervisor, event bus and shared pipeline plumbing

mod engine;
mod event_bus;
mod queue;
mod worker;

pub use engine::{Components, Engine, EngineError};
pub use event_bus::{CloseReason, Event, EventBus, HaltReason, PipelineEvent};
pub use queue::DropOldestQueue;
pub use worker::WorkerHandle;

use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a monitoring session
pub type SessionId = Uuid;

/// Identifier of an incident
pub type IncidentId = Uuid;

/// Identifier of an alert record
pub type AlertId = Uuid;

/// Monotonic event counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Pipeline-wide counters shared by every stage.
///
/// Failures that the pipeline absorbs (evictions, detector errors, classifier
/// fallbacks, persistence and delivery failures) only show up here.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_captured: Counter,
    pub capture_evicted: Counter,
    pub frames_processed: Counter,
    pub frames_analyzed: Counter,
    pub output_evicted: Counter,
    pub detection_failures: Counter,
    pub events_dropped: Counter,
    pub escalations_dispatched: Counter,
    pub escalations_coalesced: Counter,
    pub classifier_fallbacks: Counter,
    pub persistence_failures: Counter,
    pub alerts_raised: Counter,
    pub alert_delivery_failures: Counter,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.get(),
            capture_evicted: self.capture_evicted.get(),
            frames_processed: self.frames_processed.get(),
            frames_analyzed: self.frames_analyzed.get(),
            output_evicted: self.output_evicted.get(),
            detection_failures: self.detection_failures.get(),
            events_dropped: self.events_dropped.get(),
            escalations_dispatched: self.escalations_dispatched.get(),
            escalations_coalesced: self.escalations_coalesced.get(),
            classifier_fallbacks: self.classifier_fallbacks.get(),
            persistence_failures: self.persistence_failures.get(),
            alerts_raised: self.alerts_raised.get(),
            alert_delivery_failures: self.alert_delivery_failures.get(),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub capture_evicted: u64,
    pub frames_processed: u64,
    pub frames_analyzed: u64,
    pub output_evicted: u64,
    pub detection_failures: u64,
    pub events_dropped: u64,
    pub escalations_dispatched: u64,
    pub escalations_coalesced: u64,
    pub classifier_fallbacks: u64,
    pub persistence_failures: u64,
    pub alerts_raised: u64,
    pub alert_delivery_failures: u64,
}
