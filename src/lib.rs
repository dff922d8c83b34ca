// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! zoneguard - Protected-Zone Hand Monitoring
//!
//! Watches a live camera feed for hands entering a protected zone:
//! - Capture decoupled from detection by bounded drop-oldest queues
//! - Sampled per-frame hand detection with overlay cooldown
//! - Incident tracking as a single-writer state machine
//! - Periodic escalation of recent frames to a slow external classifier
//! - Persisted alerts with best-effort delivery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     zoneguard Engine                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐  ┌───────┐  ┌───────────┐  ┌──────────────┐    │
//! │  │ Frame   │→ │Capture│→ │ Detection │→ │ Output queue │    │
//! │  │ Source  │  │ Stage │  │ Stage     │  └──────────────┘    │
//! │  └─────────┘  └───────┘  └───────────┘                      │
//! │                               ↓ detection events            │
//! │                     ┌──────────────────┐   ┌────────────┐   │
//! │                     │ Incident State   │ ⇄ │ Escalation │   │
//! │                     │ Machine          │   │ Coordinator│   │
//! │                     └──────────────────┘   └────────────┘   │
//! │                          ↓         ↓                        │
//! │                   ┌──────────┐ ┌──────────────┐             │
//! │                   │ Database │ │ AlertManager │→ AlertSink  │
//! │                   └──────────┘ └──────────────┘             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Event Bus                        │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod core;
pub mod capture;
pub mod detection;
pub mod incident;
pub mod escalation;
pub mod alerts;
pub mod config;
pub mod db;

// Re-exports for convenience
pub use config::Config;
pub use core::{Components, Engine, EngineError, EventBus, PipelineEvent, StatsSnapshot};
pub use capture::{Frame, FrameSource};
pub use detection::{Detection, Detector};
pub use incident::{Incident, Session};
pub use escalation::{Classifier, ClassifierOutcome};
pub use alerts::{Alert, AlertKind, AlertSink};
pub use db::{Database, Store};

/// zoneguard version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// zoneguard name
pub const NAME: &str = "zoneguard";
