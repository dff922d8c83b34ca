// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Pipeline supervisor

use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{
    AlertId, DropOldestQueue, Event, EventBus, PipelineStats, SessionId, StatsSnapshot, WorkerHandle,
};
use crate::alerts::{AlertManager, AlertSink, LogSink, SinkError, WebhookSink};
use crate::capture::{CaptureOutcome, CaptureStage, Frame, FrameSource};
use crate::config::Config;
use crate::db::{Recorder, Store, StoreError};
use crate::detection::{AnnotatedFrame, DetectionStage, Detector, SimulatedDetector};
use crate::escalation::{Classifier, ClassifierError, EscalationCoordinator, GeminiClassifier, SimulatedClassifier};
use crate::incident::{run_session, IncidentPolicy, IncidentStateMachine, Session};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session {0} is already running")]
    AlreadyRunning(SessionId),

    #[error("{0} session(s) are still marked active in the store")]
    StaleSessions(usize),

    #[error("no hand detector available outside demo mode")]
    NoDetector,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("classifier setup failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("alert sink setup failed: {0}")]
    Sink(#[from] SinkError),
}

/// Models and sinks the pipeline runs with
pub struct Components {
    pub detector: Arc<dyn Detector>,
    pub classifier: Arc<dyn Classifier>,
    pub sink: Arc<dyn AlertSink>,
}

impl Components {
    /// Pick the components described by the configuration.
    ///
    /// No vision model ships with the crate: the simulated detector is only
    /// available in demo mode, anything else needs [`Components::with_detector`].
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        if !config.demo_mode {
            return Err(EngineError::NoDetector);
        }
        Self::with_detector(config, Arc::new(SimulatedDetector::new(config.demo.schedule)))
    }

    /// Build the classifier and sink from the configuration around `detector`.
    ///
    /// The Gemini classifier is used when its API key is set and demo mode
    /// is off.
    pub fn with_detector(config: &Config, detector: Arc<dyn Detector>) -> Result<Self, EngineError> {
        let classifier: Arc<dyn Classifier> = if config.demo_mode {
            Arc::new(simulated_classifier(config))
        } else {
            match GeminiClassifier::from_config(&config.escalation) {
                Ok(gemini) => Arc::new(gemini),
                Err(e @ ClassifierError::MissingApiKey(_)) => {
                    warn!("{}, falling back to the simulated classifier", e);
                    Arc::new(simulated_classifier(config))
                }
                Err(e) => return Err(e.into()),
            }
        };

        let sink: Arc<dyn AlertSink> = match &config.alerts.webhook_url {
            Some(url) => Arc::new(WebhookSink::new(url)?),
            None => Arc::new(LogSink),
        };

        Ok(Self {
            detector,
            classifier,
            sink,
        })
    }
}

fn simulated_classifier(config: &Config) -> SimulatedClassifier {
    SimulatedClassifier::new(
        Duration::from_millis(config.demo.classifier_latency_ms),
        config.demo.threat_ratio,
    )
}

/// Workers of the running session
struct Run {
    session_id: SessionId,
    capture: WorkerHandle<CaptureOutcome>,
    detection: WorkerHandle<()>,
    machine: JoinHandle<Session>,
}

/// Main zoneguard engine
pub struct Engine {
    config: Arc<Config>,
    policy: IncidentPolicy,
    detector: Arc<dyn Detector>,
    recorder: Arc<Recorder>,
    coordinator: EscalationCoordinator,
    alerts: Arc<AlertManager>,
    stats: Arc<PipelineStats>,
    event_bus: Arc<EventBus>,
    output: Arc<DropOldestQueue<AnnotatedFrame>>,
    run: Option<Run>,
    start_time: Option<Instant>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn Store>, components: Components) -> Self {
        let stats = Arc::new(PipelineStats::default());
        let event_bus = Arc::new(EventBus::default());
        let recorder = Arc::new(Recorder::new(store, stats.clone()));

        let coordinator = EscalationCoordinator::new(
            components.classifier,
            config.escalation.timeout(),
            recorder.clone(),
            event_bus.clone(),
            stats.clone(),
        );
        let alerts = Arc::new(AlertManager::new(
            components.sink,
            config.alerts.delivery_timeout(),
            recorder.clone(),
            event_bus.clone(),
            stats.clone(),
        ));

        Self {
            policy: IncidentPolicy::from_config(&config),
            output: Arc::new(DropOldestQueue::new("output", config.detection.output_capacity)),
            config: Arc::new(config),
            detector: components.detector,
            recorder,
            coordinator,
            alerts,
            stats,
            event_bus,
            run: None,
            start_time: None,
        }
    }

    /// Start a monitoring session reading from `source`.
    ///
    /// Rejected while a session is running here or is still marked active
    /// in the store.
    pub async fn start(&mut self, source: Box<dyn FrameSource>) -> Result<SessionId, EngineError> {
        if let Some(run) = &self.run {
            return Err(EngineError::AlreadyRunning(run.session_id));
        }

        let stale = self.recorder.store().active_sessions()?;
        if !stale.is_empty() {
            return Err(EngineError::StaleSessions(stale.len()));
        }

        info!("Starting zoneguard engine...");
        let grace = self.config.shutdown_grace();

        let machine = IncidentStateMachine::start(
            self.policy.clone(),
            Utc::now(),
            self.recorder.clone(),
            self.event_bus.clone(),
            self.stats.clone(),
        );
        let session_id = machine.session().id;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let machine = tokio::spawn(run_session(
            machine,
            event_rx,
            self.coordinator.clone(),
            self.alerts.clone(),
            grace,
        ));

        let capture_queue = Arc::new(DropOldestQueue::<Frame>::new("capture", self.config.capture.queue_capacity));

        let detection = DetectionStage::new(
            session_id,
            &self.config.detection,
            self.detector.clone(),
            capture_queue.clone(),
            self.output.clone(),
            event_tx,
            self.stats.clone(),
        )
        .start();

        let capture = CaptureStage::new(
            source,
            capture_queue,
            self.stats.clone(),
            self.event_bus.clone(),
            self.config.capture.read_timeout(),
        )
        .start();

        self.run = Some(Run {
            session_id,
            capture,
            detection,
            machine,
        });
        self.start_time = Some(Instant::now());

        info!("zoneguard engine started, session {}", session_id);
        Ok(session_id)
    }

    /// Stop capture, then detection, then end the session.
    ///
    /// Returns the ended session, or `None` when nothing was running.
    pub async fn stop(&mut self) -> Option<Session> {
        let mut run = self.run.take()?;
        info!("Stopping zoneguard engine...");
        let grace = self.config.shutdown_grace();

        run.capture.stop(grace).await;
        run.detection.stop(grace).await;

        // the machine also waits up to `grace` for outstanding verdicts
        let session = match tokio::time::timeout(grace * 2, &mut run.machine).await {
            Ok(Ok(session)) => Some(session),
            Ok(Err(e)) => {
                warn!("Incident state machine failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Incident state machine did not finish within {:?}, aborting", grace * 2);
                run.machine.abort();
                None
            }
        };

        self.start_time = None;
        info!("zoneguard engine stopped");
        session
    }

    /// End sessions left active by a process that did not shut down cleanly
    pub fn close_stale_sessions(&self) -> Result<usize, EngineError> {
        let store = self.recorder.store();
        let running = self.run.as_ref().map(|run| run.session_id);
        let now = Utc::now();
        let mut closed = 0;

        for mut session in store.active_sessions()? {
            if Some(session.id) == running {
                continue;
            }

            for mut incident in store.incidents_for_session(session.id)? {
                if incident.close(now) {
                    store.save_incident(&incident)?;
                }
            }
            session.end(now);
            store.save_session(&session)?;
            warn!("Closed stale session {} started at {}", session.id, session.started_at);
            closed += 1;
        }

        Ok(closed)
    }

    /// Mark an alert acknowledged; false when it does not exist
    pub fn acknowledge_alert(&self, id: AlertId) -> Result<bool, EngineError> {
        let acknowledged = self.recorder.store().acknowledge_alert(id, Utc::now())?;
        if acknowledged {
            info!("Alert {} acknowledged", id);
        }
        Ok(acknowledged)
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.run.as_ref().map(|run| run.session_id)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.recorder.store()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_bus.subscribe()
    }

    /// Annotated frames for display, oldest dropped when nobody keeps up
    pub fn output(&self) -> Arc<DropOldestQueue<AnnotatedFrame>> {
        self.output.clone()
    }

    pub fn uptime(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }
}
