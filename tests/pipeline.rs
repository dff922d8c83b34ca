// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! End-to-end runs of the engine with scripted camera, detector and classifier

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use zoneguard::alerts::LogSink;
use zoneguard::capture::{CaptureError, PixelFormat};
use zoneguard::core::HaltReason;
use zoneguard::detection::{BoundingBox, DetectionError};
use zoneguard::escalation::{AnalysisOutcome, Verdict};
use zoneguard::incident::Snapshot;
use zoneguard::{
    AlertKind, Classifier, ClassifierOutcome, Components, Config, Database, Detection, Detector,
    Engine, EngineError, Frame, FrameSource, PipelineEvent, Store,
};

/// Emits `total` small JPEG frames, one every `pace`, then ends
struct ScriptedSource {
    total: u64,
    emitted: u64,
    pace: Duration,
}

impl ScriptedSource {
    fn boxed(total: u64) -> Box<dyn FrameSource> {
        Box::new(Self {
            total,
            emitted: 0,
            pace: Duration::from_millis(15),
        })
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn pull_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.emitted == self.total {
            return Ok(None);
        }
        tokio::time::sleep(self.pace).await;
        self.emitted += 1;
        Ok(Some(Frame::encoded(PixelFormat::Jpeg, vec![0xFF, 0xD8, 0xFF, 0xD9])))
    }
}

/// Sees a hand on exactly the listed capture sequences
struct ScriptedDetector {
    hands: HashSet<u64>,
}

impl ScriptedDetector {
    fn on(sequences: impl IntoIterator<Item = u64>) -> Arc<dyn Detector> {
        Arc::new(Self {
            hands: sequences.into_iter().collect(),
        })
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        if !self.hands.contains(&frame.sequence) {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            confidence: 0.9,
            bbox: BoundingBox::new(10.0, 20.0, 40.0, 60.0),
            label: "hand".into(),
        }])
    }
}

/// Answers with the scripted confidences in order, then benign
struct ScriptedClassifier {
    confidences: Vec<u8>,
    calls: AtomicUsize,
    batches: Mutex<Vec<usize>>,
}

impl ScriptedClassifier {
    fn new(confidences: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            confidences,
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, images: &[Snapshot], _instructions: &str) -> ClassifierOutcome {
        self.batches.lock().push(images.len());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let confidence = self.confidences.get(call).copied().unwrap_or(10);

        ClassifierOutcome::Success {
            verdict: Verdict {
                threat: confidence > 50,
                confidence,
                explanation: format!("scripted answer {}", call + 1),
            },
            raw: None,
        }
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.shutdown_grace_ms = 1000;
    config.detection.sample_interval = 1;
    config.detection.cooldown_frames = 0;
    config.detection.queue_wait_ms = 20;
    config.capture.queue_capacity = 64;
    config
}

fn engine(db: Arc<Database>, detector: Arc<dyn Detector>, classifier: Arc<dyn Classifier>) -> Engine {
    let components = Components {
        detector,
        classifier,
        sink: Arc::new(LogSink),
    };
    Engine::new(test_config(), db, components)
}

/// Run one session over `source` until it ends, then stop the engine
async fn run_to_end(engine: &mut Engine, source: Box<dyn FrameSource>) -> zoneguard::Session {
    let mut events = engine.subscribe();
    engine.start(source).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            if let PipelineEvent::SourceHalted { reason } = event.payload {
                assert_eq!(reason, HaltReason::EndOfStream);
                break;
            }
        }
    })
    .await
    .unwrap();

    engine.stop().await.unwrap()
}

#[tokio::test]
async fn test_recurring_escalation_until_threat_confirmed() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let classifier = ScriptedClassifier::new(vec![40, 75]);
    let mut engine = engine(db.clone(), ScriptedDetector::on(1..=20), classifier.clone());

    let session = run_to_end(&mut engine, ScriptedSource::boxed(24)).await;

    assert!(!session.active);
    assert_eq!(session.frame_count, 24);
    assert_eq!(session.incident_count, 1);
    assert_eq!(session.escalation_count, 2);

    let incidents = db.incidents_for_session(session.id).unwrap();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert!(!incident.active);
    assert!(incident.ended_at.is_some());
    assert_eq!(incident.frame_count, 20);
    assert!(incident.escalated);
    assert!(incident.analyzed);
    assert!(incident.threat_detected);
    assert_eq!(incident.threat_confidence, Some(75));
    assert!(incident.alerted);

    let mut analyses = db.analyses_for_incident(incident.id).unwrap();
    analyses.sort_by_key(|a| a.frame_start);
    let windows: Vec<(u32, u32)> = analyses.iter().map(|a| (a.frame_start, a.frame_end)).collect();
    assert_eq!(windows, vec![(1, 10), (11, 20)]);
    assert!(analyses.iter().all(|a| a.outcome == AnalysisOutcome::Success));
    assert!(!analyses[0].threat);
    assert!(analyses[1].threat);

    // snapshot every 2nd incident frame, so five per ten-frame window
    assert_eq!(*classifier.batches.lock(), vec![5, 5]);

    let alerts = db.alerts_for_incident(incident.id).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::ThreatConfirmed);
    assert_eq!(alerts[0].confidence, 75);

    let frames = db.frames_for_incident(incident.id).unwrap();
    assert_eq!(frames.len(), 20);
    assert_eq!(frames.first().map(|f| f.local_sequence), Some(1));
    assert_eq!(frames.last().map(|f| f.global_sequence), Some(20));

    let stats = engine.stats();
    assert_eq!(stats.escalations_dispatched, 2);
    assert_eq!(stats.alerts_raised, 1);
    assert_eq!(stats.persistence_failures, 0);
}

#[tokio::test]
async fn test_short_burst_closes_without_escalation() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let classifier = ScriptedClassifier::new(vec![90]);
    let mut engine = engine(db.clone(), ScriptedDetector::on(1..=5), classifier.clone());

    let session = run_to_end(&mut engine, ScriptedSource::boxed(8)).await;

    let incidents = db.incidents_for_session(session.id).unwrap();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert!(!incident.active);
    assert_eq!(incident.frame_count, 5);
    assert!(!incident.escalated);
    assert!(!incident.threat_detected);

    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    assert!(db.analyses_for_incident(incident.id).unwrap().is_empty());
    assert!(db.alerts_for_incident(incident.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_single_session_and_idempotent_stop() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let classifier = ScriptedClassifier::new(Vec::new());
    let mut engine = engine(db.clone(), ScriptedDetector::on(std::iter::empty()), classifier);

    let session_id = engine.start(ScriptedSource::boxed(1000)).await.unwrap();
    assert!(engine.is_running());
    assert!(matches!(
        engine.start(ScriptedSource::boxed(10)).await,
        Err(EngineError::AlreadyRunning(id)) if id == session_id
    ));

    let session = engine.stop().await.unwrap();
    assert_eq!(session.id, session_id);
    assert!(engine.stop().await.is_none());
    assert!(!engine.is_running());

    let stored = db.session(session_id).unwrap().unwrap();
    assert!(!stored.active);
    assert!(stored.ended_at.is_some());
    assert!(db.active_sessions().unwrap().is_empty());
}

/// Panics on its first call, then defers to the wrapped classifier
struct CrashingOnce {
    crashed: AtomicBool,
    then: Arc<ScriptedClassifier>,
}

#[async_trait]
impl Classifier for CrashingOnce {
    fn name(&self) -> &str {
        "crashing-once"
    }

    async fn analyze(&self, images: &[Snapshot], instructions: &str) -> ClassifierOutcome {
        if !self.crashed.swap(true, Ordering::SeqCst) {
            panic!("classifier runtime crashed");
        }
        self.then.analyze(images, instructions).await
    }
}

#[tokio::test]
async fn test_crashed_classifier_does_not_block_later_escalations() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let then = ScriptedClassifier::new(vec![20, 30]);
    let classifier = Arc::new(CrashingOnce {
        crashed: AtomicBool::new(false),
        then: then.clone(),
    });
    let mut engine = engine(db.clone(), ScriptedDetector::on(1..=30), classifier);

    let session = run_to_end(&mut engine, ScriptedSource::boxed(33)).await;
    assert_eq!(session.escalation_count, 3);

    let incidents = db.incidents_for_session(session.id).unwrap();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.frame_count, 30);
    assert!(!incident.threat_detected);

    let mut analyses = db.analyses_for_incident(incident.id).unwrap();
    analyses.sort_by_key(|a| a.frame_start);
    let outcomes: Vec<AnalysisOutcome> = analyses.iter().map(|a| a.outcome).collect();
    assert_eq!(
        outcomes,
        vec![AnalysisOutcome::Malformed, AnalysisOutcome::Success, AnalysisOutcome::Success]
    );
    assert_eq!(then.calls.load(Ordering::SeqCst), 2);

    let stats = engine.stats();
    assert_eq!(stats.escalations_dispatched, 3);
    assert_eq!(stats.escalations_coalesced, 0);
    assert_eq!(stats.classifier_fallbacks, 1);
}
