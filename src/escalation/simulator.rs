// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Simulated classifier for demo mode

use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{Classifier, ClassifierOutcome, Verdict};
use crate::incident::Snapshot;

const BENIGN: &[&str] = &[
    "Hand passes near the bag without touching it",
    "Owner adjusting the strap, no access attempt",
    "Brief contact with the outer pocket, nothing opened",
];

const THREATS: &[&str] = &[
    "Hand reaching into the backpack, potential theft attempt",
    "Zipper being opened by an unfamiliar hand",
    "Repeated reaching toward the main compartment",
];

/// Produces plausible verdicts after an artificial latency.
///
/// Roughly `threat_ratio` of the calls come back as confirmed threats.
pub struct SimulatedClassifier {
    latency: Duration,
    threat_ratio: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedClassifier {
    pub fn new(latency: Duration, threat_ratio: f64) -> Self {
        Self::with_rng(latency, threat_ratio, StdRng::from_entropy())
    }

    pub fn seeded(latency: Duration, threat_ratio: f64, seed: u64) -> Self {
        Self::with_rng(latency, threat_ratio, StdRng::seed_from_u64(seed))
    }

    fn with_rng(latency: Duration, threat_ratio: f64, rng: StdRng) -> Self {
        Self {
            latency,
            threat_ratio: threat_ratio.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
        }
    }

    fn next_verdict(&self) -> Verdict {
        let mut rng = self.rng.lock();
        let threat = rng.gen_bool(self.threat_ratio);
        let (confidence, pool) = if threat {
            (rng.gen_range(65..=95), THREATS)
        } else {
            (rng.gen_range(10..=45), BENIGN)
        };
        let explanation = pool.choose(&mut *rng).copied().unwrap_or_default();

        Verdict {
            threat,
            confidence,
            explanation: explanation.to_string(),
        }
    }
}

#[async_trait]
impl Classifier for SimulatedClassifier {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn analyze(&self, _images: &[Snapshot], _instructions: &str) -> ClassifierOutcome {
        tokio::time::sleep(self.latency).await;
        ClassifierOutcome::Success {
            verdict: self.next_verdict(),
            raw: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_threat() {
        let classifier = SimulatedClassifier::seeded(Duration::ZERO, 1.0, 3);
        for _ in 0..20 {
            match classifier.analyze(&[], "").await {
                ClassifierOutcome::Success { verdict, .. } => {
                    assert!(verdict.threat);
                    assert!(verdict.confidence > 60);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_never_threat() {
        let classifier = SimulatedClassifier::seeded(Duration::ZERO, 0.0, 3);
        for _ in 0..20 {
            let verdict = classifier.next_verdict();
            assert!(!verdict.threat);
            assert!(verdict.confidence <= 45);
            assert!(!verdict.explanation.is_empty());
        }
    }
}
