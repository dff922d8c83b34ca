// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/zoneguard

//! Long-lived worker tasks with a shutdown signal and bounded join

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Handle to a spawned pipeline worker.
///
/// The worker receives a `broadcast::Receiver<()>` and is expected to return
/// once it fires. Stopping is idempotent: the second call finds no task.
pub struct WorkerHandle<T> {
    name: &'static str,
    shutdown: broadcast::Sender<()>,
    join: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> WorkerHandle<T> {
    pub fn spawn<F, Fut>(name: &'static str, worker: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shutdown, rx) = broadcast::channel(1);
        let join = tokio::spawn(worker(rx));
        debug!("Spawned worker '{}'", name);

        Self {
            name,
            shutdown,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the worker task has already returned
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(|j| j.is_finished()).unwrap_or(true)
    }

    /// Ask the worker to stop without waiting for it
    pub fn signal(&self) {
        let _ = self.shutdown.send(());
    }

    /// Signal the worker and wait up to `grace` for it to return.
    ///
    /// A worker that overruns the grace period is aborted. Returns `None` when
    /// the worker was already joined, panicked or had to be aborted.
    pub async fn stop(&mut self, grace: Duration) -> Option<T> {
        let mut join = self.join.take()?;
        self.signal();

        match tokio::time::timeout(grace, &mut join).await {
            Ok(Ok(value)) => {
                debug!("Worker '{}' stopped", self.name);
                Some(value)
            }
            Ok(Err(e)) => {
                error!("Worker '{}' failed: {}", self.name, e);
                None
            }
            Err(_) => {
                warn!("Worker '{}' did not stop within {:?}, aborting", self.name, grace);
                join.abort();
                None
            }
        }
    }
}
