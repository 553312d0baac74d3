//! Best-effort background work
//!
//! Learning-record persistence must not hold up the response to the user,
//! but its failures should still be visible. Work spawned here runs on the
//! tokio runtime; failures are logged and counted, never propagated.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::telemetry::{PipelineEvent, TelemetryCollector};

/// Handle for spawning and draining bookkeeping tasks
#[derive(Clone)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    scheduled: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    telemetry: TelemetryCollector,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BackgroundTasks {
    pub fn new(telemetry: TelemetryCollector) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            scheduled: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
            telemetry,
        }
    }

    /// Spawn `work`; an error is logged under `name` and counted
    pub fn spawn<F>(&self, name: impl Into<String>, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let failed = Arc::clone(&self.failed);
        let telemetry = self.telemetry.clone();
        self.scheduled.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            match work.await {
                Ok(()) => tracing::debug!(task = %name, "background task finished"),
                Err(e) => {
                    failed.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(task = %name, error = %e, "background task failed");
                    telemetry.record(PipelineEvent::BackgroundTaskFailed {
                        task: name,
                        timestamp: Instant::now(),
                    });
                }
            }
        });

        let mut handles = lock(&self.handles);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait for everything spawned so far, including work spawned meanwhile
    pub async fn flush(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.handles));
            if pending.is_empty() {
                return;
            }
            for result in join_all(pending).await {
                if let Err(e) = result {
                    self.failed.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(error = %e, "background task panicked");
                }
            }
        }
    }

    /// Tasks spawned since creation
    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Tasks not yet finished
    pub fn pending(&self) -> usize {
        lock(&self.handles).iter().filter(|h| !h.is_finished()).count()
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new(TelemetryCollector::new())
    }
}
