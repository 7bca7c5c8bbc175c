use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

/// Tracks detached tasks spawned off the WebSocket proxy (snapshot writes,
/// engine cleanup) so shutdown can wait for them instead of dropping them
/// mid-write, mirroring the builder's own shutdown-hook draining in spirit
/// (`AppBuilder::on_stop`).
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `fut` as a tracked detached task.
    pub fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.handles
            .lock()
            .expect("background task registry poisoned")
            .push(handle);
    }

    /// Awaits every task spawned so far. Called from the `on_stop` hook.
    pub async fn drain(&self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .expect("background task registry poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task panicked during shutdown drain");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn drain_waits_for_every_spawned_task() {
        let background = BackgroundTasks::new();
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let completed = completed.clone();
            background.spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }

        background.drain().await;
        assert_eq!(completed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn drain_survives_a_panicking_task() {
        let background = BackgroundTasks::new();
        background.spawn(async { panic!("boom") });

        let completed = Arc::new(AtomicUsize::new(0));
        let completed_clone = completed.clone();
        background.spawn(async move {
            completed_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Must not itself panic even though one of the drained tasks did.
        background.drain().await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drain_is_idempotent_on_an_empty_registry() {
        let background = BackgroundTasks::new();
        background.drain().await;
        background.drain().await;
    }
}
