// =============================================================================
// Bounded worker pool for blocking calls off the cooperative event loop
// =============================================================================
//
// The event loop itself never blocks: writes to the broker bridge's pipe,
// synchronous filesystem fsyncs, and any future blocking client library all
// get routed through here. The pool is deliberately small (two workers) —
// the broker bridge is already serialized behind its own mutex, so giving it
// more parallelism than that would just queue requests earlier without
// raising real throughput, and would fight the upstream rate limit.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const DEFAULT_WORKERS: usize = 2;

/// A bounded pool of permits for spawning blocking work. `tokio::task::spawn_blocking`
/// already runs on its own thread pool; what we bound here is the number of
/// *concurrently in-flight* blocking calls this engine is willing to issue,
/// matching the donor's fixed-size executor semantics.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    /// Run a blocking closure on the blocking thread pool, queued behind the
    /// bounded permit count. Panics inside `f` are converted to an error
    /// rather than propagated, matching the "catch any handler exception"
    /// rule at the dispatcher boundary.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
    {
        let permit = self
        .permits
        .clone()
        .acquire_owned()
        .await
        .context("worker pool semaphore closed")?;

        let handle: JoinHandle<T> = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                f()
            });

        handle.await.context("blocking worker task panicked")
    }

    /// Number of permits currently available, exposed for the health handler.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Drain in-flight work and shut down. There is no explicit "stop
    /// accepting new work" flag here — callers stop submitting once the
    /// transport has told them the process is exiting — but we wait until
    /// every outstanding permit has been returned so shutdown never races a
    /// write to the bridge's pipe.
    pub async fn shutdown(&self) {
        let total = self.permits.available_permits();
        if let Ok(_guard) = self.permits.acquire_many(total.max(1) as u32).await {
            // All permits reclaimed: every blocking task has completed.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_closures_and_returns_values() {
        let pool = WorkerPool::new(DEFAULT_WORKERS);
        let result = pool.run(|| 2 + 2).await.unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn bounds_concurrency_to_pool_size() {
        let pool = Arc::new(WorkerPool::new(2));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                        pool.run(move || {
                                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                                max_seen.fetch_max(now, Ordering::SeqCst);
                                std::thread::sleep(Duration::from_millis(20));
                                concurrent.fetch_sub(1, Ordering::SeqCst);
                            })
                        .await
                        .unwrap();
                    }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panics_in_closure_become_errors() {
        let pool = WorkerPool::new(1);
        let result = pool.run(|| -> u8 { panic!("boom") }).await;
        assert!(result.is_err());
    }
}
