// =============================================================================
// Process-wide singleton registry — double-checked lazy initialization
// =============================================================================
//
// The donor creates the broker bridge, the auth manager, and the blocking
// worker pool lazily on first access from whichever coroutine needs them
// first. We keep that laziness (tests that never touch the broker never pay
// to spawn its child process) but replace implicit global state with one
// value threaded through the dispatcher.
//
// Each slot uses the same double-checked pattern: a read-lock fast path that
// costs nothing once initialized, and a write-lock slow path that re-checks
// before constructing, so concurrent first-callers never race into building
// two instances.
// =============================================================================

use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

/// A lazily-constructed, process-wide singleton with async initialization.
pub struct LazySingleton<T> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T> LazySingleton<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Return the existing instance, or construct one via `init` if this is
    /// the first caller. Concurrent callers that arrive while construction is
    /// in flight wait on the write lock and then observe the result of
    /// whichever caller won, rather than constructing their own.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Arc<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Arc<T>>,
    {
        // Fast path: no write contention once initialized.
        if let Some(v) = self.inner.read().await.as_ref() {
            return v.clone();
        }

        let mut guard = self.inner.write().await;
        if let Some(v) = guard.as_ref() {
            return v.clone();
        }

        let v = init().await;
        *guard = Some(v.clone());
        v
    }

    /// Return the current instance without constructing one.
    pub async fn peek(&self) -> Option<Arc<T>> {
        self.inner.read().await.clone()
    }

    /// Force the slot back to uninitialized, e.g. after a bridge desync that
    /// requires a full respawn on next use.
    pub async fn reset(&self) {
        *self.inner.write().await = None;
    }
}

impl<T> Default for LazySingleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn constructs_exactly_once_under_contention() {
        let slot: Arc<LazySingleton<AtomicUsize>> = Arc::new(LazySingleton::new());
        let construct_count = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let slot = slot.clone();
            let construct_count = construct_count.clone();
            handles.push(tokio::spawn(async move {
                slot.get_or_init(|| {
                    let construct_count = construct_count.clone();
                    async move {
                        construct_count.fetch_add(1, Ordering::SeqCst);
                        Arc::new(AtomicUsize::new(0))
                    }
                })
                .await
            }));
        }

        let mut instances = Vec::new();
        for h in handles {
            instances.push(h.await.unwrap());
        }

        assert_eq!(construct_count.load(Ordering::SeqCst), 1);
        let first = Arc::as_ptr(&instances[0]);
        assert!(instances.iter().all(|i| Arc::as_ptr(i) == first));
    }

    #[tokio::test]
    async fn reset_allows_reconstruction() {
        let slot: LazySingleton<u32> = LazySingleton::new();
        let a = slot.get_or_init(|| async { Arc::new(1) }).await;
        slot.reset().await;
        let b = slot.get_or_init(|| async { Arc::new(2) }).await;
        assert_eq!(*a, 1);
        assert_eq!(*b, 2);
    }
}
