//! Exclusive async lock used to serialize engine writes.
//!
//! Built on tokio's fair mutex: waiters acquire in arrival order, so
//! chained calls observe each other's effects in submission order. A
//! failing task simply releases the lock on drop; later tasks are
//! unaffected.

use std::future::Future;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct AsyncLock<T = ()> {
    inner: Mutex<T>,
}

impl<T> AsyncLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Exclusive access to the guarded value, granted in arrival order.
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().await
    }
}

impl AsyncLock<()> {
    /// Run `task` while holding the lock. Queued callers run one at a
    /// time, in the order they arrived; an inner failure releases the lock
    /// without dropping anything queued behind it.
    pub async fn run_exclusive<F: Future>(&self, task: F) -> F::Output {
        let _guard = self.inner.lock().await;
        task.await
    }
}
