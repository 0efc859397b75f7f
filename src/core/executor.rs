//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The handler executor.
//!
//! Handlers run as spawned tasks, optionally capped by the connections
//! limit. Every task carries an execution-context slot (see
//! [`crate::context`]) and is tracked so that shutdown can first drain
//! gracefully and then abort stragglers.

use crate::context::with_context_slot;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// Decrements the active gauge on every exit path, including aborts.
struct ActiveGuard {
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.idle.notify_waiters();
    }
}

/// Task pool running per-message handlers.
pub(crate) struct HandlerExecutor {
    limit: Option<Arc<Semaphore>>,
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    shutting_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HandlerExecutor {
    /// Creates an executor; a `connections_limit` of zero means unbounded.
    pub(crate) fn new(connections_limit: usize) -> Self {
        Self {
            limit: (connections_limit > 0).then(|| Arc::new(Semaphore::new(connections_limit))),
            active: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            shutting_down: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns a handler with an execution-context slot installed.
    ///
    /// Work submitted after shutdown began is dropped.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutting_down.load(Ordering::Acquire) {
            debug!("executor shutting down, dropping handler task");
            return;
        }
        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = ActiveGuard {
            active: self.active.clone(),
            idle: self.idle.clone(),
        };
        let limit = self.limit.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let _permit = match &limit {
                Some(semaphore) => match semaphore.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    // Closed during shutdown.
                    Err(_) => return,
                },
                None => None,
            };
            with_context_slot(future).await;
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Returns the number of handlers currently running or queued.
    pub(crate) fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Stops accepting new handlers.
    pub(crate) fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        if let Some(semaphore) = &self.limit {
            semaphore.close();
        }
    }

    /// Waits up to `timeout` for all handlers to finish.
    ///
    /// Returns `true` if the executor drained.
    pub(crate) async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active.load(Ordering::Acquire) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.active.load(Ordering::Acquire) == 0;
            }
        }
    }

    /// Aborts every handler still running.
    pub(crate) fn abort_all(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_drain() {
        let executor = HandlerExecutor::new(0);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            executor.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(executor.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_limit_serialises_handlers() {
        let executor = HandlerExecutor::new(1);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            executor.spawn(async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            });
        }
        assert!(executor.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drops_new_work() {
        let executor = HandlerExecutor::new(0);
        executor.begin_shutdown();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = counter.clone();
            executor.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(executor.wait_idle(Duration::from_millis(100)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_unblocks_stuck_handler() {
        let executor = HandlerExecutor::new(0);
        executor.spawn(async {
            std::future::pending::<()>().await;
        });
        assert!(!executor.wait_idle(Duration::from_millis(50)).await);
        executor.abort_all();
        assert!(executor.wait_idle(Duration::from_secs(1)).await);
    }
}
