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

//! Execution contexts and their registries.
//!
//! Handler tasks carry a per-task *execution context* slot that the
//! interpreter uses to restore session state. A decoded response may arrive
//! on any selector thread, so the [`ContextRegistry`] maps a channel identity
//! or a message id back to the context that originated the exchange.

use crate::channel::ChannelId;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for generating unique context ids.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque handle to an interpreter session.
///
/// The communication core never inspects the session; it only transports the
/// handle between the thread that registered an exchange and the thread that
/// completes it.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: u64,
    name: String,
}

impl ExecutionContext {
    /// Creates a new execution context with a debugging name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
            }),
        }
    }

    /// Returns the process-unique id of this context.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the debugging name of this context.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ExecutionContext {}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

tokio::task_local! {
    static CONTEXT_SLOT: RefCell<Option<ExecutionContext>>;
}

/// Runs `future` with an (initially empty) execution-context slot installed.
///
/// The handler executor wraps every handler in this scope so that
/// [`ContextGuard::install`] and [`current_context`] work inside handlers.
pub async fn with_context_slot<F>(future: F) -> F::Output
where
    F: Future,
{
    CONTEXT_SLOT.scope(RefCell::new(None), future).await
}

/// Returns the execution context installed in the current task, if any.
#[must_use]
pub fn current_context() -> Option<ExecutionContext> {
    CONTEXT_SLOT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Scoped installation of an execution context into the current task's slot.
///
/// The slot is cleared again when the guard drops, on every exit path.
pub struct ContextGuard {
    _private: (),
}

impl ContextGuard {
    /// Installs `context` into the current task's slot.
    ///
    /// Returns `None` when the current task carries no slot (it was not
    /// spawned through the handler executor).
    pub fn install(context: ExecutionContext) -> Option<Self> {
        CONTEXT_SLOT
            .try_with(|slot| {
                *slot.borrow_mut() = Some(context.clone());
            })
            .ok()
            .map(|()| Self { _private: () })
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let _ = CONTEXT_SLOT.try_with(|slot| {
            *slot.borrow_mut() = None;
        });
    }
}

/// Key under which an execution context is registered.
///
/// The request and response registries are keyed by either a channel identity
/// or a message id; the two key spaces are disjoint by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// Keyed by the identity of a channel (non-thread-safe exchanges).
    Channel(ChannelId),
    /// Keyed by a message id (thread-safe, multiplexed exchanges).
    Message(u64),
}

impl From<ChannelId> for ContextKey {
    fn from(id: ChannelId) -> Self {
        Self::Channel(id)
    }
}

impl From<u64> for ContextKey {
    fn from(id: u64) -> Self {
        Self::Message(id)
    }
}

/// Registry mapping channels or message ids to execution contexts.
///
/// The core keeps two independent instances, one for the request side and one
/// for the response side of an exchange.
#[derive(Default)]
pub struct ContextRegistry {
    map: Mutex<HashMap<ContextKey, ExecutionContext>>,
}

impl ContextRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `context` under `key`, replacing any previous entry.
    pub fn add_context(&self, key: impl Into<ContextKey>, context: ExecutionContext) {
        self.map.lock().insert(key.into(), context);
    }

    /// Returns the context registered under `key`, if any.
    #[must_use]
    pub fn get_context(&self, key: impl Into<ContextKey>) -> Option<ExecutionContext> {
        self.map.lock().get(&key.into()).cloned()
    }

    /// Removes and returns the context registered under `key`.
    pub fn remove_context(&self, key: impl Into<ContextKey>) -> Option<ExecutionContext> {
        self.map.lock().remove(&key.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_keyed_by_channel_and_message() {
        let registry = ContextRegistry::new();
        let by_channel = ExecutionContext::new("by-channel");
        let by_message = ExecutionContext::new("by-message");

        registry.add_context(ChannelId::from(7), by_channel.clone());
        registry.add_context(7u64, by_message.clone());

        // Same numeric value, different key spaces.
        assert_eq!(registry.get_context(ChannelId::from(7)), Some(by_channel));
        assert_eq!(registry.get_context(7u64), Some(by_message));

        registry.remove_context(ChannelId::from(7));
        assert_eq!(registry.get_context(ChannelId::from(7)), None);
        assert!(registry.get_context(7u64).is_some());
    }

    #[tokio::test]
    async fn test_context_slot_guard() {
        with_context_slot(async {
            assert!(current_context().is_none());
            {
                let _guard = ContextGuard::install(ExecutionContext::new("session")).unwrap();
                assert_eq!(current_context().unwrap().name(), "session");
            }
            assert!(current_context().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_install_without_slot() {
        assert!(ContextGuard::install(ExecutionContext::new("nowhere")).is_none());
        assert!(current_context().is_none());
    }
}
