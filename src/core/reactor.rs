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

//! The selector array: readiness reactors for idle channels.
//!
//! One selector task exists per hardware thread; channels are assigned by a
//! global round-robin counter. Each selector watches the read-readiness of
//! its registered channels. When a channel becomes readable, the selector
//! try-locks it: on success the channel is unregistered and handed to the
//! handler executor, on failure the registration stays and readiness
//! re-fires on a later pass. A selector never performs the read itself.
//!
//! Invariant: a registered channel's lock is not held by any handler running
//! a receive; senders may still briefly hold it, which is exactly the case
//! the try-lock skips over.

use crate::channel::{ChannelId, CommChannel};
use crate::core::CommCore;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

enum Command {
    Register(Arc<CommChannel>),
    Unregister(ChannelId),
    Shutdown,
}

struct SelectorHandle {
    tx: mpsc::UnboundedSender<Command>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// The array of readiness reactors.
pub(crate) struct SelectorSet {
    selectors: Vec<SelectorHandle>,
    next: AtomicUsize,
}

impl SelectorSet {
    /// Creates `count` selectors; their tasks start in [`start`](Self::start).
    pub(crate) fn new(count: usize) -> Self {
        let selectors = (0..count.max(1))
            .map(|_| {
                let (tx, rx) = mpsc::unbounded_channel();
                SelectorHandle {
                    tx,
                    rx: Mutex::new(Some(rx)),
                    task: Mutex::new(None),
                }
            })
            .collect();
        Self {
            selectors,
            next: AtomicUsize::new(0),
        }
    }

    /// Returns the number of selectors.
    pub(crate) fn selector_count(&self) -> usize {
        self.selectors.len()
    }

    /// Spawns every selector task. Idempotent.
    pub(crate) fn start(&self, core: &Arc<CommCore>) {
        for (index, selector) in self.selectors.iter().enumerate() {
            let Some(rx) = selector.rx.lock().take() else {
                continue;
            };
            let core = core.clone();
            *selector.task.lock() = Some(tokio::spawn(selector_loop(core, index, rx)));
        }
    }

    /// Assigns `channel` round-robin and registers it for read readiness.
    pub(crate) fn register(&self, channel: Arc<CommChannel>) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.selectors.len();
        channel.set_selector_index(Some(index));
        if self.selectors[index]
            .tx
            .send(Command::Register(channel))
            .is_err()
        {
            warn!(selector = index, "selector is gone, dropping registration");
        }
    }

    /// Cancels `channel`'s registration on its assigned selector.
    pub(crate) fn unregister(&self, channel: &Arc<CommChannel>) {
        if let Some(index) = channel.selector_index() {
            let _ = self.selectors[index]
                .tx
                .send(Command::Unregister(channel.id()));
        }
    }

    /// Wakes and joins every selector, closing their remaining channels.
    pub(crate) async fn shutdown(&self) {
        for selector in &self.selectors {
            let _ = selector.tx.send(Command::Shutdown);
        }
        for selector in &self.selectors {
            let task = selector.task.lock().take();
            if let Some(task) = task {
                let _ = task.await;
            }
        }
    }
}

type ReadyFuture = BoxFuture<'static, (Arc<CommChannel>, io::Result<()>)>;

fn watch_readable(channel: Arc<CommChannel>, backoff: bool) -> ReadyFuture {
    Box::pin(async move {
        if backoff {
            // The lock was contended on the previous pass; give its holder a
            // moment instead of spinning on instant readiness.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let result = channel.transport().readable().await;
        (channel, result)
    })
}

async fn selector_loop(
    core: Arc<CommCore>,
    index: usize,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut watched: HashMap<ChannelId, Arc<CommChannel>> = HashMap::new();
    let mut ready: FuturesUnordered<ReadyFuture> = FuturesUnordered::new();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                None | Some(Command::Shutdown) => break,
                Some(Command::Register(channel)) => {
                    if watched.insert(channel.id(), channel.clone()).is_none() {
                        ready.push(watch_readable(channel, false));
                    }
                }
                Some(Command::Unregister(id)) => {
                    watched.remove(&id);
                }
            },
            Some((channel, result)) = ready.next(), if !ready.is_empty() => {
                if !watched.contains_key(&channel.id()) {
                    // Cancelled while the readiness watch was in flight.
                    continue;
                }
                match result {
                    Err(e) => {
                        watched.remove(&channel.id());
                        debug!(selector = index, channel_id = %channel.id(), error = %e,
                            "readiness watch failed");
                        tokio::spawn(async move { let _ = channel.close().await; });
                    }
                    Ok(()) => match channel.try_lock_owned() {
                        Some(guard) => {
                            watched.remove(&channel.id());
                            drop(guard);
                            if channel.is_open() {
                                core.schedule_receive(&channel);
                            } else {
                                tokio::spawn(async move { let _ = channel.close().await; });
                            }
                        }
                        None => {
                            ready.push(watch_readable(channel, true));
                        }
                    },
                }
            }
        }
    }

    for (_, channel) in watched.drain() {
        tokio::spawn(async move {
            let _ = channel.close().await;
        });
    }
    debug!(selector = index, "selector stopped");
}
