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

//! The channel pool: persistent-connection caching.
//!
//! The pool is a hint cache over `(location, protocol)` pairs; correctness
//! never depends on its contents. It exists to avoid TCP and TLS setup costs
//! for chatty clients. Caching is single-use: a successful
//! [`get_persistent`](ChannelPool::get_persistent) removes the entry, and the
//! caller owns the channel until it releases it again.

use crate::channel::channel::CommChannel;
use crate::core::CommCore;
use crate::error::CommError;
use crate::location::Location;
use crate::ports::OutputPort;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

type PersistentMap = HashMap<Location, HashMap<String, Arc<CommChannel>>>;

#[derive(Default)]
struct PoolShared {
    channels: Mutex<PersistentMap>,
}

impl PoolShared {
    /// Removes the `(location, protocol)` entry if it still holds `channel`,
    /// pruning empty per-location maps.
    fn remove_entry(
        map: &mut PersistentMap,
        location: &Location,
        protocol: &str,
        channel: &Arc<CommChannel>,
    ) -> bool {
        let Some(protocols) = map.get_mut(location) else {
            return false;
        };
        let matches = protocols
            .get(protocol)
            .is_some_and(|cached| Arc::ptr_eq(cached, channel));
        if matches {
            protocols.remove(protocol);
            if protocols.is_empty() {
                map.remove(location);
            }
        }
        matches
    }

    async fn evict_on_timeout(
        self: Arc<Self>,
        location: Location,
        protocol: String,
        channel: Arc<CommChannel>,
        serial: u64,
    ) {
        let evict = {
            let mut map = self.channels.lock();
            // Only the channel's still-active handler may evict it.
            channel.timeout_current(serial)
                && Self::remove_entry(&mut map, &location, &protocol, &channel)
        };
        if evict {
            debug!(%location, protocol, channel_id = %channel.id(), "evicting idle persistent channel");
            channel.clear_timeout();
            if let Err(e) = channel.close().await {
                warn!(channel_id = %channel.id(), error = %e, "closing evicted channel failed");
            }
        }
    }
}

/// Cache of reusable outbound channels.
pub struct ChannelPool {
    shared: Arc<PoolShared>,
}

impl ChannelPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared::default()),
        }
    }

    /// Returns a channel to `location`, reusing a cached persistent channel
    /// when one is available and building a fresh one otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if a fresh channel cannot be created.
    pub async fn acquire(
        &self,
        core: &Arc<CommCore>,
        location: &Location,
        port: &Arc<OutputPort>,
    ) -> Result<Arc<CommChannel>, CommError> {
        if let Some(channel) = self.get_persistent(location, port.protocol().name()) {
            debug!(%location, channel_id = %channel.id(), "reusing persistent channel");
            return Ok(channel);
        }
        core.create_output_channel(location, port).await
    }

    /// Releases a channel after use: open channels not marked to-be-closed
    /// go back into the persistent cache, everything else is closed.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the channel fails.
    pub async fn release(
        &self,
        core: &Arc<CommCore>,
        channel: &Arc<CommChannel>,
    ) -> Result<(), CommError> {
        if channel.is_open() && !channel.to_be_closed() {
            self.put_persistent(
                core,
                channel.location().clone(),
                channel.protocol_name().to_string(),
                channel.clone(),
            );
            Ok(())
        } else {
            channel.close().await
        }
    }

    /// Looks up the cached channel for `(location, protocol)`.
    ///
    /// The entry is removed on every outcome except "no entry": a busy
    /// channel (lock held elsewhere) is evicted without closing, a closed
    /// channel is evicted, and a usable channel is handed to the caller with
    /// its idle timeout cleared.
    #[must_use]
    pub fn get_persistent(&self, location: &Location, protocol: &str) -> Option<Arc<CommChannel>> {
        let mut map = self.shared.channels.lock();
        let channel = map.get(location)?.get(protocol)?.clone();
        match channel.try_lock_owned() {
            Some(guard) => {
                PoolShared::remove_entry(&mut map, location, protocol, &channel);
                if channel.is_open() {
                    channel.clear_timeout();
                    drop(guard);
                    Some(channel)
                } else {
                    drop(guard);
                    None
                }
            }
            None => {
                // In use by a concurrent holder; forget the entry but leave
                // the channel to its owner.
                PoolShared::remove_entry(&mut map, location, protocol, &channel);
                None
            }
        }
    }

    /// Caches `channel` under `(location, protocol)` and schedules its idle
    /// eviction after the runtime's persistent-connection timeout.
    ///
    /// Replacement overwrites without closing the prior entry; callers
    /// holding the prior reference continue to own it.
    pub fn put_persistent(
        &self,
        core: &Arc<CommCore>,
        location: Location,
        protocol: String,
        channel: Arc<CommChannel>,
    ) {
        let idle = core.runtime().persistent_connection_timeout();
        let serial = channel.arm_timeout();
        let task = {
            let shared = self.shared.clone();
            let location = location.clone();
            let protocol = protocol.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(idle).await;
                shared
                    .evict_on_timeout(location, protocol, channel, serial)
                    .await;
            })
        };
        channel.attach_timeout_task(serial, task);
        self.shared
            .channels
            .lock()
            .entry(location)
            .or_default()
            .insert(protocol, channel);
    }
}

impl Default for ChannelPool {
    fn default() -> Self {
        Self::new()
    }
}
