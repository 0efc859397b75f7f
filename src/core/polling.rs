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

//! Periodic readiness probing for channels that cannot be selected.
//!
//! Some transports expose neither readiness notification nor blocking reads.
//! Their channels register here instead: a single task probes each one's
//! [`is_ready`](crate::transport::PollableTransport::is_ready) every
//! interval, and ready channels are handed to the handler executor. With no
//! registered channels the task parks on a notification instead of spinning.

use crate::channel::CommChannel;
use crate::core::CommCore;
use crate::error::CommError;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct PollingShared {
    channels: Mutex<Vec<Arc<CommChannel>>>,
    wake: Notify,
}

/// The polling loop.
pub(crate) struct PollingLoop {
    interval: Duration,
    shared: Arc<PollingShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingLoop {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            shared: Arc::new(PollingShared {
                channels: Mutex::new(Vec::new()),
                wake: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Registers `channel` for polling, starting the loop on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel's transport has no polling probe.
    pub(crate) fn register(
        &self,
        core: &Arc<CommCore>,
        channel: Arc<CommChannel>,
    ) -> Result<(), CommError> {
        if channel.transport().as_pollable().is_none() {
            return Err(CommError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "channels registering for polling must expose a polling probe",
            )));
        }
        {
            let mut task = self.task.lock();
            if task.is_none() {
                *task = Some(tokio::spawn(polling_loop(
                    core.clone(),
                    self.shared.clone(),
                    self.interval,
                )));
            }
        }
        self.shared.channels.lock().push(channel);
        self.shared.wake.notify_waiters();
        Ok(())
    }

    /// Wakes and joins the loop; remaining channels are closed by the loop
    /// body when it observes the core is no longer active.
    pub(crate) async fn shutdown(&self) {
        self.shared.wake.notify_waiters();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn polling_loop(core: Arc<CommCore>, shared: Arc<PollingShared>, interval: Duration) {
    while core.is_active() {
        // Park while the set is empty; registration wakes us up.
        loop {
            let notified = shared.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !core.is_active() || !shared.channels.lock().is_empty() {
                break;
            }
            notified.await;
        }
        if !core.is_active() {
            break;
        }

        let mut ready = Vec::new();
        let mut broken = Vec::new();
        {
            let mut channels = shared.channels.lock();
            let mut i = 0;
            while i < channels.len() {
                let probe = channels[i]
                    .transport()
                    .as_pollable()
                    .map(|pollable| pollable.is_ready());
                match probe {
                    Some(Ok(true)) => ready.push(channels.swap_remove(i)),
                    Some(Ok(false)) => i += 1,
                    Some(Err(e)) => {
                        warn!(channel_id = %channels[i].id(), error = %e, "polling probe failed");
                        broken.push(channels.swap_remove(i));
                    }
                    None => {
                        broken.push(channels.swap_remove(i));
                    }
                }
            }
        }
        for channel in ready {
            core.schedule_receive(&channel);
        }
        for channel in broken {
            let _ = channel.close().await;
        }

        tokio::time::sleep(interval).await;
    }

    let leftovers: Vec<_> = shared.channels.lock().drain(..).collect();
    for channel in leftovers {
        if let Err(e) = channel.close().await {
            warn!(channel_id = %channel.id(), error = %e, "closing polled channel failed");
        }
    }
    debug!("polling loop stopped");
}
