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

//! The message pool: correlation of pending requests to responses.
//!
//! Two variants coexist. *Synchronous* registrations bind a channel identity
//! to its single outstanding request; the same channel carries the response,
//! and the waiter decodes messages off it until the registered id arrives.
//! *Asynchronous* registrations bind a request id to its operation name plus
//! a completion slot, for thread-safe channels that multiplex exchanges.
//!
//! A response that matches no registration is logged and discarded.

use crate::channel::id::ChannelId;
use crate::error::CommError;
use crate::message::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::warn;

struct SyncEntry {
    request: Message,
    tx: Option<oneshot::Sender<Message>>,
    rx: Option<oneshot::Receiver<Message>>,
}

struct AsyncEntry {
    operation: String,
    tx: Option<oneshot::Sender<Message>>,
    rx: Option<oneshot::Receiver<Message>>,
}

#[derive(Default)]
struct PoolInner {
    sync: HashMap<ChannelId, SyncEntry>,
    by_request_id: HashMap<u64, ChannelId>,
    asynchronous: HashMap<u64, AsyncEntry>,
}

/// Correlation table for in-flight requests.
#[derive(Default)]
pub struct MessagePool {
    inner: Mutex<PoolInner>,
}

impl MessagePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request` as the outstanding exchange on `channel`.
    ///
    /// Replaces any previous registration for the channel; sequential
    /// channels carry at most one exchange at a time.
    pub fn register_synchronous(&self, channel: ChannelId, request: &Message) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if let Some(stale) = inner.sync.insert(
            channel,
            SyncEntry {
                request: request.clone(),
                tx: Some(tx),
                rx: Some(rx),
            },
        ) {
            inner.by_request_id.remove(&stale.request.id());
        }
        inner.by_request_id.insert(request.id(), channel);
    }

    /// Registers the asynchronous exchange `id` for `operation`.
    pub fn register_asynchronous(&self, id: u64, operation: &str) {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().asynchronous.insert(
            id,
            AsyncEntry {
                operation: operation.to_string(),
                tx: Some(tx),
                rx: Some(rx),
            },
        );
    }

    /// Delivers a decoded response to whichever registration matches its id.
    ///
    /// Unmatched responses are logged and discarded.
    pub fn receive_response(&self, message: Message) {
        let id = message.id();
        let mut inner = self.inner.lock();
        if let Some(channel) = inner.by_request_id.get(&id).copied() {
            inner.by_request_id.remove(&id);
            if let Some(entry) = inner.sync.get_mut(&channel) {
                if let Some(tx) = entry.tx.take() {
                    if tx.send(message).is_err() {
                        warn!(request_id = id, "response waiter went away before delivery");
                    }
                    return;
                }
            }
            warn!(request_id = id, "duplicate response discarded");
            return;
        }
        if let Some(entry) = inner.asynchronous.get_mut(&id) {
            match entry.tx.take() {
                Some(tx) => {
                    if tx.send(message).is_err() {
                        warn!(request_id = id, "response waiter went away before delivery");
                    }
                }
                None => warn!(request_id = id, "duplicate response discarded"),
            }
            // The completion slot buffers the value, so the entry can go as
            // soon as the waiter has claimed its receiver.
            if inner
                .asynchronous
                .get(&id)
                .is_some_and(|entry| entry.rx.is_none())
            {
                inner.asynchronous.remove(&id);
            }
            return;
        }
        warn!(
            request_id = id,
            operation = message.operation(),
            "discarding response that does not correlate with any pending request"
        );
    }

    /// Takes the completion slot of the synchronous registration on
    /// `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::Correlation`] if no registration exists for the
    /// channel or it was made for a different request id.
    pub(crate) fn take_sync_receiver(
        &self,
        channel: ChannelId,
        request_id: u64,
    ) -> Result<oneshot::Receiver<Message>, CommError> {
        let mut inner = self.inner.lock();
        let entry = inner.sync.get_mut(&channel).ok_or_else(|| {
            CommError::Correlation(format!("no pending request on {channel}"))
        })?;
        if entry.request.id() != request_id {
            return Err(CommError::Correlation(format!(
                "pending request on {channel} has id {}, not {request_id}",
                entry.request.id()
            )));
        }
        entry.rx.take().ok_or_else(|| {
            CommError::Correlation(format!("response for {channel} already claimed"))
        })
    }

    /// Takes the completion slot of the asynchronous registration `id`.
    pub(crate) fn take_async_receiver(&self, id: u64) -> Option<oneshot::Receiver<Message>> {
        let mut inner = self.inner.lock();
        let (receiver, delivered) = {
            let entry = inner.asynchronous.get_mut(&id)?;
            (entry.rx.take(), entry.tx.is_none())
        };
        if delivered {
            inner.asynchronous.remove(&id);
        }
        receiver
    }

    /// Returns the request registered on `channel`, if any.
    ///
    /// Protocol codecs use this while encoding a response that needs details
    /// of its originating request.
    #[must_use]
    pub fn retrieve_synchronous_request(&self, channel: ChannelId) -> Option<Message> {
        self.inner
            .lock()
            .sync
            .get(&channel)
            .map(|entry| entry.request.clone())
    }

    /// Returns the operation name registered for the asynchronous exchange
    /// `id`, if any.
    ///
    /// Protocol codecs use this when decoding a response whose type depends
    /// on the operation.
    #[must_use]
    pub fn retrieve_asynchronous_request(&self, id: u64) -> Option<String> {
        self.inner
            .lock()
            .asynchronous
            .get(&id)
            .map(|entry| entry.operation.clone())
    }

    /// Drops the synchronous registration on `channel`.
    pub(crate) fn discard_synchronous(&self, channel: ChannelId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.sync.remove(&channel) {
            inner.by_request_id.remove(&entry.request.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Value;

    fn request() -> Message {
        Message::request("op", "/", Value::Null)
    }

    #[tokio::test]
    async fn test_synchronous_delivery() {
        let pool = MessagePool::new();
        let channel = ChannelId::new();
        let req = request();
        pool.register_synchronous(channel, &req);

        assert_eq!(
            pool.retrieve_synchronous_request(channel).unwrap().id(),
            req.id()
        );

        let rx = pool.take_sync_receiver(channel, req.id()).unwrap();
        pool.receive_response(Message::empty_response(&req));
        assert_eq!(rx.await.unwrap().id(), req.id());
    }

    #[tokio::test]
    async fn test_asynchronous_delivery() {
        let pool = MessagePool::new();
        let req = request();
        pool.register_asynchronous(req.id(), "op");

        assert_eq!(
            pool.retrieve_asynchronous_request(req.id()).as_deref(),
            Some("op")
        );

        let rx = pool.take_async_receiver(req.id()).unwrap();
        pool.receive_response(Message::empty_response(&req));
        assert_eq!(rx.await.unwrap().id(), req.id());
        // Consumed on delivery.
        assert!(pool.retrieve_asynchronous_request(req.id()).is_none());
    }

    #[test]
    fn test_missing_registration_is_an_error() {
        let pool = MessagePool::new();
        let result = pool.take_sync_receiver(ChannelId::new(), 99);
        assert!(matches!(result, Err(CommError::Correlation(_))));
    }

    #[test]
    fn test_mismatched_request_id_is_an_error() {
        let pool = MessagePool::new();
        let channel = ChannelId::new();
        let req = request();
        pool.register_synchronous(channel, &req);
        let result = pool.take_sync_receiver(channel, req.id() + 1);
        assert!(matches!(result, Err(CommError::Correlation(_))));
    }

    #[test]
    fn test_unmatched_response_discarded() {
        let pool = MessagePool::new();
        // Only observable effect is the absence of a panic plus a warning.
        pool.receive_response(Message::empty_response(&request()));
    }

    #[test]
    fn test_reregistration_replaces_stale_entry() {
        let pool = MessagePool::new();
        let channel = ChannelId::new();
        let first = request();
        let second = request();
        pool.register_synchronous(channel, &first);
        pool.register_synchronous(channel, &second);

        assert!(pool.take_sync_receiver(channel, first.id()).is_err());
        assert!(pool.take_sync_receiver(channel, second.id()).is_ok());
    }
}
