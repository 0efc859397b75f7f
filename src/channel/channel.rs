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

//! The channel: one communication endpoint.
//!
//! A [`CommChannel`] combines a transport with a protocol instance and the
//! channel lock that serialises them. While a handler holds the lock, no
//! other handler can send or receive on the channel; the selector and the
//! persistent-channel pool only ever try-lock it.
//!
//! Channels act in one of three roles: server side (with a parent input
//! port), client side (with a parent output port), or forwarder (with a
//! redirection partner), in which case inbound data is the response to a
//! bridged request.

use crate::channel::id::ChannelId;
use crate::core::CommCore;
use crate::error::CommError;
use crate::location::Location;
use crate::message::Message;
use crate::ports::{InputPort, OutputPort};
use crate::protocol::CommProtocol;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::debug;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Usable for sends and receives.
    Open,
    /// Close initiated; operations fail with `ChannelClosing`.
    Closing,
    /// Fully closed.
    Closed,
}

/// Mutable protocol-side state, guarded by the channel lock.
pub struct ProtocolState {
    pub(crate) protocol: Box<dyn CommProtocol>,
}

struct TimeoutHandle {
    task: JoinHandle<()>,
}

struct ChannelMeta {
    state: ChannelState,
    to_be_closed: bool,
    redirection: Option<(Arc<CommChannel>, u64)>,
    timeout: Option<TimeoutHandle>,
    timeout_serial: u64,
    selector_index: Option<usize>,
}

/// One communication endpoint.
pub struct CommChannel {
    id: ChannelId,
    location: Location,
    protocol_name: String,
    thread_safe: bool,
    core: Weak<CommCore>,
    transport: Arc<dyn Transport>,
    lock: Arc<tokio::sync::Mutex<ProtocolState>>,
    meta: Mutex<ChannelMeta>,
    input_port: Option<Arc<InputPort>>,
    output_port: Option<Arc<OutputPort>>,
}

impl CommChannel {
    fn new(
        core: &Arc<CommCore>,
        transport: Arc<dyn Transport>,
        protocol: Box<dyn CommProtocol>,
        location: Location,
        protocol_name: String,
        keep_alive: bool,
        input_port: Option<Arc<InputPort>>,
        output_port: Option<Arc<OutputPort>>,
    ) -> Arc<Self> {
        let thread_safe = protocol.is_thread_safe();
        Arc::new(Self {
            id: ChannelId::new(),
            location,
            protocol_name,
            thread_safe,
            core: Arc::downgrade(core),
            transport,
            lock: Arc::new(tokio::sync::Mutex::new(ProtocolState { protocol })),
            meta: Mutex::new(ChannelMeta {
                state: ChannelState::Open,
                to_be_closed: !keep_alive,
                redirection: None,
                timeout: None,
                timeout_serial: 0,
                selector_index: None,
            }),
            input_port,
            output_port,
        })
    }

    /// Creates a server-side channel accepted for `port`.
    pub fn for_input(
        core: &Arc<CommCore>,
        transport: Arc<dyn Transport>,
        protocol: Box<dyn CommProtocol>,
        port: Arc<InputPort>,
    ) -> Arc<Self> {
        Self::new(
            core,
            transport,
            protocol,
            port.location().clone(),
            port.protocol().name().to_string(),
            port.protocol().keep_alive(),
            Some(port),
            None,
        )
    }

    /// Creates a client-side channel connected to `location` for `port`.
    pub fn for_output(
        core: &Arc<CommCore>,
        transport: Arc<dyn Transport>,
        protocol: Box<dyn CommProtocol>,
        location: Location,
        port: Arc<OutputPort>,
    ) -> Arc<Self> {
        let protocol_name = port.protocol().name().to_string();
        let keep_alive = port.protocol().keep_alive();
        Self::new(
            core,
            transport,
            protocol,
            location,
            protocol_name,
            keep_alive,
            None,
            Some(port),
        )
    }

    /// Returns the channel identity.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Returns the remote (client side) or listening (server side) location.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns the configured protocol name.
    #[must_use]
    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    /// Returns `true` if the protocol multiplexes concurrent exchanges.
    #[must_use]
    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.meta.lock().state
    }

    /// Returns `true` if the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Returns `true` if the channel must be closed once the current
    /// operation completes.
    #[must_use]
    pub fn to_be_closed(&self) -> bool {
        self.meta.lock().to_be_closed
    }

    /// Sets the to-be-closed flag.
    pub fn set_to_be_closed(&self, to_be_closed: bool) {
        self.meta.lock().to_be_closed = to_be_closed;
    }

    /// Returns the parent input port, for server-side channels.
    #[must_use]
    pub fn input_port(&self) -> Option<&Arc<InputPort>> {
        self.input_port.as_ref()
    }

    /// Returns the parent output port, for client-side channels.
    #[must_use]
    pub fn output_port(&self) -> Option<&Arc<OutputPort>> {
        self.output_port.as_ref()
    }

    /// Returns the underlying transport.
    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        &*self.transport
    }

    /// Marks this channel as a forwarder bridging back to `partner`, where
    /// `message_id` is the id the bridged response must be rewritten to.
    pub fn set_redirection(&self, redirection: Option<(Arc<CommChannel>, u64)>) {
        self.meta.lock().redirection = redirection;
    }

    /// Returns the redirection partner and message id, if this channel is a
    /// forwarder.
    #[must_use]
    pub fn redirection(&self) -> Option<(Arc<CommChannel>, u64)> {
        self.meta.lock().redirection.clone()
    }

    /// Returns the selector this channel was last assigned to.
    #[must_use]
    pub fn selector_index(&self) -> Option<usize> {
        self.meta.lock().selector_index
    }

    pub(crate) fn set_selector_index(&self, index: Option<usize>) {
        self.meta.lock().selector_index = index;
    }

    /// Acquires the channel lock.
    pub async fn lock_owned(self: &Arc<Self>) -> OwnedMutexGuard<ProtocolState> {
        self.lock.clone().lock_owned().await
    }

    /// Acquires the channel lock without waiting.
    #[must_use]
    pub fn try_lock_owned(self: &Arc<Self>) -> Option<OwnedMutexGuard<ProtocolState>> {
        self.lock.clone().try_lock_owned().ok()
    }

    /// Sends one message, acquiring the channel lock.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::ChannelClosing`] if the channel is no longer
    /// open, and I/O or codec errors otherwise.
    pub async fn send(self: &Arc<Self>, message: &Message) -> Result<(), CommError> {
        let mut guard = self.lock_owned().await;
        self.send_locked(&mut guard, message).await
    }

    /// Sends one message under an already-held channel lock.
    pub(crate) async fn send_locked(
        &self,
        state: &mut ProtocolState,
        message: &Message,
    ) -> Result<(), CommError> {
        if self.state() != ChannelState::Open {
            return Err(CommError::ChannelClosing);
        }
        state
            .protocol
            .send(&*self.transport, message)
            .await
            .map_err(CommError::from)
    }

    /// Receives one message, acquiring the channel lock.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::ChannelClosing`] if the channel was closed
    /// locally, and I/O or codec errors otherwise.
    pub async fn recv(self: &Arc<Self>) -> Result<Option<Message>, CommError> {
        let mut guard = self.lock_owned().await;
        self.recv_locked(&mut guard).await
    }

    /// Receives one message under an already-held channel lock.
    pub(crate) async fn recv_locked(
        &self,
        state: &mut ProtocolState,
    ) -> Result<Option<Message>, CommError> {
        if self.state() != ChannelState::Open {
            return Err(CommError::ChannelClosing);
        }
        match state.protocol.recv(&*self.transport).await {
            Ok(message) => Ok(message),
            Err(e) => {
                // A local close surfaces as an aborted read; report the race,
                // not the I/O error.
                if self.state() != ChannelState::Open {
                    Err(CommError::ChannelClosing)
                } else {
                    Err(CommError::from(e))
                }
            }
        }
    }

    /// Waits for the response paired with `request`.
    ///
    /// For thread-safe channels this consults the asynchronous correlation
    /// table. For sequential channels it decodes messages off this channel,
    /// feeding the message pool, until the registered response arrives.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::Correlation`] if no registration exists for the
    /// request, or if the connection fails before the response arrives.
    pub async fn recv_response_for(self: &Arc<Self>, request: &Message) -> Result<Message, CommError> {
        let core = self.core()?;
        let pool = core.message_pool();
        if self.thread_safe {
            let rx = pool.take_async_receiver(request.id()).ok_or_else(|| {
                CommError::Correlation(format!(
                    "no pending request with id {} on this channel",
                    request.id()
                ))
            })?;
            return rx.await.map_err(|_| {
                CommError::Correlation("request cancelled before a response arrived".to_string())
            });
        }

        let mut rx = pool.take_sync_receiver(self.id, request.id())?;
        loop {
            match rx.try_recv() {
                Ok(response) => {
                    pool.discard_synchronous(self.id);
                    return Ok(response);
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => {
                    pool.discard_synchronous(self.id);
                    return Err(CommError::Correlation(
                        "request cancelled before a response arrived".to_string(),
                    ));
                }
            }
            let message = {
                let mut guard = self.lock_owned().await;
                self.recv_locked(&mut guard).await
            };
            match message {
                Ok(Some(response)) => core.receive_response(response),
                Ok(None) => {
                    pool.discard_synchronous(self.id);
                    return Err(CommError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed while awaiting a response",
                    )));
                }
                Err(e) => {
                    pool.discard_synchronous(self.id);
                    return Err(e);
                }
            }
        }
    }

    /// Returns the channel to the selector or polling loop, or closes it if
    /// it is marked to-be-closed.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the transport fails.
    pub async fn dispose_for_input(self: &Arc<Self>) -> Result<(), CommError> {
        if self.to_be_closed() {
            return self.close().await;
        }
        let Some(core) = self.core.upgrade() else {
            return self.close().await;
        };
        if self.transport.is_selectable() {
            core.register_for_selection(self);
            Ok(())
        } else if self.transport.as_pollable().is_some() {
            core.register_for_polling(self)
        } else {
            self.close().await
        }
    }

    /// Closes the channel, waking any blocked receive.
    ///
    /// # Errors
    ///
    /// Returns an error if shutting the transport down fails; the channel is
    /// marked closed regardless.
    pub async fn close(self: &Arc<Self>) -> Result<(), CommError> {
        {
            let mut meta = self.meta.lock();
            if meta.state == ChannelState::Closed {
                return Ok(());
            }
            meta.state = ChannelState::Closing;
            if let Some(timeout) = meta.timeout.take() {
                timeout.task.abort();
            }
            meta.timeout_serial += 1;
        }
        if let Some(core) = self.core.upgrade() {
            core.unregister_for_selection(self);
        }
        let result = self.transport.shutdown().await;
        self.meta.lock().state = ChannelState::Closed;
        debug!(channel_id = %self.id, "channel closed");
        result.map_err(CommError::from)
    }

    /// Invalidates any scheduled idle timeout and reserves a new serial.
    ///
    /// A timeout task fires only while its serial is still the channel's
    /// current one, which makes late firings no-ops.
    pub(crate) fn arm_timeout(&self) -> u64 {
        let mut meta = self.meta.lock();
        if let Some(timeout) = meta.timeout.take() {
            timeout.task.abort();
        }
        meta.timeout_serial += 1;
        meta.timeout_serial
    }

    pub(crate) fn attach_timeout_task(&self, serial: u64, task: JoinHandle<()>) {
        let mut meta = self.meta.lock();
        if meta.timeout_serial == serial {
            meta.timeout = Some(TimeoutHandle { task });
        } else {
            task.abort();
        }
    }

    /// Clears any scheduled idle timeout, so the channel is no longer
    /// evictable by time.
    pub(crate) fn clear_timeout(&self) {
        let mut meta = self.meta.lock();
        if let Some(timeout) = meta.timeout.take() {
            timeout.task.abort();
        }
        meta.timeout_serial += 1;
    }

    pub(crate) fn timeout_current(&self, serial: u64) -> bool {
        self.meta.lock().timeout_serial == serial
    }

    /// Returns `true` if bytes already pulled from the transport are waiting
    /// to be decoded. Only meaningful when the channel lock is free.
    pub(crate) fn has_buffered_input(self: &Arc<Self>) -> bool {
        self.try_lock_owned()
            .is_some_and(|guard| guard.protocol.has_buffered_input())
    }

    fn core(&self) -> Result<Arc<CommCore>, CommError> {
        self.core.upgrade().ok_or(CommError::ChannelClosing)
    }
}

impl fmt::Debug for CommChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommChannel")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("protocol", &self.protocol_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
