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

//! The communication core.
//!
//! [`CommCore`] owns the registries of transport and protocol factories, the
//! listeners, the channel and message pools, the selector array, the handler
//! executor, and the polling loop. Each runtime instance owns exactly one
//! core.
//!
//! # Lifecycle
//!
//! [`init`](CommCore::init) marks the core active, starts the selectors, and
//! issues every listener to start; listeners are not guaranteed to be ready
//! when it returns. [`shutdown`](CommCore::shutdown) stops listeners, joins
//! the selectors, closes the channels of in-flight handlers, drains the
//! handler latch (bounded), and finally aborts any handler that outlived the
//! grace period.
//!
//! # Locking discipline, innermost first
//!
//! 1. the channel lock,
//! 2. the channel-handlers latch (write side is shutdown-only),
//! 3. per-structure mutexes (pools, registries, selector state).
//!
//! No lock order exists across unrelated channels.

mod executor;
mod handler;
mod polling;
mod reactor;

use crate::channel::{ChannelId, ChannelPool, CommChannel, MessagePool};
use crate::context::{current_context, ContextRegistry};
use crate::error::CommError;
use crate::location::Location;
use crate::message::Message;
use crate::ports::{InputPort, OutputPort};
use crate::protocol::{
    CommProtocol, JsonCodec, JsonProtocolFactory, ProtocolFactory, TlsProtocolFactory, WireCodec,
};
use crate::runtime::RuntimeContext;
use crate::transport::{CommListener, SocketTransportFactory, TransportFactory};
use executor::HandlerExecutor;
use parking_lot::Mutex;
use polling::PollingLoop;
use reactor::SelectorSet;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Bound on waiting for in-flight handlers to drain during shutdown.
const CHANNEL_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Construction-time configuration of the core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Upper bound on concurrently running handlers; zero means unbounded.
    pub connections_limit: usize,
    /// Number of selectors; zero means one per hardware thread.
    pub selector_count: usize,
    /// Probe interval of the polling loop.
    pub polling_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            connections_limit: 0,
            selector_count: 0,
            polling_interval: Duration::from_millis(50),
        }
    }
}

/// The communication core of one runtime instance.
pub struct CommCore {
    runtime: Arc<dyn RuntimeContext>,
    active: AtomicBool,
    channel_pool: ChannelPool,
    message_pool: MessagePool,
    request_contexts: ContextRegistry,
    response_contexts: ContextRegistry,
    handlers_latch: RwLock<()>,
    executor: HandlerExecutor,
    selectors: SelectorSet,
    polling: PollingLoop,
    listeners: Mutex<HashMap<String, Arc<dyn CommListener>>>,
    transport_factories: Mutex<HashMap<String, Arc<dyn TransportFactory>>>,
    protocol_factories: Mutex<HashMap<String, Arc<dyn ProtocolFactory>>>,
    active_handlers: Mutex<HashMap<ChannelId, Arc<CommChannel>>>,
    connections_opened: AtomicU64,
}

impl CommCore {
    /// Creates a core owned by `runtime`.
    ///
    /// The `socket` transport and the `json`/`jsons` protocols are registered
    /// here; every other factory resolves lazily through the runtime's
    /// extension loader.
    #[must_use]
    pub fn new(runtime: Arc<dyn RuntimeContext>, config: CoreConfig) -> Arc<Self> {
        let selector_count = if config.selector_count == 0 {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            config.selector_count
        };

        let core = Arc::new(Self {
            runtime,
            active: AtomicBool::new(false),
            channel_pool: ChannelPool::new(),
            message_pool: MessagePool::new(),
            request_contexts: ContextRegistry::new(),
            response_contexts: ContextRegistry::new(),
            handlers_latch: RwLock::new(()),
            executor: HandlerExecutor::new(config.connections_limit),
            selectors: SelectorSet::new(selector_count),
            polling: PollingLoop::new(config.polling_interval),
            listeners: Mutex::new(HashMap::new()),
            transport_factories: Mutex::new(HashMap::new()),
            protocol_factories: Mutex::new(HashMap::new()),
            active_handlers: Mutex::new(HashMap::new()),
            connections_opened: AtomicU64::new(0),
        });

        core.register_transport_factory("socket", Arc::new(SocketTransportFactory));
        core.register_protocol_factory("json", Arc::new(JsonProtocolFactory));
        core.register_protocol_factory(
            "jsons",
            Arc::new(TlsProtocolFactory::new("jsons", || {
                Box::new(JsonCodec::new()) as Box<dyn WireCodec>
            })),
        );
        core
    }

    /// Returns the owning runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn RuntimeContext> {
        &self.runtime
    }

    /// Returns `true` between [`init`](Self::init) and
    /// [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns the message pool.
    #[must_use]
    pub fn message_pool(&self) -> &MessagePool {
        &self.message_pool
    }

    /// Returns the persistent-channel pool.
    #[must_use]
    pub fn channel_pool(&self) -> &ChannelPool {
        &self.channel_pool
    }

    /// Returns the request-side context registry.
    #[must_use]
    pub fn request_contexts(&self) -> &ContextRegistry {
        &self.request_contexts
    }

    /// Returns the response-side context registry.
    #[must_use]
    pub fn response_contexts(&self) -> &ContextRegistry {
        &self.response_contexts
    }

    /// Returns the number of selectors.
    #[must_use]
    pub fn selector_count(&self) -> usize {
        self.selectors.selector_count()
    }

    /// Returns how many outbound connections were opened so far.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    pub(crate) fn count_connection(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handlers_latch(&self) -> &RwLock<()> {
        &self.handlers_latch
    }

    // ---- factory registries -------------------------------------------------

    /// Registers a transport factory under a location scheme.
    pub fn register_transport_factory(&self, name: &str, factory: Arc<dyn TransportFactory>) {
        self.transport_factories
            .lock()
            .insert(name.to_string(), factory);
    }

    /// Registers a protocol factory under a protocol name.
    pub fn register_protocol_factory(&self, name: &str, factory: Arc<dyn ProtocolFactory>) {
        self.protocol_factories
            .lock()
            .insert(name.to_string(), factory);
    }

    /// Resolves the transport factory for a location scheme.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::UnsupportedMedium`] if neither the registry nor
    /// the extension loader knows the scheme.
    pub fn transport_factory(&self, name: &str) -> Result<Arc<dyn TransportFactory>, CommError> {
        if let Some(factory) = self.transport_factories.lock().get(name) {
            return Ok(factory.clone());
        }
        if let Some(factory) = self
            .runtime
            .extensions()
            .and_then(|loader| loader.transport_factory(name))
        {
            self.register_transport_factory(name, factory.clone());
            return Ok(factory);
        }
        Err(CommError::UnsupportedMedium(name.to_string()))
    }

    /// Resolves the protocol factory for a protocol name.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::UnsupportedProtocol`] if neither the registry nor
    /// the extension loader knows the name.
    pub fn protocol_factory(&self, name: &str) -> Result<Arc<dyn ProtocolFactory>, CommError> {
        if let Some(factory) = self.protocol_factories.lock().get(name) {
            return Ok(factory.clone());
        }
        if let Some(factory) = self
            .runtime
            .extensions()
            .and_then(|loader| loader.protocol_factory(name))
        {
            self.register_protocol_factory(name, factory.clone());
            return Ok(factory);
        }
        Err(CommError::UnsupportedProtocol(name.to_string()))
    }

    /// Creates a client-side protocol instance for `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory is unknown or its configuration is
    /// invalid.
    pub fn create_output_protocol(
        &self,
        spec: &crate::ports::ProtocolSpec,
        location: &Location,
    ) -> Result<Box<dyn CommProtocol>, CommError> {
        let factory = self.protocol_factory(spec.name())?;
        factory
            .create_output_protocol(spec, location)
            .map_err(CommError::from)
    }

    /// Creates a server-side protocol instance for `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory is unknown or its configuration is
    /// invalid.
    pub fn create_input_protocol(
        &self,
        spec: &crate::ports::ProtocolSpec,
        location: &Location,
    ) -> Result<Box<dyn CommProtocol>, CommError> {
        let factory = self.protocol_factory(spec.name())?;
        factory
            .create_input_protocol(spec, location)
            .map_err(CommError::from)
    }

    // ---- channels -----------------------------------------------------------

    /// Opens a fresh outbound channel to `location` for `port`.
    ///
    /// Publish-subscribe protocols obtain their channel from the
    /// `pubsubchannel` transport factory instead of the location's scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if no factory matches or the connection fails.
    pub async fn create_output_channel(
        self: &Arc<Self>,
        location: &Location,
        port: &Arc<OutputPort>,
    ) -> Result<Arc<CommChannel>, CommError> {
        let protocol_factory = self.protocol_factory(port.protocol().name())?;
        let transport_factory = if protocol_factory.is_pub_sub() {
            self.transport_factory("pubsubchannel")?
        } else {
            self.transport_factory(location.scheme())?
        };
        transport_factory.create_channel(self, location, port).await
    }

    /// Sends `message` to `location`, acquiring a channel from the pool and
    /// registering the exchange for correlation.
    ///
    /// Returns the channel used. For sequential channels the caller owns it
    /// until [`release_channel`](Self::release_channel) and is expected to
    /// collect the response with
    /// [`recv_response_for`](CommChannel::recv_response_for); thread-safe
    /// channels are released here and their response arrives through the
    /// asynchronous correlation table.
    ///
    /// # Errors
    ///
    /// Returns an error if no channel can be acquired or the send fails; a
    /// failed channel is closed before the error propagates.
    pub async fn send_message(
        self: &Arc<Self>,
        message: &Message,
        location: &Location,
        port: &Arc<OutputPort>,
    ) -> Result<Arc<CommChannel>, CommError> {
        let channel = self.channel_pool.acquire(self, location, port).await?;
        let context = current_context().unwrap_or_else(|| self.runtime.root_context());

        // The message registration is consumed when the request is encoded;
        // the channel registration when the response is decoded.
        self.request_contexts
            .add_context(message.id(), context.clone());
        if channel.is_thread_safe() {
            self.message_pool
                .register_asynchronous(message.id(), message.operation());
            // The response may be decoded on any selector; the registry
            // restores the originating context there.
            self.response_contexts.add_context(message.id(), context);
        } else {
            self.request_contexts.add_context(channel.id(), context);
            self.message_pool
                .register_synchronous(channel.id(), message);
        }

        if let Err(e) = channel.send(message).await {
            let _ = channel.close().await;
            return Err(e);
        }

        if channel.is_thread_safe() {
            self.spawn_response_reader(&channel);
            self.release_channel(&channel).await?;
        }
        Ok(channel)
    }

    /// Waits for the response paired with `request` on `channel`.
    ///
    /// # Errors
    ///
    /// See [`CommChannel::recv_response_for`].
    pub async fn recv_response_for(
        &self,
        channel: &Arc<CommChannel>,
        request: &Message,
    ) -> Result<Message, CommError> {
        channel.recv_response_for(request).await
    }

    /// Delivers a decoded response to the message pool.
    pub fn receive_response(&self, message: Message) {
        self.message_pool.receive_response(message);
    }

    /// Returns the request registered on `channel`, for protocol codecs that
    /// need it while encoding the response.
    #[must_use]
    pub fn retrieve_synchronous_request(&self, channel: &Arc<CommChannel>) -> Option<Message> {
        self.message_pool.retrieve_synchronous_request(channel.id())
    }

    /// Returns the operation name registered for the asynchronous exchange
    /// `id`.
    #[must_use]
    pub fn retrieve_asynchronous_request(&self, id: u64) -> Option<String> {
        self.message_pool.retrieve_asynchronous_request(id)
    }

    /// Releases `channel` back to the pool, or closes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel has no parent output port, or closing
    /// fails.
    pub async fn release_channel(
        self: &Arc<Self>,
        channel: &Arc<CommChannel>,
    ) -> Result<(), CommError> {
        if channel.output_port().is_none() {
            return Err(CommError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot release a channel without an output port",
            )));
        }
        self.channel_pool.release(self, channel).await
    }

    /// One response per in-flight request: reads a single message off a
    /// thread-safe channel and feeds it to the correlation table.
    fn spawn_response_reader(self: &Arc<Self>, channel: &Arc<CommChannel>) {
        let core = self.clone();
        let channel = channel.clone();
        tokio::spawn(async move {
            let received = {
                let mut guard = channel.lock_owned().await;
                channel.recv_locked(&mut guard).await
            };
            match received {
                Ok(Some(response)) => {
                    core.response_contexts().remove_context(response.id());
                    core.receive_response(response);
                }
                Ok(None) => debug!(channel_id = %channel.id(), "channel closed before a response"),
                Err(e) => {
                    debug!(channel_id = %channel.id(), error = %e, "response read failed");
                    let _ = channel.close().await;
                }
            }
        });
    }

    // ---- scheduling ---------------------------------------------------------

    /// Schedules the receiving of one message on `channel`.
    pub fn schedule_receive(self: &Arc<Self>, channel: &Arc<CommChannel>) {
        let core = self.clone();
        let channel = channel.clone();
        self.executor
            .spawn(handler::handle_channel(core, channel));
    }

    /// Runs an asynchronous task in the core's handler pool.
    pub fn execute<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.executor.spawn(future);
    }

    /// Registers `channel` with a selector for read readiness.
    ///
    /// A channel whose protocol already holds buffered input bypasses the
    /// selector and goes straight to the handler executor.
    pub(crate) fn register_for_selection(self: &Arc<Self>, channel: &Arc<CommChannel>) {
        if channel.has_buffered_input() {
            self.schedule_receive(channel);
            return;
        }
        self.selectors.register(channel.clone());
    }

    pub(crate) fn unregister_for_selection(&self, channel: &Arc<CommChannel>) {
        self.selectors.unregister(channel);
    }

    /// Registers `channel` with the polling loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel's transport exposes no polling probe.
    pub fn register_for_polling(
        self: &Arc<Self>,
        channel: &Arc<CommChannel>,
    ) -> Result<(), CommError> {
        self.polling.register(self, channel.clone())
    }

    pub(crate) fn track_handler(&self, channel: &Arc<CommChannel>) {
        self.active_handlers
            .lock()
            .insert(channel.id(), channel.clone());
    }

    pub(crate) fn untrack_handler(&self, channel: &Arc<CommChannel>) {
        self.active_handlers.lock().remove(&channel.id());
    }

    // ---- ports and lifecycle ------------------------------------------------

    /// Adds an input port, creating its listener. Not thread-safe with
    /// respect to [`init`](Self::init).
    ///
    /// # Errors
    ///
    /// Returns an error if no factory matches the port's protocol or medium.
    pub fn add_input_port(self: &Arc<Self>, port: InputPort) -> Result<(), CommError> {
        let protocol_factory = self.protocol_factory(port.protocol().name())?;
        let medium = if protocol_factory.is_pub_sub() {
            "pubsubchannel".to_string()
        } else {
            port.location().scheme().to_string()
        };
        let transport_factory = self.transport_factory(&medium)?;
        let port = Arc::new(port);
        let listener = transport_factory.create_listener(self, protocol_factory, port.clone())?;
        self.listeners
            .lock()
            .insert(port.name().to_string(), listener);
        Ok(())
    }

    /// Returns the listener serving the named input port.
    #[must_use]
    pub fn listener(&self, input_port_name: &str) -> Option<Arc<dyn CommListener>> {
        self.listeners.lock().get(input_port_name).cloned()
    }

    /// Initializes the core: marks it active, starts the selectors, and
    /// issues every listener to start.
    ///
    /// Listeners are not guaranteed to be ready to accept when this returns;
    /// readiness is observable only by successful connects.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener cannot be issued to start.
    pub async fn init(self: &Arc<Self>) -> Result<(), CommError> {
        self.active.store(true, Ordering::Release);
        self.selectors.start(self);
        let listeners: Vec<_> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener.start().await?;
        }
        info!("communication core started");
        Ok(())
    }

    /// Shuts the core down.
    ///
    /// Listeners stop first, then the selectors are woken and joined. The
    /// channels of in-flight handlers are closed, which unparks blocked
    /// receives; the channel-handlers latch is then drained for up to five
    /// seconds, and the executor gets the persistent-connection timeout to
    /// terminate before stragglers are aborted.
    pub async fn shutdown(self: &Arc<Self>) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("communication core shutting down");

        let listeners: Vec<_> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener.shutdown().await;
        }

        self.selectors.shutdown().await;

        let in_flight: Vec<_> = self.active_handlers.lock().values().cloned().collect();
        for channel in in_flight {
            let _ = channel.close().await;
        }

        match tokio::time::timeout(CHANNEL_HANDLER_TIMEOUT, self.handlers_latch.write()).await {
            Ok(_latch) => {}
            Err(_) => warn!(
                "handlers did not drain within {:?}",
                CHANNEL_HANDLER_TIMEOUT
            ),
        }

        self.executor.begin_shutdown();
        let grace = self.runtime.persistent_connection_timeout();
        if !self.executor.wait_idle(grace).await {
            warn!(
                active = self.executor.active_count(),
                "aborting handlers that outlived the termination grace period"
            );
            self.executor.abort_all();
        }

        self.polling.shutdown().await;
        info!("communication core stopped");
    }
}
