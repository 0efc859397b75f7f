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

//! Transport layer: byte streams below the protocol codecs.
//!
//! A [`Transport`] is a bi-directional byte stream with `&self` I/O, so that
//! readiness can be observed by a selector while the channel's logical lock is
//! held elsewhere. Reads race an internal close signal, which is how closing
//! a channel unblocks a handler parked in a receive.
//!
//! Transports are produced by [`TransportFactory`] implementations, looked up
//! by location scheme. The `socket` factory is registered at construction;
//! any other scheme resolves lazily through the runtime's extension loader.

mod error;
pub mod memory;
pub mod tcp;

pub use error::TransportError;
pub use memory::MemoryTransport;
pub use tcp::{SocketTransportFactory, TcpCommListener, TcpTransport};

use crate::channel::CommChannel;
use crate::core::CommCore;
use crate::error::CommError;
use crate::location::Location;
use crate::ports::{InputPort, OutputPort};
use crate::protocol::ProtocolFactory;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;

/// Connection metadata exposed by every transport.
#[derive(Debug, Clone)]
pub struct TransportInfo {
    /// Scheme of the factory that produced this transport (`socket`, ...).
    pub scheme: &'static str,
    /// Local address, if the transport has one.
    pub local_addr: Option<String>,
    /// Peer address, if the transport has one.
    pub peer_addr: Option<String>,
}

impl TransportInfo {
    /// Creates metadata for the given scheme with no addresses.
    #[must_use]
    pub fn new(scheme: &'static str) -> Self {
        Self {
            scheme,
            local_addr: None,
            peer_addr: None,
        }
    }
}

/// A bi-directional byte stream.
///
/// All methods take `&self`: the channel's mutual-exclusion protocol lives in
/// the channel lock, not in the transport, and the selector needs to await
/// [`readable`](Transport::readable) without holding that lock.
///
/// # Contract
///
/// - `read` returns `Ok(0)` exactly when the peer has closed the stream.
/// - After [`shutdown`](Transport::shutdown), pending and future reads fail
///   with [`io::ErrorKind::ConnectionAborted`]; this is the cancellation
///   mechanism for blocked receives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns metadata about this transport.
    fn info(&self) -> &TransportInfo;

    /// Waits until at least one byte can be read, or the stream reached end
    /// of file, or the transport was shut down (an error).
    async fn readable(&self) -> io::Result<()>;

    /// Reads into `buf`, waiting for data if none is buffered.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `buf`.
    async fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Shuts the transport down, waking any blocked reader.
    async fn shutdown(&self) -> io::Result<()>;

    /// Returns `true` if a selector can watch this transport for readiness.
    ///
    /// Transports that return `false` are driven by the polling loop instead,
    /// provided they expose [`as_pollable`](Transport::as_pollable).
    fn is_selectable(&self) -> bool {
        true
    }

    /// Returns the polling view of this transport, if it has one.
    fn as_pollable(&self) -> Option<&dyn PollableTransport> {
        None
    }
}

/// Readiness probe for transports that can be neither selected nor read with
/// a blocking call.
pub trait PollableTransport: Send + Sync {
    /// Returns `true` if a read would currently make progress.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the transport is broken; the polling loop
    /// removes and closes the channel in that case.
    fn is_ready(&self) -> io::Result<bool>;
}

/// Factory for outbound channels and inbound listeners, registered per
/// location scheme.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates an outbound channel to `location` on behalf of `port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the port's
    /// protocol cannot be instantiated.
    async fn create_channel(
        &self,
        core: &Arc<CommCore>,
        location: &Location,
        port: &Arc<OutputPort>,
    ) -> Result<Arc<CommChannel>, CommError>;

    /// Creates a listener for `input_port`, decoding with protocols from
    /// `protocol_factory`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be constructed. Binding
    /// happens later, in [`CommListener::start`].
    fn create_listener(
        &self,
        core: &Arc<CommCore>,
        protocol_factory: Arc<dyn ProtocolFactory>,
        input_port: Arc<InputPort>,
    ) -> Result<Arc<dyn CommListener>, CommError>;
}

/// An inbound connection acceptor bound to one input port.
#[async_trait]
pub trait CommListener: Send + Sync {
    /// Binds the listener and starts accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be bound.
    async fn start(self: Arc<Self>) -> Result<(), CommError>;

    /// Stops accepting connections.
    async fn shutdown(&self);

    /// Returns the actually bound location, once started.
    ///
    /// Useful when the configured location requested an ephemeral port.
    fn local_location(&self) -> Option<Location>;

    /// Returns the input port this listener serves.
    fn input_port(&self) -> &Arc<InputPort>;
}
