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

//! Application protocols: how messages become bytes on a transport.
//!
//! The layer is split in two:
//!
//! - [`WireCodec`] is a sans-IO codec: it encodes a message into a byte
//!   buffer and incrementally decodes messages out of one. Codecs never touch
//!   a transport, which lets the TLS wrapper feed them decrypted plaintext.
//! - [`CommProtocol`] binds a codec to a transport and owns any transfer
//!   state (decode buffers, a TLS engine, ...). Exactly one protocol instance
//!   exists per channel; the channel lock serialises access to it.
//!
//! Protocol instances are produced by [`ProtocolFactory`] implementations
//! registered by name. A factory may declare itself publish-subscribe, in
//! which case outbound channels are obtained from the `pubsubchannel`
//! transport factory instead of the location's scheme.

pub mod codec;
pub mod json;
pub mod stream;
pub mod tls;

pub use codec::WireCodec;
pub use json::{JsonCodec, JsonProtocolFactory};
pub use stream::StreamProtocol;
pub use tls::{SslConfig, TlsProtocol, TlsProtocolFactory};

use crate::location::Location;
use crate::message::Message;
use crate::ports::ProtocolSpec;
use crate::transport::Transport;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while encoding, decoding, or securing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An I/O error from the underlying transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A frame violated the wire format.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// A message body could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A TLS engine failure.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// The protocol configuration is invalid.
    #[error("protocol configuration error: {0}")]
    Configuration(String),

    /// The peer closed the connection in the middle of a message.
    #[error("connection closed mid-message")]
    UnexpectedEof,
}

/// One channel's view of an application protocol.
///
/// `send` and `recv` are only ever invoked under the channel lock, so
/// implementations are free to keep mutable transfer state.
#[async_trait]
pub trait CommProtocol: Send {
    /// Returns the configured protocol name (`json`, `jsons`, ...).
    fn name(&self) -> &str;

    /// Returns `true` if the protocol multiplexes concurrent exchanges on
    /// one channel, correlating responses by message id.
    ///
    /// Non-thread-safe protocols carry request and response sequentially and
    /// are correlated per channel instead.
    fn is_thread_safe(&self) -> bool;

    /// Encodes and writes one message.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the transport write fails.
    async fn send(
        &mut self,
        transport: &dyn Transport,
        message: &Message,
    ) -> Result<(), ProtocolError>;

    /// Reads and decodes exactly one message.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly between
    /// messages.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedEof`] if the connection closed in
    /// the middle of a message, and decoding or I/O errors otherwise.
    async fn recv(
        &mut self,
        transport: &dyn Transport,
    ) -> Result<Option<Message>, ProtocolError>;

    /// Returns `true` if bytes already read from the transport are still
    /// waiting to be decoded.
    ///
    /// Channels with buffered input bypass selector registration and go
    /// straight back to the handler executor.
    fn has_buffered_input(&self) -> bool {
        false
    }
}

/// Factory producing protocol instances for input and output channels.
pub trait ProtocolFactory: Send + Sync {
    /// Returns the protocol name this factory serves.
    fn name(&self) -> &str;

    /// Creates the protocol instance for a server-side channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the port configuration is invalid (for TLS: a
    /// missing or unreadable key store).
    fn create_input_protocol(
        &self,
        spec: &ProtocolSpec,
        location: &Location,
    ) -> Result<Box<dyn CommProtocol>, ProtocolError>;

    /// Creates the protocol instance for a client-side channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the port configuration is invalid.
    fn create_output_protocol(
        &self,
        spec: &ProtocolSpec,
        location: &Location,
    ) -> Result<Box<dyn CommProtocol>, ProtocolError>;

    /// Returns `true` if channels for this protocol come from the
    /// `pubsubchannel` transport factory.
    fn is_pub_sub(&self) -> bool {
        false
    }
}
