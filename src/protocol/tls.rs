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

//! TLS wrapper protocol.
//!
//! [`TlsProtocol`] layers transport security over any inner [`WireCodec`] by
//! driving the sans-IO `rustls` engine directly against the transport SPI:
//! when the engine wants to write, pending ciphertext is flushed; when it
//! wants to read, a chunk is pulled from the transport and processed.
//! Decrypted plaintext accumulates in a buffer that the inner codec decodes
//! from, so the inner codec never sees ciphertext and the transport never
//! sees plaintext.
//!
//! Exactly one of sending, receiving, or handshaking is active per channel at
//! a time; the channel lock enforces this.
//!
//! # Configuration
//!
//! Ports configure TLS through `ssl.*` keys in their protocol configuration,
//! see [`SslConfig`]. Protocol versions default to TLS 1.2 and newer; the
//! legacy `SSLv3` default of older runtimes is rejected outright. Key
//! material is PEM: `ssl.keyStore` names a file containing the certificate
//! chain followed by the private key and is mandatory in server mode.
//! `ssl.trustStore` defaults to the platform trust store.

use crate::location::Location;
use crate::message::Message;
use crate::ports::ProtocolSpec;
use crate::protocol::codec::WireCodec;
use crate::protocol::{CommProtocol, ProtocolError, ProtocolFactory};
use crate::transport::Transport;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConnection, Connection, RootCertStore, ServerConnection};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

const TLS_READ_CHUNK: usize = 16 * 1024;

/// TLS settings read from a port's `ssl.*` protocol configuration.
#[derive(Debug, Clone, Default)]
pub struct SslConfig {
    /// Requested protocol versions (`TLSv1.2+`, `TLSv1.2`, `TLSv1.3`).
    pub protocol: Option<String>,
    /// PEM file holding the certificate chain followed by the private key.
    pub key_store: Option<PathBuf>,
    /// Key store format; only `PEM` is supported.
    pub key_store_format: Option<String>,
    /// Password of the key store; encrypted key stores are not supported.
    pub key_store_password: Option<String>,
    /// PEM file holding trusted root certificates; defaults to the platform
    /// trust store.
    pub trust_store: Option<PathBuf>,
    /// Trust store format; only `PEM` is supported.
    pub trust_store_format: Option<String>,
    /// Password of the trust store; encrypted trust stores are not supported.
    pub trust_store_password: Option<String>,
}

impl SslConfig {
    /// Reads the `ssl.*` keys out of a protocol configuration map.
    #[must_use]
    pub fn from_protocol_config(config: &HashMap<String, String>) -> Self {
        let get = |key: &str| config.get(key).cloned();
        Self {
            protocol: get("ssl.protocol"),
            key_store: get("ssl.keyStore").map(PathBuf::from),
            key_store_format: get("ssl.keyStoreFormat"),
            key_store_password: get("ssl.keyStorePassword"),
            trust_store: get("ssl.trustStore").map(PathBuf::from),
            trust_store_format: get("ssl.trustStoreFormat"),
            trust_store_password: get("ssl.trustStorePassword"),
        }
    }

    fn protocol_versions(
        &self,
    ) -> Result<&'static [&'static rustls::SupportedProtocolVersion], ProtocolError> {
        match self.protocol.as_deref() {
            None | Some("TLSv1.2+") => Ok(rustls::ALL_VERSIONS),
            Some("TLSv1.2") => {
                const V: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS12];
                Ok(V)
            }
            Some("TLSv1.3") => {
                const V: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];
                Ok(V)
            }
            Some(legacy @ ("SSLv3" | "TLSv1" | "TLSv1.1")) => {
                Err(ProtocolError::Configuration(format!(
                    "ssl.protocol {legacy} is no longer supported; use TLSv1.2 or newer"
                )))
            }
            Some(other) => Err(ProtocolError::Configuration(format!(
                "unknown ssl.protocol {other}"
            ))),
        }
    }

    fn check_store_format(&self, format: Option<&str>, key: &str) -> Result<(), ProtocolError> {
        match format {
            None | Some("PEM") => Ok(()),
            Some(other) => Err(ProtocolError::Configuration(format!(
                "{key} {other} is not supported; provide PEM material"
            ))),
        }
    }

    fn check_no_passwords(&self) -> Result<(), ProtocolError> {
        if self.key_store_password.is_some() || self.trust_store_password.is_some() {
            return Err(ProtocolError::Configuration(
                "encrypted key and trust stores are not supported; provide unencrypted PEM"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn root_store(&self) -> Result<RootCertStore, ProtocolError> {
        self.check_store_format(self.trust_store_format.as_deref(), "ssl.trustStoreFormat")?;
        let mut roots = RootCertStore::empty();
        if let Some(path) = &self.trust_store {
            let pem = std::fs::read(path)?;
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                roots.add(cert?)?;
            }
        } else {
            for cert in rustls_native_certs::load_native_certs()
                .map_err(|e| ProtocolError::Configuration(e.to_string()))?
            {
                roots.add(cert)?;
            }
        }
        Ok(roots)
    }

    fn build_client(&self, location: &Location) -> Result<ClientConnection, ProtocolError> {
        self.check_no_passwords()?;
        let versions = self.protocol_versions()?;
        let config = rustls::ClientConfig::builder_with_protocol_versions(versions)
            .with_root_certificates(self.root_store()?)
            .with_no_client_auth();
        let server_name = ServerName::try_from(location.host().to_string())
            .map_err(|e| ProtocolError::Configuration(format!("invalid server name: {e}")))?;
        Ok(ClientConnection::new(Arc::new(config), server_name)?)
    }

    fn build_server(&self) -> Result<ServerConnection, ProtocolError> {
        self.check_no_passwords()?;
        self.check_store_format(self.key_store_format.as_deref(), "ssl.keyStoreFormat")?;
        let versions = self.protocol_versions()?;
        let key_store = self.key_store.as_ref().ok_or_else(|| {
            ProtocolError::Configuration("ssl.keyStore is mandatory in server mode".to_string())
        })?;
        let pem = std::fs::read(key_store)?;
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<Vec<_>, _>>()?;
        let key = rustls_pemfile::private_key(&mut pem.as_slice())?.ok_or_else(|| {
            ProtocolError::Configuration(format!(
                "no private key found in {}",
                key_store.display()
            ))
        })?;
        let config = rustls::ServerConfig::builder_with_protocol_versions(versions)
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(ServerConnection::new(Arc::new(config))?)
    }
}

/// TLS state machine wrapping an inner wire codec.
pub struct TlsProtocol {
    name: String,
    codec: Box<dyn WireCodec>,
    conn: Connection,
    plain_buf: Vec<u8>,
}

impl TlsProtocol {
    /// Creates the client side of the wrapper, connecting to `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration is invalid or the trust
    /// store cannot be loaded.
    pub fn client(
        name: impl Into<String>,
        codec: Box<dyn WireCodec>,
        config: &SslConfig,
        location: &Location,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: name.into(),
            codec,
            conn: Connection::Client(config.build_client(location)?),
            plain_buf: Vec::new(),
        })
    }

    /// Creates the server side of the wrapper.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration is invalid; `ssl.keyStore`
    /// is mandatory here.
    pub fn server(
        name: impl Into<String>,
        codec: Box<dyn WireCodec>,
        config: &SslConfig,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: name.into(),
            codec,
            conn: Connection::Server(config.build_server()?),
            plain_buf: Vec::new(),
        })
    }

    /// Writes any ciphertext the engine has pending.
    async fn flush_tls(&mut self, transport: &dyn Transport) -> Result<(), ProtocolError> {
        while self.conn.wants_write() {
            let mut out = Vec::new();
            self.conn.write_tls(&mut out)?;
            if out.is_empty() {
                break;
            }
            transport.write_all(&out).await?;
        }
        Ok(())
    }

    /// Reads one ciphertext chunk, processes it, and drains new plaintext.
    ///
    /// Returns the number of transport bytes consumed; zero means end of
    /// file.
    async fn read_tls_once(&mut self, transport: &dyn Transport) -> Result<usize, ProtocolError> {
        let mut chunk = [0u8; TLS_READ_CHUNK];
        let n = transport.read(&mut chunk).await?;
        if n == 0 {
            return Ok(0);
        }
        let mut slice = &chunk[..n];
        while !slice.is_empty() {
            if self.conn.read_tls(&mut slice)? == 0 {
                break;
            }
            self.conn.process_new_packets()?;
        }
        self.drain_plaintext()?;
        Ok(n)
    }

    fn drain_plaintext(&mut self) -> Result<(), ProtocolError> {
        let mut chunk = [0u8; TLS_READ_CHUNK];
        loop {
            match self.conn.reader().read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.plain_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Drives the handshake to completion.
    ///
    /// Dispatches on what the engine needs next: pending ciphertext is
    /// flushed, wanted input is read and processed. Delegated crypto work
    /// runs inside the engine itself.
    async fn complete_handshake(&mut self, transport: &dyn Transport) -> Result<(), ProtocolError> {
        while self.conn.is_handshaking() {
            if self.conn.wants_write() {
                self.flush_tls(transport).await?;
                continue;
            }
            if self.conn.wants_read() {
                if self.read_tls_once(transport).await? == 0 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                continue;
            }
            break;
        }
        // The final flight may still be buffered once the engine reports the
        // handshake as done.
        self.flush_tls(transport).await?;
        trace!(protocol = %self.name, "tls handshake complete");
        Ok(())
    }
}

#[async_trait]
impl CommProtocol for TlsProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_thread_safe(&self) -> bool {
        self.codec.is_thread_safe()
    }

    async fn send(
        &mut self,
        transport: &dyn Transport,
        message: &Message,
    ) -> Result<(), ProtocolError> {
        if self.conn.is_handshaking() {
            self.complete_handshake(transport).await?;
        }
        let mut plain = Vec::new();
        self.codec.encode(message, &mut plain)?;
        self.conn.writer().write_all(&plain)?;
        self.flush_tls(transport).await
    }

    async fn recv(
        &mut self,
        transport: &dyn Transport,
    ) -> Result<Option<Message>, ProtocolError> {
        if self.conn.is_handshaking() {
            self.complete_handshake(transport).await?;
        }
        loop {
            if let Some(message) = self.codec.decode(&mut self.plain_buf)? {
                return Ok(Some(message));
            }
            if self.read_tls_once(transport).await? == 0 {
                return if self.plain_buf.is_empty() {
                    Ok(None)
                } else {
                    Err(ProtocolError::UnexpectedEof)
                };
            }
        }
    }

    fn has_buffered_input(&self) -> bool {
        !self.plain_buf.is_empty()
    }
}

/// Factory wrapping an inner codec with TLS.
///
/// `make_codec` produces a fresh inner codec per channel, mirroring how the
/// plain factories work.
pub struct TlsProtocolFactory<F>
where
    F: Fn() -> Box<dyn WireCodec> + Send + Sync,
{
    name: String,
    make_codec: F,
}

impl<F> TlsProtocolFactory<F>
where
    F: Fn() -> Box<dyn WireCodec> + Send + Sync,
{
    /// Creates a factory registered under `name`.
    pub fn new(name: impl Into<String>, make_codec: F) -> Self {
        Self {
            name: name.into(),
            make_codec,
        }
    }
}

impl<F> ProtocolFactory for TlsProtocolFactory<F>
where
    F: Fn() -> Box<dyn WireCodec> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create_input_protocol(
        &self,
        spec: &ProtocolSpec,
        _location: &Location,
    ) -> Result<Box<dyn CommProtocol>, ProtocolError> {
        let ssl = SslConfig::from_protocol_config(spec.config());
        Ok(Box::new(TlsProtocol::server(
            self.name.clone(),
            (self.make_codec)(),
            &ssl,
        )?))
    }

    fn create_output_protocol(
        &self,
        spec: &ProtocolSpec,
        location: &Location,
    ) -> Result<Box<dyn CommProtocol>, ProtocolError> {
        let ssl = SslConfig::from_protocol_config(spec.config());
        Ok(Box::new(TlsProtocol::client(
            self.name.clone(),
            (self.make_codec)(),
            &ssl,
            location,
        )?))
    }
}
