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

//! The built-in `socket` transport: TCP streams and the TCP listener.
//!
//! I/O uses the readiness pattern (`readable`/`try_read`) so that all
//! operations work through `&self`, and every wait races the transport's
//! close signal. Closing the channel therefore unblocks a handler that is
//! parked in a receive, which the shutdown sequence relies on.

use crate::channel::CommChannel;
use crate::core::CommCore;
use crate::error::CommError;
use crate::location::Location;
use crate::ports::{InputPort, OutputPort};
use crate::protocol::ProtocolFactory;
use crate::transport::{
    CommListener, Transport, TransportError, TransportFactory, TransportInfo,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// TCP transport over a Tokio [`TcpStream`].
pub struct TcpTransport {
    stream: TcpStream,
    info: TransportInfo,
    closed: AtomicBool,
    close_notify: Notify,
}

impl TcpTransport {
    /// Connects to `authority` (a `host:port` pair).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the connection cannot be
    /// established.
    pub async fn connect(authority: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(authority)
            .await
            .map_err(|source| TransportError::Connect {
                address: authority.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        Self::from_stream(stream).map_err(TransportError::from)
    }

    /// Wraps an already-connected stream, typically one just accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket's addresses cannot be queried.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let mut info = TransportInfo::new("socket");
        info.local_addr = Some(stream.local_addr()?.to_string());
        info.peer_addr = Some(stream.peer_addr()?.to_string());
        Ok(Self {
            stream,
            info,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        })
    }

    /// Resolves only once the transport has been shut down locally.
    async fn wait_closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, "transport closed")
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn info(&self) -> &TransportInfo {
        &self.info
    }

    async fn readable(&self) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::closed_error());
        }
        tokio::select! {
            () = self.wait_closed() => Err(Self::closed_error()),
            result = self.stream.readable() => result,
        }
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            self.readable().await?;
            match self.stream.try_read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            if self.closed.load(Ordering::Acquire) {
                return Err(Self::closed_error());
            }
            tokio::select! {
                () = self.wait_closed() => return Err(Self::closed_error()),
                result = self.stream.writable() => result?,
            }
            match self.stream.try_write(&buf[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> io::Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.close_notify.notify_waiters();
        }
        Ok(())
    }
}

/// Transport factory for the built-in `socket` scheme.
pub struct SocketTransportFactory;

#[async_trait]
impl TransportFactory for SocketTransportFactory {
    async fn create_channel(
        &self,
        core: &Arc<CommCore>,
        location: &Location,
        port: &Arc<OutputPort>,
    ) -> Result<Arc<CommChannel>, CommError> {
        let transport = TcpTransport::connect(location.authority()).await?;
        let protocol = core.create_output_protocol(port.protocol(), location)?;
        core.count_connection();
        debug!(
            location = %location,
            peer = transport.info().peer_addr.as_deref().unwrap_or("?"),
            "opened outbound socket channel"
        );
        Ok(CommChannel::for_output(
            core,
            Arc::new(transport),
            protocol,
            location.clone(),
            port.clone(),
        ))
    }

    fn create_listener(
        &self,
        core: &Arc<CommCore>,
        protocol_factory: Arc<dyn ProtocolFactory>,
        input_port: Arc<InputPort>,
    ) -> Result<Arc<dyn CommListener>, CommError> {
        Ok(Arc::new(TcpCommListener {
            core: Arc::downgrade(core),
            protocol_factory,
            input_port,
            state: Mutex::new(ListenerState::default()),
            shutting_down: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }))
    }
}

#[derive(Default)]
struct ListenerState {
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

/// Listener accepting TCP connections for one input port.
pub struct TcpCommListener {
    core: Weak<CommCore>,
    protocol_factory: Arc<dyn ProtocolFactory>,
    input_port: Arc<InputPort>,
    state: Mutex<ListenerState>,
    shutting_down: AtomicBool,
    shutdown_notify: Notify,
}

impl TcpCommListener {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                () = self.shutdown_notify.notified() => break,
                accepted = listener.accept() => accepted,
            };
            if self.shutting_down.load(Ordering::Acquire) {
                break;
            }
            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = self.accept_connection(stream) {
                        warn!(port = self.input_port.name(), peer = %peer, error = %e,
                            "failed to set up inbound channel");
                    }
                }
                Err(e) => {
                    warn!(port = self.input_port.name(), error = %e, "accept failed");
                }
            }
        }
        debug!(port = self.input_port.name(), "listener stopped");
    }

    fn accept_connection(&self, stream: TcpStream) -> Result<(), CommError> {
        let Some(core) = self.core.upgrade() else {
            return Err(CommError::ChannelClosing);
        };
        let transport = Arc::new(TcpTransport::from_stream(stream)?);
        let protocol = self
            .protocol_factory
            .create_input_protocol(self.input_port.protocol(), self.input_port.location())?;
        let channel =
            CommChannel::for_input(&core, transport, protocol, self.input_port.clone());
        core.register_for_selection(&channel);
        Ok(())
    }
}

#[async_trait]
impl CommListener for TcpCommListener {
    async fn start(self: Arc<Self>) -> Result<(), CommError> {
        let authority = self.input_port.location().authority().to_string();
        let listener = TcpListener::bind(&authority).await.map_err(|source| {
            TransportError::Bind {
                address: authority.clone(),
                source,
            }
        })?;
        let local_addr = listener.local_addr().map_err(TransportError::from)?;
        info!(port = self.input_port.name(), %local_addr, "listener started");

        let task = tokio::spawn(self.clone().accept_loop(listener));
        let mut state = self.state.lock();
        state.local_addr = Some(local_addr);
        state.accept_task = Some(task);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.shutdown_notify.notify_waiters();
        let task = self.state.lock().accept_task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(port = self.input_port.name(), error = %e, "accept task failed");
                }
            }
        }
    }

    fn local_location(&self) -> Option<Location> {
        let addr = self.state.lock().local_addr?;
        Location::parse(format!("socket://{addr}")).ok()
    }

    fn input_port(&self) -> &Arc<InputPort> {
        &self.input_port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_read_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let transport = TcpTransport::from_stream(stream).unwrap();
            let mut buf = [0u8; 16];
            let n = transport.read(&mut buf).await.unwrap();
            transport.write_all(&buf[..n]).await.unwrap();
        });

        let transport = TcpTransport::connect(&addr.to_string()).await.unwrap();
        transport.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, _) = listener.accept().await.unwrap();
        let _peer = client.await.unwrap();

        let transport = Arc::new(TcpTransport::from_stream(stream).unwrap());
        let reader = {
            let transport = transport.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 8];
                transport.read(&mut buf).await
            })
        };
        // Give the reader time to park in readable().
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        transport.shutdown().await.unwrap();

        let result = reader.await.unwrap();
        assert_eq!(
            result.unwrap_err().kind(),
            io::ErrorKind::ConnectionAborted
        );
    }

    #[tokio::test]
    async fn test_read_reports_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let transport = TcpTransport::from_stream(stream).unwrap();

        drop(client);
        let mut buf = [0u8; 8];
        assert_eq!(transport.read(&mut buf).await.unwrap(), 0);
    }
}
