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

//! In-memory transport for tests and in-process service composition.
//!
//! A [`MemoryTransport::pair`] behaves like a connected duplex socket. The
//! unselectable variant opts out of selector readiness and exposes the
//! polling probe instead, which is how the polling loop is exercised without
//! a datagram stack.

use crate::transport::{PollableTransport, Transport, TransportInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// One direction of the duplex pipe.
struct Pipe {
    buf: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
    notify: Notify,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    fn push(&self, bytes: &[u8]) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        self.buf.lock().extend(bytes);
        self.notify.notify_waiters();
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Waits until data is buffered or the pipe is closed.
    async fn wait_readable(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.buf.lock().is_empty() || self.closed.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// In-memory duplex transport.
pub struct MemoryTransport {
    info: TransportInfo,
    read: Arc<Pipe>,
    write: Arc<Pipe>,
    selectable: bool,
}

impl MemoryTransport {
    /// Creates a connected pair of transports.
    ///
    /// Bytes written to one side are read from the other.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::build_pair(true)
    }

    /// Creates a connected pair that cannot be watched by a selector.
    ///
    /// Channels over these transports are driven by the polling loop.
    #[must_use]
    pub fn unselectable_pair() -> (Self, Self) {
        Self::build_pair(false)
    }

    fn build_pair(selectable: bool) -> (Self, Self) {
        let a = Pipe::new();
        let b = Pipe::new();
        let left = Self {
            info: TransportInfo::new("memory"),
            read: a.clone(),
            write: b.clone(),
            selectable,
        };
        let right = Self {
            info: TransportInfo::new("memory"),
            read: b,
            write: a,
            selectable,
        };
        (left, right)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn info(&self) -> &TransportInfo {
        &self.info
    }

    async fn readable(&self) -> io::Result<()> {
        self.read.wait_readable().await;
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            self.read.wait_readable().await;
            {
                let mut queued = self.read.buf.lock();
                if !queued.is_empty() {
                    let n = buf.len().min(queued.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = queued.pop_front().unwrap_or_default();
                    }
                    return Ok(n);
                }
            }
            if self.read.closed.load(Ordering::Acquire) {
                return Ok(0);
            }
        }
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.write.push(buf)
    }

    async fn shutdown(&self) -> io::Result<()> {
        self.read.close();
        self.write.close();
        Ok(())
    }

    fn is_selectable(&self) -> bool {
        self.selectable
    }

    fn as_pollable(&self) -> Option<&dyn PollableTransport> {
        if self.selectable {
            None
        } else {
            Some(self)
        }
    }
}

impl PollableTransport for MemoryTransport {
    fn is_ready(&self) -> io::Result<bool> {
        if !self.read.buf.lock().is_empty() {
            return Ok(true);
        }
        if self.read.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (left, right) = MemoryTransport::pair();
        left.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 8];
        let n = right.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_read_sees_eof_after_shutdown() {
        let (left, right) = MemoryTransport::pair();
        left.write_all(b"x").await.unwrap();
        left.shutdown().await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(right.read(&mut buf).await.unwrap(), 1);
        assert_eq!(right.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_readable_wakes_on_write() {
        let (left, right) = MemoryTransport::pair();
        let waiter = tokio::spawn(async move {
            right.readable().await.unwrap();
            right
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        left.write_all(b"!").await.unwrap();
        let right = waiter.await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(right.read(&mut buf).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pollable_probe() {
        let (left, right) = MemoryTransport::unselectable_pair();
        assert!(!right.is_selectable());
        let pollable = right.as_pollable().unwrap();
        assert!(!pollable.is_ready().unwrap());
        left.write_all(b"data").await.unwrap();
        assert!(pollable.is_ready().unwrap());
    }
}
