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

//! Adapter running a [`WireCodec`] directly over a transport.

use crate::message::Message;
use crate::protocol::codec::WireCodec;
use crate::protocol::{CommProtocol, ProtocolError};
use crate::transport::Transport;
use async_trait::async_trait;

const READ_CHUNK: usize = 8 * 1024;

/// A [`CommProtocol`] that feeds transport bytes straight into a codec.
///
/// Decoding is incremental: bytes read beyond the current message stay
/// buffered, and their presence makes the channel bypass selector
/// registration on dispose.
pub struct StreamProtocol {
    name: &'static str,
    codec: Box<dyn WireCodec>,
    buf: Vec<u8>,
}

impl StreamProtocol {
    /// Creates a protocol named `name` running `codec` over the transport.
    #[must_use]
    pub fn new(name: &'static str, codec: impl WireCodec + 'static) -> Self {
        Self {
            name,
            codec: Box::new(codec),
            buf: Vec::new(),
        }
    }
}

#[async_trait]
impl CommProtocol for StreamProtocol {
    fn name(&self) -> &str {
        self.name
    }

    fn is_thread_safe(&self) -> bool {
        self.codec.is_thread_safe()
    }

    async fn send(
        &mut self,
        transport: &dyn Transport,
        message: &Message,
    ) -> Result<(), ProtocolError> {
        let mut out = Vec::new();
        self.codec.encode(message, &mut out)?;
        transport.write_all(&out).await?;
        Ok(())
    }

    async fn recv(
        &mut self,
        transport: &dyn Transport,
    ) -> Result<Option<Message>, ProtocolError> {
        loop {
            if let Some(message) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(message));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = transport.read(&mut chunk).await?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(ProtocolError::UnexpectedEof)
                };
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn has_buffered_input(&self) -> bool {
        !self.buf.is_empty()
    }
}
