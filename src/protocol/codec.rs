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

//! Sans-IO message codecs and length-prefix framing.
//!
//! # Frame layout
//!
//! ```text
//! +------------------+-------------------+
//! | Length (4 bytes) | Payload (N bytes) |
//! +------------------+-------------------+
//! ```
//!
//! The length is a `u32` in big-endian format and counts only the payload.
//! Frames larger than [`MAX_FRAME_SIZE`] are rejected on both paths.

use crate::message::Message;
use crate::protocol::ProtocolError;

/// Maximum allowed payload size of a single frame (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the frame length header in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// A sans-IO message codec.
///
/// Codecs translate between [`Message`] values and bytes in caller-owned
/// buffers. `decode` is incremental: it consumes a complete message from the
/// front of `src` when one is available and otherwise leaves `src` untouched
/// and returns `Ok(None)`.
pub trait WireCodec: Send {
    /// Returns the codec name.
    fn name(&self) -> &str;

    /// Returns `true` if exchanges over this codec may be multiplexed on one
    /// channel and correlated by message id.
    fn is_thread_safe(&self) -> bool {
        false
    }

    /// Appends the encoded form of `message` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized or exceeds the
    /// frame limit.
    fn encode(&mut self, message: &Message, dst: &mut Vec<u8>) -> Result<(), ProtocolError>;

    /// Decodes one message from the front of `src`, if a complete one is
    /// buffered.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input; the connection is unusable
    /// afterwards.
    fn decode(&mut self, src: &mut Vec<u8>) -> Result<Option<Message>, ProtocolError>;
}

/// Appends a length-prefixed frame containing `payload` to `dst`.
///
/// # Errors
///
/// Returns [`ProtocolError::Frame`] if the payload exceeds
/// [`MAX_FRAME_SIZE`].
pub fn write_frame(dst: &mut Vec<u8>, payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::Frame(format!(
            "payload of {} bytes exceeds maximum frame size {}",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_FRAME_SIZE above
    let len = payload.len() as u32;
    dst.extend_from_slice(&len.to_be_bytes());
    dst.extend_from_slice(payload);
    Ok(())
}

/// Takes one complete length-prefixed frame from the front of `src`.
///
/// Returns `Ok(None)` if `src` does not yet contain a full frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Frame`] if the header announces a payload larger
/// than [`MAX_FRAME_SIZE`].
pub fn read_frame(src: &mut Vec<u8>) -> Result<Option<Vec<u8>>, ProtocolError> {
    if src.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let mut header = [0u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&src[..FRAME_HEADER_LEN]);
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::Frame(format!(
            "announced payload of {len} bytes exceeds maximum frame size {MAX_FRAME_SIZE}"
        )));
    }
    if src.len() < FRAME_HEADER_LEN + len {
        return Ok(None);
    }
    let payload = src[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec();
    src.drain(..FRAME_HEADER_LEN + len);
    Ok(Some(payload))
}
