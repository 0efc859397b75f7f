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

//! The built-in `json` application protocol.
//!
//! Messages travel as length-prefixed JSON documents. The format is primarily
//! meant for service-to-service links and for development; anything heavier
//! (HTTP, binary codecs) plugs in through the same factory SPI.

use crate::location::Location;
use crate::message::Message;
use crate::ports::ProtocolSpec;
use crate::protocol::codec::{read_frame, write_frame, WireCodec};
use crate::protocol::stream::StreamProtocol;
use crate::protocol::{CommProtocol, ProtocolError, ProtocolFactory};

/// Codec for length-prefixed JSON messages.
pub struct JsonCodec {
    thread_safe: bool,
}

impl JsonCodec {
    /// Creates a codec for sequential request-response exchanges.
    #[must_use]
    pub fn new() -> Self {
        Self { thread_safe: false }
    }

    /// Creates a codec whose exchanges are correlated by message id, so that
    /// one channel can carry several in flight at once.
    #[must_use]
    pub fn multiplexed() -> Self {
        Self { thread_safe: true }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    fn encode(&mut self, message: &Message, dst: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(message)?;
        write_frame(dst, &payload)
    }

    fn decode(&mut self, src: &mut Vec<u8>) -> Result<Option<Message>, ProtocolError> {
        match read_frame(src)? {
            Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
            None => Ok(None),
        }
    }
}

/// Factory for the `json` protocol.
pub struct JsonProtocolFactory;

impl JsonProtocolFactory {
    fn codec(spec: &ProtocolSpec) -> JsonCodec {
        if spec
            .config()
            .get("multiplex")
            .is_some_and(|v| v == "true")
        {
            JsonCodec::multiplexed()
        } else {
            JsonCodec::new()
        }
    }
}

impl ProtocolFactory for JsonProtocolFactory {
    fn name(&self) -> &str {
        "json"
    }

    fn create_input_protocol(
        &self,
        spec: &ProtocolSpec,
        _location: &Location,
    ) -> Result<Box<dyn CommProtocol>, ProtocolError> {
        Ok(Box::new(StreamProtocol::new("json", Self::codec(spec))))
    }

    fn create_output_protocol(
        &self,
        spec: &ProtocolSpec,
        _location: &Location,
    ) -> Result<Box<dyn CommProtocol>, ProtocolError> {
        Ok(Box::new(StreamProtocol::new("json", Self::codec(spec))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode() {
        let mut codec = JsonCodec::new();
        let message = Message::request("echo", "/", json!({"k": [1, 2]}));

        let mut wire = Vec::new();
        codec.encode(&message, &mut wire).unwrap();
        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded, message);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_decode_incremental() {
        let mut codec = JsonCodec::new();
        let message = Message::request("echo", "/", json!("x"));
        let mut wire = Vec::new();
        codec.encode(&message, &mut wire).unwrap();

        let mut partial = wire[..wire.len() / 2].to_vec();
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&wire[wire.len() / 2..]);
        assert_eq!(codec.decode(&mut partial).unwrap().unwrap(), message);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let mut codec = JsonCodec::new();
        let mut wire = Vec::new();
        write_frame(&mut wire, b"not json").unwrap();
        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::Serialization(_))
        ));
    }
}
