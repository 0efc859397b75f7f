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

//! Top-level error type for the communication core.
//!
//! Errors follow a layered model: [`TransportError`] for connection-level
//! failures, [`ProtocolError`] for codec and TLS failures, and [`CommError`]
//! as the unified type callers see. On the receive path every error is turned
//! into a fault reply where possible and otherwise absorbed and logged, so
//! that a single misbehaving peer cannot take a selector down; on the send
//! path errors propagate to the caller after the channel is released.

use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use thiserror::Error;

/// Unified error type for communication-core operations.
#[derive(Debug, Error)]
pub enum CommError {
    /// No transport factory is registered for the location's scheme.
    #[error("unsupported communication medium: {0}")]
    UnsupportedMedium(String),

    /// No protocol factory is registered for the given protocol name.
    #[error("unsupported communication protocol: {0}")]
    UnsupportedProtocol(String),

    /// A benign race against channel closure; logged at debug level, never
    /// fatal.
    #[error("channel is closing")]
    ChannelClosing,

    /// A transport-level I/O failure. Closes the channel it occurred on.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A transport-layer failure below the channel.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A codec or TLS failure while encoding or decoding a message.
    #[error(transparent)]
    Protocol(ProtocolError),

    /// A request payload failed its operation's input type check.
    #[error("type mismatch: {0}")]
    TypeChecking(String),

    /// A message could not be correlated with any session.
    #[error("correlation failure: {0}")]
    Correlation(String),

    /// The operation name is not known at the receiving port.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl CommError {
    /// Returns `true` for the benign close race, which receive paths log at
    /// debug level instead of treating as a failure.
    #[must_use]
    pub fn is_channel_closing(&self) -> bool {
        matches!(self, Self::ChannelClosing)
    }
}

impl From<ProtocolError> for CommError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Io(source) => Self::Io(source),
            other => Self::Protocol(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_closing_predicate() {
        assert!(CommError::ChannelClosing.is_channel_closing());
        assert!(!CommError::UnsupportedMedium("btl".into()).is_channel_closing());
    }

    #[test]
    fn test_protocol_io_flattens_to_io() {
        let error: CommError =
            ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).into();
        assert!(matches!(error, CommError::Io(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            CommError::UnsupportedProtocol("soap".into()).to_string(),
            "unsupported communication protocol: soap"
        );
    }
}
