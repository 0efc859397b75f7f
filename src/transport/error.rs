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

//! Transport-layer error types.

use std::io;
use thiserror::Error;

/// Errors raised by transports and listeners.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An I/O error from the underlying stream.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// An outbound connection could not be established.
    #[error("connection to {address} failed: {source}")]
    Connect {
        /// The address that was dialled.
        address: String,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A listener could not bind its local address.
    #[error("bind on {address} failed: {source}")]
    Bind {
        /// The address that could not be bound.
        address: String,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The transport has been shut down locally.
    #[error("transport closed")]
    Closed,

    /// The listener has been shut down and no longer accepts connections.
    #[error("listener shut down")]
    ListenerClosed,
}

impl TransportError {
    /// Returns `true` if the error indicates the transport or listener is
    /// closed rather than a transfer failure.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::ListenerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_closed() {
        assert!(TransportError::Closed.is_closed());
        assert!(TransportError::ListenerClosed.is_closed());
        let io_error = TransportError::from(io::Error::new(io::ErrorKind::Other, "x"));
        assert!(!io_error.is_closed());
    }
}
