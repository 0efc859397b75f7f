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

//! Message model shared by every protocol and channel.
//!
//! A [`Message`] is immutable after construction: it carries a process-unique
//! id, the target operation name, a resource path, a payload [`Value`], and an
//! optional [`Fault`]. Responses reuse the id of the request they answer; that
//! is the whole basis of correlation in this crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Payload type carried by messages.
///
/// The interpreter's value model is structurally a tree of scalars, arrays,
/// and maps, which `serde_json::Value` represents directly.
pub type Value = serde_json::Value;

/// Fault name used when an I/O or routing failure is reported to the caller.
pub const IO_EXCEPTION_FAULT: &str = "IOException";

/// Fault name used when a request payload fails its operation's type check.
pub const TYPE_MISMATCH_FAULT: &str = "TypeMismatch";

/// Fault name used when a message cannot be correlated with any session.
pub const CORRELATION_FAULT: &str = "CorrelationError";

/// Global counter for generating unique message ids.
static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// An application-level fault attached to a response message.
///
/// # Example
///
/// ```rust
/// use svclink::message::{Fault, IO_EXCEPTION_FAULT};
///
/// let fault = Fault::new(IO_EXCEPTION_FAULT, "connection reset");
/// assert_eq!(fault.name(), "IOException");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    name: String,
    message: String,
}

impl Fault {
    /// Creates a fault with the given name and human-readable message.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns the fault name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fault message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// One logical message exchanged over a channel.
///
/// Messages are immutable after construction. The resource path's first
/// non-empty segment names a redirection target at the receiving input port;
/// any further segments form the forwarded path.
///
/// # Example
///
/// ```rust
/// use svclink::message::Message;
/// use serde_json::json;
///
/// let request = Message::request("echo", "/", json!("hi"));
/// let response = Message::response(&request, json!("hi"));
/// assert_eq!(request.id(), response.id());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: u64,
    operation: String,
    resource_path: String,
    value: Value,
    fault: Option<Fault>,
}

impl Message {
    /// Reserves and returns a fresh, process-unique message id.
    #[must_use]
    pub fn next_id() -> u64 {
        NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Creates a request message with a freshly generated id.
    #[must_use]
    pub fn request(
        operation: impl Into<String>,
        resource_path: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            id: Self::next_id(),
            operation: operation.into(),
            resource_path: resource_path.into(),
            value,
            fault: None,
        }
    }

    /// Creates a message with an explicit id and optional fault.
    ///
    /// Used when rewriting a message for redirection or when pairing a
    /// response with the id of its request.
    #[must_use]
    pub fn with_id(
        id: u64,
        operation: impl Into<String>,
        resource_path: impl Into<String>,
        value: Value,
        fault: Option<Fault>,
    ) -> Self {
        Self {
            id,
            operation: operation.into(),
            resource_path: resource_path.into(),
            value,
            fault,
        }
    }

    /// Creates a successful response carrying `value`, paired to `request`.
    #[must_use]
    pub fn response(request: &Self, value: Value) -> Self {
        Self {
            id: request.id,
            operation: request.operation.clone(),
            resource_path: "/".to_string(),
            value,
            fault: None,
        }
    }

    /// Creates the empty acknowledgement sent for one-way operations.
    #[must_use]
    pub fn empty_response(request: &Self) -> Self {
        Self::response(request, Value::Null)
    }

    /// Creates a fault response paired to `request`.
    #[must_use]
    pub fn fault_response(request: &Self, fault: Fault) -> Self {
        Self {
            id: request.id,
            operation: request.operation.clone(),
            resource_path: "/".to_string(),
            value: Value::Null,
            fault: Some(fault),
        }
    }

    /// Returns the message id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the operation name.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Returns the resource path.
    #[must_use]
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Returns the payload value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Returns the fault, if this message carries one.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Returns `true` if this message carries a fault.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }

    /// Returns the non-empty segments of the resource path.
    pub fn resource_segments(&self) -> impl Iterator<Item = &str> {
        self.resource_path.split('/').filter(|s| !s.is_empty())
    }
}
