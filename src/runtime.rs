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

//! The owning runtime, seen from the communication core.
//!
//! The interpreter is modelled as a capability set injected at construction:
//! operation lookup, the correlation engine, timeout configuration, and
//! extension loading. Logging is not part of the capability set; the core
//! logs through `tracing` directly.

use crate::channel::CommChannel;
use crate::context::ExecutionContext;
use crate::message::{Fault, Message, Value};
use crate::protocol::ProtocolFactory;
use crate::transport::TransportFactory;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Capabilities the communication core needs from its owning runtime.
pub trait RuntimeContext: Send + Sync + 'static {
    /// Looks up an input operation by name.
    fn input_operation(&self, name: &str) -> Option<InputOperation>;

    /// Returns the correlation engine that pairs inbound messages with
    /// sessions.
    fn correlation(&self) -> &dyn CorrelationEngine;

    /// How long an idle persistent channel stays cached before eviction.
    /// Also bounds handler-executor termination on shutdown.
    fn persistent_connection_timeout(&self) -> Duration;

    /// Returns the execution context installed at the start of each handler.
    fn root_context(&self) -> ExecutionContext;

    /// Returns the loader consulted for transport and protocol factories not
    /// registered with the core.
    fn extensions(&self) -> Option<&dyn ExtensionLoader> {
        None
    }
}

/// Pairs inbound request messages with interpreter sessions.
///
/// The engine may reply on the channel later, from its own task; the
/// dispatcher only sends the immediate acknowledgement for one-way
/// operations.
pub trait CorrelationEngine: Send + Sync {
    /// Delivers one correlating request to the interpreter.
    ///
    /// # Errors
    ///
    /// A returned [`Fault`] (conventionally named `CorrelationError`) is sent
    /// back to the caller.
    fn on_message(&self, message: &Message, channel: &Arc<CommChannel>) -> Result<(), Fault>;
}

/// Lazily resolves factories by name, standing in for the runtime's
/// extension loading.
pub trait ExtensionLoader: Send + Sync {
    /// Resolves a transport factory for a location scheme.
    fn transport_factory(&self, name: &str) -> Option<Arc<dyn TransportFactory>> {
        let _ = name;
        None
    }

    /// Resolves a protocol factory by protocol name.
    fn protocol_factory(&self, name: &str) -> Option<Arc<dyn ProtocolFactory>> {
        let _ = name;
        None
    }
}

/// Error returned when a payload fails an operation's input type check.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TypeCheckError(String);

/// Structural type accepted by an operation's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSpec {
    /// Any payload.
    Any,
    /// No payload (null).
    Void,
    /// A boolean.
    Bool,
    /// A number.
    Number,
    /// A string.
    String,
}

impl ValueSpec {
    /// Checks `value` against this spec.
    ///
    /// # Errors
    ///
    /// Returns a [`TypeCheckError`] describing the mismatch.
    pub fn check(&self, value: &Value) -> Result<(), TypeCheckError> {
        let ok = match self {
            Self::Any => true,
            Self::Void => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
        };
        if ok {
            Ok(())
        } else {
            Err(TypeCheckError(format!(
                "expected {self:?} payload, got {value}"
            )))
        }
    }
}

/// Whether an operation expects a response beyond the acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Fire-and-forget; the core acknowledges with an empty response.
    OneWay,
    /// The interpreter session sends the response later.
    RequestResponse,
}

/// An operation declared by the runtime.
#[derive(Debug, Clone)]
pub struct InputOperation {
    name: String,
    kind: OperationKind,
    request_type: ValueSpec,
}

impl InputOperation {
    /// Declares a one-way operation.
    #[must_use]
    pub fn one_way(name: impl Into<String>, request_type: ValueSpec) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::OneWay,
            request_type,
        }
    }

    /// Declares a request-response operation.
    #[must_use]
    pub fn request_response(name: impl Into<String>, request_type: ValueSpec) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::RequestResponse,
            request_type,
        }
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the operation kind.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Type-checks a request payload.
    ///
    /// # Errors
    ///
    /// Returns a [`TypeCheckError`] if the payload does not match the
    /// declared request type.
    pub fn check_request(&self, value: &Value) -> Result<(), TypeCheckError> {
        self.request_type.check(value)
    }
}
