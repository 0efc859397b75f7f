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

//! Input and output ports.
//!
//! A port binds a location and a protocol to an interface. Input ports are
//! the server side: they own the set of directly handled operations, the
//! aggregation map, and the redirection map that the dispatcher consults.
//! Output ports are the client side: a location plus protocol configuration
//! used when acquiring outbound channels.

use crate::location::Location;
use crate::message::{Fault, Message};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Protocol selection and configuration carried by a port.
#[derive(Debug, Clone)]
pub struct ProtocolSpec {
    name: String,
    config: HashMap<String, String>,
    keep_alive: bool,
}

impl ProtocolSpec {
    /// Creates a spec for the named protocol with empty configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: HashMap::new(),
            keep_alive: false,
        }
    }

    /// Adds one configuration entry (builder style).
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Marks channels of this port as persistent: they are returned to the
    /// selector after a message instead of being closed.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the protocol name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration map.
    #[must_use]
    pub fn config(&self) -> &HashMap<String, String> {
        &self.config
    }

    /// Returns `true` if channels should outlive a single exchange.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

/// A server-side composition hook: the port forwards matching operations to
/// an external collaborator instead of the local interpreter.
#[async_trait]
pub trait AggregatedOperation: Send + Sync {
    /// Returns the operation name this aggregation serves.
    fn name(&self) -> &str;

    /// Runs the aggregation behaviour for one inbound message.
    ///
    /// Returning `Ok(Some(response))` makes the dispatcher reply with the
    /// response paired to the request id; `Ok(None)` sends nothing.
    ///
    /// # Errors
    ///
    /// A returned [`Fault`] is sent back to the caller as a fault reply.
    async fn handle(&self, message: Message) -> Result<Option<Message>, Fault>;
}

/// Server-side port configuration.
pub struct InputPort {
    name: String,
    location: Location,
    protocol: ProtocolSpec,
    interface: HashSet<String>,
    aggregations: HashMap<String, Arc<dyn AggregatedOperation>>,
    redirections: HashMap<String, Arc<OutputPort>>,
}

impl InputPort {
    /// Creates an input port listening at `location` with the given protocol.
    #[must_use]
    pub fn new(name: impl Into<String>, location: Location, protocol: ProtocolSpec) -> Self {
        Self {
            name: name.into(),
            location,
            protocol,
            interface: HashSet::new(),
            aggregations: HashMap::new(),
            redirections: HashMap::new(),
        }
    }

    /// Declares an operation handled directly by the local interpreter.
    #[must_use]
    pub fn with_operation(mut self, name: impl Into<String>) -> Self {
        self.interface.insert(name.into());
        self
    }

    /// Adds an aggregated operation.
    #[must_use]
    pub fn with_aggregation(mut self, operation: Arc<dyn AggregatedOperation>) -> Self {
        self.aggregations
            .insert(operation.name().to_string(), operation);
        self
    }

    /// Binds a redirection target: requests whose first path segment equals
    /// `resource` are bridged to `target`.
    #[must_use]
    pub fn with_redirection(
        mut self,
        resource: impl Into<String>,
        target: Arc<OutputPort>,
    ) -> Self {
        self.redirections.insert(resource.into(), target);
        self
    }

    /// Returns the port name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the listening location.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns the protocol specification.
    #[must_use]
    pub fn protocol(&self) -> &ProtocolSpec {
        &self.protocol
    }

    /// Returns `true` if `operation` is part of the directly handled
    /// interface.
    #[must_use]
    pub fn can_handle_directly(&self, operation: &str) -> bool {
        self.interface.contains(operation)
    }

    /// Returns the aggregated operation registered under `operation`.
    #[must_use]
    pub fn aggregated_operation(&self, operation: &str) -> Option<Arc<dyn AggregatedOperation>> {
        self.aggregations.get(operation).cloned()
    }

    /// Returns the redirection target bound to `resource`.
    #[must_use]
    pub fn redirection(&self, resource: &str) -> Option<Arc<OutputPort>> {
        self.redirections.get(resource).cloned()
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("protocol", &self.protocol.name)
            .field("interface", &self.interface)
            .field("redirections", &self.redirections.keys())
            .finish_non_exhaustive()
    }
}

/// Client-side port configuration.
#[derive(Debug)]
pub struct OutputPort {
    name: String,
    location: Location,
    protocol: ProtocolSpec,
}

impl OutputPort {
    /// Creates an output port targeting `location` with the given protocol.
    #[must_use]
    pub fn new(name: impl Into<String>, location: Location, protocol: ProtocolSpec) -> Self {
        Self {
            name: name.into(),
            location,
            protocol,
        }
    }

    /// Returns the port name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the target location.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns the protocol specification.
    #[must_use]
    pub fn protocol(&self) -> &ProtocolSpec {
        &self.protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_port_lookup() {
        let out = Arc::new(OutputPort::new(
            "target",
            "socket://127.0.0.1:9001".parse().unwrap(),
            ProtocolSpec::new("json"),
        ));
        let port = InputPort::new(
            "gateway",
            "socket://127.0.0.1:9000".parse().unwrap(),
            ProtocolSpec::new("json"),
        )
        .with_operation("echo")
        .with_redirection("svcA", out);

        assert!(port.can_handle_directly("echo"));
        assert!(!port.can_handle_directly("nope"));
        assert!(port.redirection("svcA").is_some());
        assert!(port.redirection("svcB").is_none());
        assert!(port.aggregated_operation("echo").is_none());
    }

    #[test]
    fn test_protocol_spec_builder() {
        let spec = ProtocolSpec::new("jsons")
            .with_config("ssl.protocol", "TLSv1.3")
            .with_keep_alive(true);
        assert_eq!(spec.name(), "jsons");
        assert!(spec.keep_alive());
        assert_eq!(
            spec.config().get("ssl.protocol").map(String::as_str),
            Some("TLSv1.3")
        );
    }
}
