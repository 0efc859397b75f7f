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

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod channel;
pub mod context;
pub mod core;
pub mod error;
pub mod location;
pub mod message;
pub mod ports;
pub mod protocol;
pub mod runtime;
pub mod transport;

pub use channel::{ChannelId, ChannelPool, ChannelState, CommChannel, MessagePool};
pub use context::{ContextKey, ContextRegistry, ExecutionContext};
pub use core::{CommCore, CoreConfig};
pub use error::CommError;
pub use location::Location;
pub use message::{Fault, Message, Value};
pub use ports::{AggregatedOperation, InputPort, OutputPort, ProtocolSpec};
pub use runtime::{
    CorrelationEngine, ExtensionLoader, InputOperation, OperationKind, RuntimeContext, ValueSpec,
};
pub use transport::{
    CommListener, PollableTransport, Transport, TransportError, TransportFactory,
};
