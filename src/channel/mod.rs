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

//! Channels and the structures that manage them.
//!
//! - [`CommChannel`]: one endpoint, combining a transport, a protocol
//!   instance, and the channel lock that serialises them
//! - [`ChannelPool`]: persistent-connection caching per
//!   `(location, protocol)` with timeout-driven eviction
//! - [`MessagePool`]: correlation of pending requests to responses,
//!   synchronous and asynchronous
//!
//! # Ordering guarantees
//!
//! Within a channel, messages are decoded strictly in the order the
//! transport delivers bytes: the channel lock serialises decoders. Across
//! channels there are no ordering guarantees. A synchronous request-response
//! pair on a sequential channel preserves its pairing because the channel is
//! exclusively owned between send and receive.

#[allow(clippy::module_inception)]
mod channel;
mod correlation;
mod id;
mod pool;

pub use channel::{ChannelState, CommChannel, ProtocolState};
pub use correlation::MessagePool;
pub use id::ChannelId;
pub use pool::ChannelPool;
