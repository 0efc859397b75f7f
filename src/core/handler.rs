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

//! Channel handlers and the inbound dispatcher.
//!
//! A handler is bound to one channel. It takes the channel lock, holds the
//! shared side of the channel-handlers latch (the shutdown routine drains by
//! taking the exclusive side), decodes exactly one message, and routes it:
//!
//! 1. **Redirection** - a non-root resource path names a target in the input
//!    port's redirection map by its first segment; the message is bridged
//!    over a fresh outbound forwarder channel. An unbound resource is
//!    discarded and its channel closed.
//! 2. **Direct** - the port declares the operation; the payload is
//!    type-checked and handed to the correlation engine, and one-way
//!    operations are acknowledged immediately.
//! 3. **Aggregation** - the port delegates the operation to an external
//!    collaborator.
//! 4. Anything else is answered with an `IOException` fault naming the
//!    invalid operation.
//!
//! On a forwarder channel the inbound message is a bridged response: it is
//! rewritten to the original message id, written back to the partner
//! channel, and the forwarder is closed.

use crate::channel::{CommChannel, ProtocolState};
use crate::context::ContextGuard;
use crate::core::CommCore;
use crate::error::CommError;
use crate::message::{Fault, Message, Value, IO_EXCEPTION_FAULT, TYPE_MISMATCH_FAULT};
use crate::ports::AggregatedOperation;
use crate::runtime::OperationKind;
use std::io;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, warn};

/// Keeps the core's view of in-flight handlers current; shutdown closes the
/// tracked channels to unpark blocked receives.
struct HandlerTrack {
    core: Arc<CommCore>,
    channel: Arc<CommChannel>,
}

impl HandlerTrack {
    fn new(core: &Arc<CommCore>, channel: &Arc<CommChannel>) -> Self {
        core.track_handler(channel);
        Self {
            core: core.clone(),
            channel: channel.clone(),
        }
    }
}

impl Drop for HandlerTrack {
    fn drop(&mut self) {
        self.core.untrack_handler(&self.channel);
    }
}

/// Body of one handler task.
pub(crate) async fn handle_channel(core: Arc<CommCore>, channel: Arc<CommChannel>) {
    let _context = ContextGuard::install(core.runtime().root_context());
    let _track = HandlerTrack::new(&core, &channel);

    let guard = channel.lock_owned().await;
    let _latch = core.handlers_latch().read().await;

    let result = match channel.redirection() {
        None => receive_and_dispatch(&core, &channel, guard).await,
        Some((partner, original_id)) => {
            // The response read below re-locks; holding on here would
            // deadlock against it.
            drop(guard);
            forward_response(&channel, &partner, original_id).await
        }
    };

    match result {
        Ok(()) => {}
        Err(e) if e.is_channel_closing() => {
            debug!(channel_id = %channel.id(), "channel closed during receive");
        }
        Err(e) => {
            error!(channel_id = %channel.id(), error = %e, "channel handler failed");
            let _ = channel.close().await;
        }
    }
}

async fn receive_and_dispatch(
    core: &Arc<CommCore>,
    channel: &Arc<CommChannel>,
    mut guard: OwnedMutexGuard<ProtocolState>,
) -> Result<(), CommError> {
    match channel.recv_locked(&mut guard).await? {
        Some(message) => dispatch(core, channel, guard, message).await,
        None => {
            drop(guard);
            debug!(channel_id = %channel.id(), "remote endpoint closed the connection");
            channel.set_to_be_closed(true);
            channel.dispose_for_input().await
        }
    }
}

async fn dispatch(
    core: &Arc<CommCore>,
    channel: &Arc<CommChannel>,
    mut guard: OwnedMutexGuard<ProtocolState>,
    message: Message,
) -> Result<(), CommError> {
    let port = channel.input_port().cloned().ok_or_else(|| {
        CommError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "inbound message on a channel without an input port",
        ))
    })?;

    // Any non-root resource path is a redirection attempt; direct and
    // aggregated dispatch only ever fire at the root path.
    if let Some(resource) = message.resource_segments().next() {
        return match port.redirection(resource) {
            Some(out_port) => {
                let result =
                    handle_redirection(core, channel, &mut guard, &message, &out_port).await;
                drop(guard);
                // The original channel is not disposed: it waits for the
                // bridged response, which the forwarder writes back.
                result
            }
            None => {
                let reason = format!(
                    "discarded a message for resource {resource}, not present in the redirection table"
                );
                warn!(port = port.name(), "{reason}");
                drop(guard);
                Err(CommError::Io(io::Error::new(io::ErrorKind::NotFound, reason)))
            }
        };
    }

    let result = route_local(core, channel, &mut guard, &port, message).await;
    drop(guard);
    let disposed = channel.dispose_for_input().await;
    result.and(disposed)
}

async fn handle_redirection(
    core: &Arc<CommCore>,
    channel: &Arc<CommChannel>,
    state: &mut ProtocolState,
    message: &Message,
    out_port: &Arc<crate::ports::OutputPort>,
) -> Result<(), CommError> {
    let remainder: Vec<&str> = message.resource_segments().skip(1).collect();
    let forwarded_path = if remainder.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", remainder.join("/"))
    };

    match bridge_request(core, channel, out_port, message, forwarded_path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let fault =
                Message::fault_response(message, Fault::new(IO_EXCEPTION_FAULT, e.to_string()));
            let _ = channel.send_locked(state, &fault).await;
            Err(e)
        }
    }
}

/// Opens the forwarder, rewrites the message onto the remaining path, and
/// parks the forwarder in the selector to await the response.
async fn bridge_request(
    core: &Arc<CommCore>,
    channel: &Arc<CommChannel>,
    out_port: &Arc<crate::ports::OutputPort>,
    message: &Message,
    forwarded_path: String,
) -> Result<(), CommError> {
    let forwarder = core
        .create_output_channel(out_port.location(), out_port)
        .await?;
    let bridged = Message::with_id(
        Message::next_id(),
        message.operation(),
        forwarded_path,
        message.value().clone(),
        message.fault().cloned(),
    );
    forwarder.set_redirection(Some((channel.clone(), message.id())));
    forwarder.send(&bridged).await?;
    forwarder.set_to_be_closed(false);
    forwarder.dispose_for_input().await?;
    debug!(
        channel_id = %channel.id(),
        forwarder_id = %forwarder.id(),
        target = out_port.name(),
        "bridged redirected request"
    );
    Ok(())
}

/// Reads the bridged response off the forwarder and writes it back to the
/// partner under the original message id. The forwarder is closed on every
/// path; the partner is closed or returned to the selector according to its
/// to-be-closed flag.
async fn forward_response(
    forwarder: &Arc<CommChannel>,
    partner: &Arc<CommChannel>,
    original_id: u64,
) -> Result<(), CommError> {
    let received = {
        let mut guard = forwarder.lock_owned().await;
        forwarder.recv_locked(&mut guard).await
    };
    let response = match received {
        Ok(Some(response)) => Message::with_id(
            original_id,
            response.operation(),
            response.resource_path(),
            response.value().clone(),
            response.fault().cloned(),
        ),
        Ok(None) | Err(_) => Message::with_id(
            original_id,
            "",
            "/",
            Value::Null,
            Some(Fault::new(IO_EXCEPTION_FAULT, "Internal server error")),
        ),
    };

    let sent = partner.send(&response).await;
    let partner_done = if partner.to_be_closed() {
        partner.close().await
    } else {
        partner.dispose_for_input().await
    };
    forwarder.set_redirection(None);
    let closed = forwarder.close().await;
    sent.and(partner_done).and(closed)
}

async fn route_local(
    core: &Arc<CommCore>,
    channel: &Arc<CommChannel>,
    state: &mut ProtocolState,
    port: &Arc<crate::ports::InputPort>,
    message: Message,
) -> Result<(), CommError> {
    if port.can_handle_directly(message.operation()) {
        handle_direct(core, channel, state, message).await
    } else if let Some(operation) = port.aggregated_operation(message.operation()) {
        handle_aggregated(channel, state, operation, message).await
    } else {
        warn!(
            operation = message.operation(),
            port = port.name(),
            "received a message for an operation not declared at the input port"
        );
        let fault = Message::fault_response(
            &message,
            Fault::new(
                IO_EXCEPTION_FAULT,
                format!("Invalid operation: {}", message.operation()),
            ),
        );
        channel.send_locked(state, &fault).await
    }
}

async fn handle_direct(
    core: &Arc<CommCore>,
    channel: &Arc<CommChannel>,
    state: &mut ProtocolState,
    message: Message,
) -> Result<(), CommError> {
    let Some(operation) = core.runtime().input_operation(message.operation()) else {
        warn!(
            operation = message.operation(),
            "received a message for an undefined operation"
        );
        let fault = Message::fault_response(
            &message,
            Fault::new(
                IO_EXCEPTION_FAULT,
                format!("Invalid operation: {}", message.operation()),
            ),
        );
        return channel.send_locked(state, &fault).await;
    };

    if let Err(e) = operation.check_request(message.value()) {
        warn!(
            operation = operation.name(),
            error = %e,
            "received message failed its input type check"
        );
        let fault = Message::fault_response(&message, Fault::new(TYPE_MISMATCH_FAULT, e.to_string()));
        return channel.send_locked(state, &fault).await;
    }

    match core.runtime().correlation().on_message(&message, channel) {
        Err(fault) => {
            warn!(
                operation = operation.name(),
                fault = fault.name(),
                "message could not be correlated with any session"
            );
            let reply = Message::fault_response(&message, fault);
            channel.send_locked(state, &reply).await
        }
        Ok(()) => {
            if operation.kind() == OperationKind::OneWay {
                channel
                    .send_locked(state, &Message::empty_response(&message))
                    .await
            } else {
                Ok(())
            }
        }
    }
}

async fn handle_aggregated(
    channel: &Arc<CommChannel>,
    state: &mut ProtocolState,
    operation: Arc<dyn AggregatedOperation>,
    message: Message,
) -> Result<(), CommError> {
    match operation.handle(message.clone()).await {
        Ok(Some(response)) => {
            let reply = Message::with_id(
                message.id(),
                response.operation(),
                response.resource_path(),
                response.value().clone(),
                response.fault().cloned(),
            );
            channel.send_locked(state, &reply).await
        }
        Ok(None) => Ok(()),
        Err(fault) => {
            channel
                .send_locked(state, &Message::fault_response(&message, fault))
                .await
        }
    }
}
