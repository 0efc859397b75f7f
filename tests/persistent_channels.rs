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

//! Persistent-channel caching: reuse across round-trips, single-use
//! semantics, eviction under contention, and idle-timeout eviction.

mod common;

use common::TestRuntime;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use svclink::message::Message;
use svclink::protocol::{JsonCodec, StreamProtocol};
use svclink::runtime::{InputOperation, ValueSpec};
use svclink::transport::MemoryTransport;
use svclink::{
    ChannelState, CommChannel, CommCore, CoreConfig, InputPort, Location, OutputPort,
    ProtocolSpec,
};

fn new_core(runtime: Arc<TestRuntime>) -> Arc<CommCore> {
    CommCore::new(
        runtime,
        CoreConfig {
            selector_count: 2,
            ..CoreConfig::default()
        },
    )
}

/// A pool-owned channel over a memory transport, for pool-level tests.
fn pooled_channel(core: &Arc<CommCore>, location: &Location) -> Arc<CommChannel> {
    let (near, _far) = MemoryTransport::pair();
    let port = Arc::new(OutputPort::new(
        "out",
        location.clone(),
        ProtocolSpec::new("json").with_keep_alive(true),
    ));
    CommChannel::for_output(
        core,
        Arc::new(near),
        Box::new(StreamProtocol::new("json", JsonCodec::new())),
        location.clone(),
        port,
    )
}

#[tokio::test]
async fn test_two_round_trips_share_one_connection() {
    let runtime = TestRuntime::new([InputOperation::one_way("echo", ValueSpec::Any)]);
    let server = new_core(runtime.clone());
    server
        .add_input_port(
            InputPort::new(
                "server",
                "socket://127.0.0.1:0".parse().unwrap(),
                ProtocolSpec::new("json").with_keep_alive(true),
            )
            .with_operation("echo"),
        )
        .unwrap();
    server.init().await.unwrap();
    let location = server.listener("server").unwrap().local_location().unwrap();

    let client = new_core(TestRuntime::new([]));
    let port = Arc::new(OutputPort::new(
        "client",
        location.clone(),
        ProtocolSpec::new("json").with_keep_alive(true),
    ));

    let first = Message::request("echo", "/", json!(1));
    let channel_one = client.send_message(&first, &location, &port).await.unwrap();
    let response_one = channel_one.recv_response_for(&first).await.unwrap();
    assert_eq!(response_one.id(), first.id());
    client.release_channel(&channel_one).await.unwrap();

    let second = Message::request("echo", "/", json!(2));
    let channel_two = client.send_message(&second, &location, &port).await.unwrap();
    let response_two = channel_two.recv_response_for(&second).await.unwrap();
    assert_eq!(response_two.id(), second.id());
    client.release_channel(&channel_two).await.unwrap();

    // Same channel, one TCP connection.
    assert!(Arc::ptr_eq(&channel_one, &channel_two));
    assert_eq!(client.connections_opened(), 1);

    runtime.engine().wait_received(2).await;
    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_put_then_get_returns_same_channel_once() {
    let core = new_core(TestRuntime::new([]));
    let location: Location = "socket://cache.test:80".parse().unwrap();
    let channel = pooled_channel(&core, &location);

    core.channel_pool()
        .put_persistent(&core, location.clone(), "json".to_string(), channel.clone());

    let cached = core.channel_pool().get_persistent(&location, "json");
    assert!(cached.is_some_and(|c| Arc::ptr_eq(&c, &channel)));

    // Single-use caching: the hit removed the entry.
    assert!(core.channel_pool().get_persistent(&location, "json").is_none());
}

#[tokio::test]
async fn test_contended_channel_is_evicted_not_closed() {
    let core = new_core(TestRuntime::new([]));
    let location: Location = "socket://cache.test:80".parse().unwrap();
    let channel = pooled_channel(&core, &location);

    core.channel_pool()
        .put_persistent(&core, location.clone(), "json".to_string(), channel.clone());

    // A concurrent user holds the channel lock.
    let guard = channel.try_lock_owned().unwrap();
    assert!(core.channel_pool().get_persistent(&location, "json").is_none());
    // The entry is gone, but the channel still belongs to its holder.
    assert!(core.channel_pool().get_persistent(&location, "json").is_none());
    assert!(channel.is_open());
    drop(guard);
}

#[tokio::test]
async fn test_idle_channel_is_evicted_and_closed_on_timeout() {
    let runtime = TestRuntime::with_timeout([], Duration::from_millis(50));
    let core = new_core(runtime);
    let location: Location = "socket://cache.test:80".parse().unwrap();
    let channel = pooled_channel(&core, &location);

    core.channel_pool()
        .put_persistent(&core, location.clone(), "json".to_string(), channel.clone());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(core.channel_pool().get_persistent(&location, "json").is_none());
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_get_after_timeout_cleared_keeps_channel_alive() {
    let runtime = TestRuntime::with_timeout([], Duration::from_millis(50));
    let core = new_core(runtime);
    let location: Location = "socket://cache.test:80".parse().unwrap();
    let channel = pooled_channel(&core, &location);

    core.channel_pool()
        .put_persistent(&core, location.clone(), "json".to_string(), channel.clone());

    // Checked out before the timeout fires; the handler must not close it.
    let cached = core.channel_pool().get_persistent(&location, "json").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(cached.is_open());
}
