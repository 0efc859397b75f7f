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

//! Selector assignment fairness and the polling-loop fallback for
//! transports that cannot be selected.

mod common;

use common::TestRuntime;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use svclink::message::Message;
use svclink::protocol::{JsonCodec, StreamProtocol, WireCodec};
use svclink::runtime::{InputOperation, ValueSpec};
use svclink::transport::{MemoryTransport, Transport};
use svclink::{CommChannel, CommCore, CoreConfig, InputPort, ProtocolSpec};

fn new_core(runtime: Arc<TestRuntime>, selector_count: usize) -> Arc<CommCore> {
    CommCore::new(
        runtime,
        CoreConfig {
            selector_count,
            ..CoreConfig::default()
        },
    )
}

fn memory_port() -> InputPort {
    InputPort::new(
        "memory",
        "memory://local".parse().unwrap(),
        ProtocolSpec::new("json").with_keep_alive(true),
    )
    .with_operation("ping")
}

#[tokio::test]
async fn test_round_robin_assignment_is_balanced() {
    let core = new_core(TestRuntime::new([]), 4);
    core.init().await.unwrap();
    let port = Arc::new(memory_port());

    let mut channels = Vec::new();
    let mut peers = Vec::new();
    for _ in 0..16 {
        let (near, far) = MemoryTransport::pair();
        let channel = CommChannel::for_input(
            &core,
            Arc::new(near),
            Box::new(StreamProtocol::new("json", JsonCodec::new())),
            port.clone(),
        );
        channel.dispose_for_input().await.unwrap();
        channels.push(channel);
        peers.push(far);
    }

    let mut per_selector: HashMap<usize, usize> = HashMap::new();
    for channel in &channels {
        let index = channel.selector_index().expect("channel not registered");
        assert!(index < core.selector_count());
        *per_selector.entry(index).or_default() += 1;
    }

    // 16 channels over 4 selectors: no selector holds more than the ceiling.
    let ceiling = channels.len().div_ceil(core.selector_count());
    assert_eq!(per_selector.len(), core.selector_count());
    assert!(per_selector.values().all(|&count| count <= ceiling));

    core.shutdown().await;
}

#[tokio::test]
async fn test_polling_loop_drives_unselectable_transport() {
    let runtime = TestRuntime::new([InputOperation::one_way("ping", ValueSpec::Any)]);
    let core = new_core(runtime.clone(), 2);
    core.init().await.unwrap();
    let port = Arc::new(memory_port());

    let (near, far) = MemoryTransport::unselectable_pair();
    assert!(!near.is_selectable());
    let channel = CommChannel::for_input(
        &core,
        Arc::new(near),
        Box::new(StreamProtocol::new("json", JsonCodec::new())),
        port,
    );
    channel.dispose_for_input().await.unwrap();

    // Write one framed request from the peer side.
    let request = Message::request("ping", "/", json!("poll"));
    let mut codec = JsonCodec::new();
    let mut wire = Vec::new();
    codec.encode(&request, &mut wire).unwrap();
    far.write_all(&wire).await.unwrap();

    let received = runtime.engine().wait_received(1).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].operation(), "ping");

    core.shutdown().await;
}
