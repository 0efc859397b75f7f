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

//! Redirection round-trips: a gateway port bridges requests by first path
//! segment to an output port and routes the response back on the original
//! channel under the original message id. Messages for resources the port
//! does not redirect are discarded.

mod common;

use common::TestRuntime;
use serde_json::json;
use std::sync::Arc;
use svclink::message::Message;
use svclink::protocol::{JsonCodec, WireCodec};
use svclink::runtime::{InputOperation, ValueSpec};
use svclink::{CommCore, CoreConfig, InputPort, Location, OutputPort, ProtocolSpec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

fn new_core(runtime: Arc<TestRuntime>) -> Arc<CommCore> {
    CommCore::new(
        runtime,
        CoreConfig {
            selector_count: 2,
            ..CoreConfig::default()
        },
    )
}

/// A raw framed-JSON peer standing in for the redirection target: it serves
/// whatever resource path it is handed, acknowledges the one request it
/// receives, and reports that request back to the test.
async fn spawn_raw_target() -> (Location, oneshot::Receiver<Message>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let location =
        Location::parse(format!("socket://{}", listener.local_addr().unwrap())).unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut codec = JsonCodec::new();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let request = loop {
            if let Some(message) = codec.decode(&mut buf).unwrap() {
                break message;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
        };
        let mut wire = Vec::new();
        codec
            .encode(&Message::empty_response(&request), &mut wire)
            .unwrap();
        stream.write_all(&wire).await.unwrap();
        let _ = tx.send(request);
    });
    (location, rx)
}

/// Starts a plain target service and returns its location.
async fn start_target(runtime: Arc<TestRuntime>) -> (Arc<CommCore>, Location) {
    let core = new_core(runtime);
    let port = InputPort::new(
        "target",
        "socket://127.0.0.1:0".parse().unwrap(),
        ProtocolSpec::new("json"),
    )
    .with_operation("ping");
    core.add_input_port(port).unwrap();
    core.init().await.unwrap();
    let location = core.listener("target").unwrap().local_location().unwrap();
    (core, location)
}

/// Starts a gateway whose `svc` resource redirects to `target_location`.
async fn start_gateway(
    runtime: Arc<TestRuntime>,
    target_location: &Location,
) -> (Arc<CommCore>, Location) {
    let core = new_core(runtime);
    let target_port = Arc::new(OutputPort::new(
        "out",
        target_location.clone(),
        ProtocolSpec::new("json"),
    ));
    let port = InputPort::new(
        "gateway",
        "socket://127.0.0.1:0".parse().unwrap(),
        ProtocolSpec::new("json"),
    )
    .with_redirection("svc", target_port);
    core.add_input_port(port).unwrap();
    core.init().await.unwrap();
    let location = core.listener("gateway").unwrap().local_location().unwrap();
    (core, location)
}

#[tokio::test]
async fn test_redirect_round_trip_rewrites_path_and_id() {
    let (target_location, forwarded) = spawn_raw_target().await;

    let gateway_runtime = TestRuntime::new([]);
    let (gateway_core, gateway_location) =
        start_gateway(gateway_runtime, &target_location).await;

    let client_core = new_core(TestRuntime::new([]));
    let client_port = Arc::new(OutputPort::new(
        "client",
        gateway_location.clone(),
        ProtocolSpec::new("json"),
    ));
    let request = Message::request("ping", "/svc/deep", json!({"n": 7}));
    let channel = client_core
        .send_message(&request, &gateway_location, &client_port)
        .await
        .unwrap();
    let response = channel.recv_response_for(&request).await.unwrap();

    // The response comes back under the original id, faultless.
    assert_eq!(response.id(), request.id());
    assert!(!response.is_fault());

    // The target saw the rewritten path and a fresh id.
    let bridged = forwarded.await.unwrap();
    assert_eq!(bridged.operation(), "ping");
    assert_eq!(bridged.resource_path(), "/deep");
    assert_ne!(bridged.id(), request.id());
    assert_eq!(bridged.value(), &json!({"n": 7}));

    gateway_core.shutdown().await;
    client_core.shutdown().await;
}

#[tokio::test]
async fn test_redirect_without_remainder_rewrites_to_root() {
    // A forwarded path of `/` dispatches directly at a served target port.
    let target_runtime = TestRuntime::new([InputOperation::one_way("ping", ValueSpec::Any)]);
    let (target_core, target_location) = start_target(target_runtime.clone()).await;

    let gateway_runtime = TestRuntime::new([]);
    let (gateway_core, gateway_location) =
        start_gateway(gateway_runtime, &target_location).await;

    let client_port = Arc::new(OutputPort::new(
        "client",
        gateway_location.clone(),
        ProtocolSpec::new("json"),
    ));
    let request = Message::request("ping", "/svc", json!(null));
    let channel = target_core
        .send_message(&request, &gateway_location, &client_port)
        .await
        .unwrap();
    let response = channel.recv_response_for(&request).await.unwrap();
    assert_eq!(response.id(), request.id());

    let received = target_runtime.engine().wait_received(1).await;
    assert_eq!(received[0].resource_path(), "/");

    gateway_core.shutdown().await;
    target_core.shutdown().await;
}

#[tokio::test]
async fn test_unbound_resource_is_discarded() {
    // The port declares `echo` and redirects `svc`, but `/foo` names neither:
    // the message is discarded and the channel closed, never dispatched.
    let runtime = TestRuntime::new([InputOperation::one_way("echo", ValueSpec::Any)]);
    let core = new_core(runtime.clone());
    let dead_target = Arc::new(OutputPort::new(
        "out",
        "socket://127.0.0.1:1".parse().unwrap(),
        ProtocolSpec::new("json"),
    ));
    core.add_input_port(
        InputPort::new(
            "server",
            "socket://127.0.0.1:0".parse().unwrap(),
            ProtocolSpec::new("json"),
        )
        .with_operation("echo")
        .with_redirection("svc", dead_target),
    )
    .unwrap();
    core.init().await.unwrap();
    let location = core.listener("server").unwrap().local_location().unwrap();

    let client = new_core(TestRuntime::new([]));
    let client_port = Arc::new(OutputPort::new(
        "client",
        location.clone(),
        ProtocolSpec::new("json"),
    ));
    let request = Message::request("echo", "/foo", json!("hi"));
    let channel = client
        .send_message(&request, &location, &client_port)
        .await
        .unwrap();

    assert!(channel.recv_response_for(&request).await.is_err());
    assert!(runtime.engine().received().is_empty());

    client.shutdown().await;
    core.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_redirect_target_faults() {
    // Redirection bound to a location nothing listens on.
    let dead_location: Location = "socket://127.0.0.1:1".parse().unwrap();
    let gateway_runtime = TestRuntime::new([]);
    let (gateway_core, gateway_location) =
        start_gateway(gateway_runtime, &dead_location).await;

    let client_runtime = TestRuntime::new([]);
    let client_core = new_core(client_runtime);
    let client_port = Arc::new(OutputPort::new(
        "client",
        gateway_location.clone(),
        ProtocolSpec::new("json"),
    ));
    let request = Message::request("ping", "/svc", json!(null));
    let channel = client_core
        .send_message(&request, &gateway_location, &client_port)
        .await
        .unwrap();
    let response = channel.recv_response_for(&request).await.unwrap();

    let fault = response.fault().expect("expected a fault reply");
    assert_eq!(fault.name(), "IOException");

    gateway_core.shutdown().await;
    client_core.shutdown().await;
}
