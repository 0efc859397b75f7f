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

//! Aggregated operations and asynchronous (multiplexed) correlation.

mod common;

use async_trait::async_trait;
use common::TestRuntime;
use serde_json::json;
use std::sync::Arc;
use svclink::message::{Fault, Message};
use svclink::runtime::{InputOperation, ValueSpec};
use svclink::{
    AggregatedOperation, CommCore, CoreConfig, InputPort, Location, OutputPort, ProtocolSpec,
};

struct SumOperation;

#[async_trait]
impl AggregatedOperation for SumOperation {
    fn name(&self) -> &str {
        "sum"
    }

    async fn handle(&self, message: Message) -> Result<Option<Message>, Fault> {
        let Some(values) = message.value().as_array() else {
            return Err(Fault::new("TypeMismatch", "sum expects an array"));
        };
        let total: i64 = values.iter().filter_map(serde_json::Value::as_i64).sum();
        Ok(Some(Message::response(&message, json!(total))))
    }
}

async fn start_server(runtime: Arc<TestRuntime>) -> (Arc<CommCore>, Location) {
    let core = CommCore::new(
        runtime,
        CoreConfig {
            selector_count: 2,
            ..CoreConfig::default()
        },
    );
    let port = InputPort::new(
        "server",
        "socket://127.0.0.1:0".parse().unwrap(),
        ProtocolSpec::new("json").with_keep_alive(true),
    )
    .with_operation("echo")
    .with_aggregation(Arc::new(SumOperation));
    core.add_input_port(port).unwrap();
    core.init().await.unwrap();
    let location = core.listener("server").unwrap().local_location().unwrap();
    (core, location)
}

#[tokio::test]
async fn test_aggregated_operation_replies() {
    let runtime = TestRuntime::new([]);
    let (core, location) = start_server(runtime).await;
    let port = Arc::new(OutputPort::new(
        "client",
        location.clone(),
        ProtocolSpec::new("json"),
    ));

    let request = Message::request("sum", "/", json!([1, 2, 3, 4]));
    let channel = core.send_message(&request, &location, &port).await.unwrap();
    let response = channel.recv_response_for(&request).await.unwrap();

    assert_eq!(response.id(), request.id());
    assert_eq!(response.value(), &json!(10));

    core.shutdown().await;
}

#[tokio::test]
async fn test_aggregated_operation_fault() {
    let runtime = TestRuntime::new([]);
    let (core, location) = start_server(runtime).await;
    let port = Arc::new(OutputPort::new(
        "client",
        location.clone(),
        ProtocolSpec::new("json"),
    ));

    let request = Message::request("sum", "/", json!("not an array"));
    let channel = core.send_message(&request, &location, &port).await.unwrap();
    let response = channel.recv_response_for(&request).await.unwrap();

    assert_eq!(response.fault().map(Fault::name), Some("TypeMismatch"));

    core.shutdown().await;
}

#[tokio::test]
async fn test_multiplexed_correlation_completes_future() {
    let runtime = TestRuntime::new([InputOperation::one_way("echo", ValueSpec::Any)]);
    let (core, location) = start_server(runtime.clone()).await;
    // Multiplexed client codec: the exchange correlates by message id, and
    // the channel is released at send time.
    let port = Arc::new(OutputPort::new(
        "client",
        location.clone(),
        ProtocolSpec::new("json")
            .with_config("multiplex", "true")
            .with_keep_alive(true),
    ));

    let request = Message::request("echo", "/", json!("async"));
    let channel = core.send_message(&request, &location, &port).await.unwrap();
    assert!(channel.is_thread_safe());

    let response = channel.recv_response_for(&request).await.unwrap();
    assert_eq!(response.id(), request.id());
    assert!(!response.is_fault());

    let received = runtime.engine().wait_received(1).await;
    assert_eq!(received[0].value(), &json!("async"));

    core.shutdown().await;
}
