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

//! Shared test runtime: an operation table plus a recording correlation
//! engine standing in for the interpreter.

#![allow(dead_code)] // not every test binary uses every helper

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use svclink::context::ExecutionContext;
use svclink::message::{Fault, Message};
use svclink::runtime::{CorrelationEngine, InputOperation, RuntimeContext};
use svclink::CommChannel;

/// Records every correlated message; optionally fails with a configured
/// fault.
pub struct RecordingEngine {
    received: parking_lot::Mutex<Vec<Message>>,
    fail_with: Option<Fault>,
}

impl RecordingEngine {
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    /// Polls until `count` messages arrived or two seconds elapsed.
    pub async fn wait_received(&self, count: usize) -> Vec<Message> {
        for _ in 0..200 {
            {
                let received = self.received.lock();
                if received.len() >= count {
                    return received.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.received()
    }
}

impl CorrelationEngine for RecordingEngine {
    fn on_message(&self, message: &Message, _channel: &Arc<CommChannel>) -> Result<(), Fault> {
        if let Some(fault) = &self.fail_with {
            return Err(fault.clone());
        }
        self.received.lock().push(message.clone());
        Ok(())
    }
}

pub struct TestRuntime {
    operations: HashMap<String, InputOperation>,
    engine: RecordingEngine,
    persistent_timeout: Duration,
}

impl TestRuntime {
    pub fn new(operations: impl IntoIterator<Item = InputOperation>) -> Arc<Self> {
        Self::with_timeout(operations, Duration::from_secs(2))
    }

    pub fn with_timeout(
        operations: impl IntoIterator<Item = InputOperation>,
        persistent_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            operations: operations
                .into_iter()
                .map(|op| (op.name().to_string(), op))
                .collect(),
            engine: RecordingEngine {
                received: parking_lot::Mutex::new(Vec::new()),
                fail_with: None,
            },
            persistent_timeout,
        })
    }

    /// A runtime whose correlation engine rejects everything with `fault`.
    pub fn failing(
        operations: impl IntoIterator<Item = InputOperation>,
        fault: Fault,
    ) -> Arc<Self> {
        Arc::new(Self {
            operations: operations
                .into_iter()
                .map(|op| (op.name().to_string(), op))
                .collect(),
            engine: RecordingEngine {
                received: parking_lot::Mutex::new(Vec::new()),
                fail_with: Some(fault),
            },
            persistent_timeout: Duration::from_secs(2),
        })
    }

    pub fn engine(&self) -> &RecordingEngine {
        &self.engine
    }
}

impl RuntimeContext for TestRuntime {
    fn input_operation(&self, name: &str) -> Option<InputOperation> {
        self.operations.get(name).cloned()
    }

    fn correlation(&self) -> &dyn CorrelationEngine {
        &self.engine
    }

    fn persistent_connection_timeout(&self) -> Duration {
        self.persistent_timeout
    }

    fn root_context(&self) -> ExecutionContext {
        ExecutionContext::new("test-root")
    }
}
