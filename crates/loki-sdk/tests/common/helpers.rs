// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use loki_sdk::SdkError;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Envelope lines of a push body, in stream order
pub fn envelopes_in(body: &Value) -> Vec<Value> {
    body["streams"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|stream| stream["values"].as_array().unwrap().clone())
        .map(|value| serde_json::from_str(value[1].as_str().unwrap()).unwrap())
        .collect()
}

pub fn messages_in(body: &Value) -> Vec<String> {
    envelopes_in(body)
        .iter()
        .map(|envelope| envelope["message"].as_str().unwrap().to_string())
        .collect()
}

/// Polls `condition` for up to two seconds
#[allow(dead_code)]
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Collects everything passed to `on_error`
#[allow(dead_code)]
pub fn error_sink() -> (Arc<Mutex<Vec<SdkError>>>, impl Fn(&SdkError) + Send + Sync + 'static) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    (errors, move |e: &SdkError| sink.lock().unwrap().push(e.clone()))
}
