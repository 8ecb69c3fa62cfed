// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fake host and transport for driving the SDK without a browser or network

use bytes::Bytes;
use loki_sdk::context::{DeviceInfo, PageInfo};
use loki_sdk::delivery::transport::Transport;
use loki_sdk::{BeaconOutcome, Host, LifecycleSignal, MemoryStore, PersistentStore, SdkError};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Host with an in-memory store, a recording beacon and a signal sender
pub struct FakeHost {
    pub page: PageInfo,
    pub store: Arc<MemoryStore>,
    pub beacon_outcome: Mutex<BeaconOutcome>,
    pub beacons: Mutex<Vec<(String, Value)>>,
    signals: broadcast::Sender<LifecycleSignal>,
}

#[allow(dead_code)]
impl FakeHost {
    pub fn new() -> Arc<Self> {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Arc<Self> {
        let (signals, _) = broadcast::channel(8);
        Arc::new(FakeHost {
            page: PageInfo::from_url("https://shop.example.com/cart?session=abc#top"),
            store,
            beacon_outcome: Mutex::new(BeaconOutcome::Queued),
            beacons: Mutex::new(Vec::new()),
            signals,
        })
    }

    pub fn set_beacon_outcome(&self, outcome: BeaconOutcome) {
        *self.beacon_outcome.lock().unwrap() = outcome;
    }

    pub fn signal(&self, signal: LifecycleSignal) {
        self.signals.send(signal).unwrap();
    }

    pub fn beacon_count(&self) -> usize {
        self.beacons.lock().unwrap().len()
    }

    /// Envelopes currently held in the offline buffer
    pub fn stored(&self, key: &str) -> Vec<Value> {
        match self.store.get(key).unwrap() {
            Some(raw) => serde_json::from_str(&raw).unwrap(),
            None => Vec::new(),
        }
    }
}

impl Host for FakeHost {
    fn page_info(&self) -> PageInfo {
        self.page.clone()
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            ua: "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0".to_string(),
            platform: "web".to_string(),
            language: Some("en-US".to_string()),
            ..Default::default()
        }
    }

    fn persistent_store(&self) -> Option<Arc<dyn PersistentStore>> {
        Some(self.store.clone())
    }

    fn send_beacon(&self, url: &str, body: Bytes) -> BeaconOutcome {
        let outcome = *self.beacon_outcome.lock().unwrap();
        if outcome == BeaconOutcome::Queued {
            let payload = serde_json::from_slice(&body).unwrap();
            self.beacons.lock().unwrap().push((url.to_string(), payload));
        }
        outcome
    }

    fn lifecycle_signals(&self) -> Option<broadcast::Receiver<LifecycleSignal>> {
        Some(self.signals.subscribe())
    }
}

/// Transport that records every push and optionally fails, delays or
/// never finishes them
#[derive(Default)]
pub struct RecordingTransport {
    pub failure: Mutex<Option<SdkError>>,
    pub pushes: Mutex<Vec<(String, Value)>>,
    delay: Option<Duration>,
    hang: bool,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(error: SdkError) -> Arc<Self> {
        Arc::new(RecordingTransport {
            failure: Mutex::new(Some(error)),
            ..Default::default()
        })
    }

    /// Every push takes `delay` before succeeding.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(RecordingTransport {
            delay: Some(delay),
            ..Default::default()
        })
    }

    /// Every push is recorded and then never completes.
    pub fn hanging() -> Arc<Self> {
        Arc::new(RecordingTransport {
            hang: true,
            ..Default::default()
        })
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    /// Messages of every pushed envelope, grouped per push
    pub fn messages(&self) -> Vec<Vec<String>> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| super::helpers::messages_in(body))
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn post(&self, url: &str, body: Bytes) -> Result<(), SdkError> {
        let payload = serde_json::from_slice(&body).unwrap();
        self.pushes.lock().unwrap().push((url.to_string(), payload));
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
