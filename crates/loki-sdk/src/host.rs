// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Platform capabilities the pipeline reads "if available".
//!
//! Page location, device facts, durable storage, fire-and-forget sends and
//! lifecycle notifications all come through [`Host`]. A browser binding, a
//! mobile agent and [`NativeHost`] each provide their own implementation; tests
//! substitute a fake.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::{DeviceInfo, PageInfo};
use crate::http::build_client;
use crate::offline::PersistentStore;

const SIGNAL_CHANNEL_CAPACITY: usize = 16;
const BEACON_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of handing a payload to the fire-and-forget channel.
///
/// `Queued` only means the host accepted it for sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconOutcome {
    Queued,
    Rejected,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The page (or process) is being torn down.
    PageHide,
    BeforeUnload,
    VisibilityHidden,
    VisibilityVisible,
}

impl LifecycleSignal {
    pub fn is_termination(&self) -> bool {
        matches!(self, LifecycleSignal::PageHide | LifecycleSignal::BeforeUnload)
    }
}

pub trait Host: Send + Sync {
    fn page_info(&self) -> PageInfo {
        PageInfo::default()
    }

    fn device_info(&self) -> DeviceInfo;

    fn persistent_store(&self) -> Option<Arc<dyn PersistentStore>> {
        None
    }

    fn send_beacon(&self, _url: &str, _body: Bytes) -> BeaconOutcome {
        BeaconOutcome::Unsupported
    }

    fn lifecycle_signals(&self) -> Option<broadcast::Receiver<LifecycleSignal>> {
        None
    }
}

/// Host for processes without a browser: services, CLIs, desktop agents.
pub struct NativeHost {
    page: PageInfo,
    device: DeviceInfo,
    store: Option<Arc<dyn PersistentStore>>,
    client: Option<reqwest::Client>,
    signals: broadcast::Sender<LifecycleSignal>,
}

impl Default for NativeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeHost {
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let client = build_client(BEACON_TIMEOUT)
            .map_err(|e| warn!("LOKI | Beacon sends disabled: {e}"))
            .ok();
        NativeHost {
            page: PageInfo::default(),
            device: DeviceInfo {
                ua: format!(
                    "loki-sdk/{} ({}; {})",
                    env!("CARGO_PKG_VERSION"),
                    std::env::consts::OS,
                    std::env::consts::ARCH
                ),
                platform: std::env::consts::OS.to_string(),
                language: std::env::var("LANG").ok(),
                ..Default::default()
            },
            store: None,
            client,
            signals,
        }
    }

    /// Location reported as `context.page`; also drives relay discovery.
    #[must_use]
    pub fn with_page_url(mut self, url: &str) -> Self {
        self.page = PageInfo::from_url(url);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notify(&self, signal: LifecycleSignal) {
        // No receivers just means no SDK is listening yet.
        let _ = self.signals.send(signal);
    }

    /// Maps Ctrl-C to [`LifecycleSignal::BeforeUnload`].
    pub fn install_ctrl_c_hook(&self) -> JoinHandle<()> {
        let signals = self.signals.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("LOKI | Ctrl-C received, signalling exit flush");
                let _ = signals.send(LifecycleSignal::BeforeUnload);
            }
        })
    }
}

impl Host for NativeHost {
    fn page_info(&self) -> PageInfo {
        self.page.clone()
    }

    fn device_info(&self) -> DeviceInfo {
        self.device.clone()
    }

    fn persistent_store(&self) -> Option<Arc<dyn PersistentStore>> {
        self.store.clone()
    }

    /// Detached POST on the current runtime; nobody waits for the response.
    fn send_beacon(&self, url: &str, body: Bytes) -> BeaconOutcome {
        let Some(client) = &self.client else {
            return BeaconOutcome::Unsupported;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return BeaconOutcome::Unsupported;
        };
        let request = client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                debug!("LOKI | Beacon send failed: {e}");
            }
        });
        BeaconOutcome::Queued
    }

    fn lifecycle_signals(&self) -> Option<broadcast::Receiver<LifecycleSignal>> {
        Some(self.signals.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_device_info() {
        let host = NativeHost::new();
        let device = host.device_info();
        assert_eq!(device.platform, std::env::consts::OS);
        assert!(device.ua.starts_with("loki-sdk/"));
        assert_eq!(host.page_info(), PageInfo::default());
    }

    #[test]
    fn test_beacon_unsupported_without_runtime() {
        let host = NativeHost::new();
        assert_eq!(
            host.send_beacon("http://127.0.0.1:9/push", Bytes::from_static(b"{}")),
            BeaconOutcome::Unsupported
        );
    }

    #[tokio::test]
    async fn test_beacon_posts_in_background() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("content-type", "application/json")
            .with_status(204)
            .create_async()
            .await;

        let host = NativeHost::new();
        let url = format!("{}/loki/api/v1/push", server.url());
        assert_eq!(
            host.send_beacon(&url, Bytes::from_static(b"{}")),
            BeaconOutcome::Queued
        );

        for _ in 0..50 {
            if mock.matched_async().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_notify_reaches_subscribers() {
        let host = NativeHost::new().with_page_url("https://app.example.com/home?x=1");
        let mut rx = host.lifecycle_signals().unwrap();
        host.notify(LifecycleSignal::VisibilityHidden);
        assert_eq!(rx.recv().await.unwrap(), LifecycleSignal::VisibilityHidden);
        assert_eq!(host.page_info().path, "/home");
        assert!(LifecycleSignal::PageHide.is_termination());
        assert!(!LifecycleSignal::VisibilityHidden.is_termination());
    }
}
