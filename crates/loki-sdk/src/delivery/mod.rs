// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery strategy selection.
//!
//! A batch is encoded once and handed to one or more mechanisms depending on
//! the configured [`DeliveryMode`]:
//!
//! | mode       | mechanisms tried                                   |
//! |------------|----------------------------------------------------|
//! | `direct`   | direct                                             |
//! | `beacon`   | beacon                                             |
//! | `proxy`    | proxy                                              |
//! | `relay`    | relay                                              |
//! | `fallback` | `fallback_chain`, first success wins               |
//! | `auto`     | direct, beacon (if enabled for exit), proxy        |
//!
//! Single-mechanism modes return the mechanism's error as is. Chained modes
//! return [`Delivery::Deferred`] when everything failed and the offline buffer
//! may hold the batch, otherwise [`SdkError::AllStrategiesFailed`].
//!
//! Only the direct mechanism runs under [`with_retry`]. Proxy and relay are
//! fallbacks and get a single attempt; the beacon's outcome is known
//! synchronously and never changes on a second try.

pub mod endpoint;
pub mod transport;

use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::config::{Config, CorsMode, DeliveryMode, Mechanism};
use crate::context::PageInfo;
use crate::envelope::Envelope;
use crate::error::SdkError;
use crate::host::{BeaconOutcome, Host};
use crate::payload::PushRequest;
use crate::retry::with_retry;
use endpoint::{page_origin, proxy_url, relay_target_url, resolve_relay_base};
use transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered(Mechanism),
    /// Nothing got through; the caller should keep the batch offline.
    Deferred,
}

pub struct Deliverer {
    config: Arc<Config>,
    host: Arc<dyn Host>,
    transport: Arc<dyn Transport>,
    page: PageInfo,
    relay_base: Option<String>,
}

impl Deliverer {
    pub fn new(config: Arc<Config>, host: Arc<dyn Host>, transport: Arc<dyn Transport>) -> Self {
        let page = host.page_info();
        let relay_base = resolve_relay_base(&config, &page);
        if let Some(relay) = &relay_base {
            debug!("LOKI | Using relay {relay}");
        }
        Deliverer {
            config,
            host,
            transport,
            page,
            relay_base,
        }
    }

    pub fn encode(&self, batch: &[Envelope]) -> Result<Bytes, SdkError> {
        PushRequest::build(batch, &self.config)?.to_bytes()
    }

    pub async fn deliver(&self, batch: &[Envelope]) -> Result<Delivery, SdkError> {
        let body = self.encode(batch)?;

        let only = match self.config.delivery_mode {
            DeliveryMode::Direct => Some(Mechanism::Direct),
            DeliveryMode::Beacon => Some(Mechanism::Beacon),
            DeliveryMode::Proxy => Some(Mechanism::Proxy),
            DeliveryMode::Relay => Some(Mechanism::Relay),
            DeliveryMode::Fallback | DeliveryMode::Auto => None,
        };
        if let Some(mechanism) = only {
            self.attempt(mechanism, &body).await?;
            return Ok(Delivery::Delivered(mechanism));
        }

        let chain = self.chain();
        let mut failures = Vec::with_capacity(chain.len());
        for mechanism in chain {
            match self.attempt(mechanism, &body).await {
                Ok(()) => {
                    debug!(
                        "LOKI | Delivered {} records via {}",
                        batch.len(),
                        mechanism.as_str()
                    );
                    return Ok(Delivery::Delivered(mechanism));
                }
                Err(e) => {
                    debug!("LOKI | {} delivery failed: {e}", mechanism.as_str());
                    failures.push(format!("{}: {e}", mechanism.as_str()));
                }
            }
        }

        if self.config.enable_offline_buffer {
            Ok(Delivery::Deferred)
        } else {
            Err(SdkError::AllStrategiesFailed(failures))
        }
    }

    fn chain(&self) -> Vec<Mechanism> {
        match self.config.delivery_mode {
            DeliveryMode::Fallback => self.config.fallback_chain.clone(),
            _ => {
                let mut chain = vec![Mechanism::Direct];
                if self.config.use_fire_and_forget_on_exit {
                    chain.push(Mechanism::Beacon);
                }
                chain.push(Mechanism::Proxy);
                chain
            }
        }
    }

    pub async fn attempt(&self, mechanism: Mechanism, body: &Bytes) -> Result<(), SdkError> {
        if mechanism == Mechanism::Beacon {
            return self.beacon(body.clone());
        }
        let url = self.url_for(mechanism)?;
        let max_retries = match mechanism {
            Mechanism::Direct => self.config.max_retries,
            _ => 0,
        };
        with_retry(
            mechanism.as_str(),
            max_retries,
            self.config.backoff_ms,
            || self.transport.post(&url, body.clone()),
        )
        .await
    }

    /// Hands `body` to the host's fire-and-forget channel.
    pub fn beacon(&self, body: Bytes) -> Result<(), SdkError> {
        let url = self.url_for(Mechanism::Beacon)?;
        match self.host.send_beacon(&url, body) {
            BeaconOutcome::Queued => Ok(()),
            BeaconOutcome::Rejected => Err(SdkError::UnsupportedCapability(
                "beacon rejected by host".to_string(),
            )),
            BeaconOutcome::Unsupported => Err(SdkError::UnsupportedCapability(
                "beacon not available".to_string(),
            )),
        }
    }

    fn endpoint(&self) -> Result<&str, SdkError> {
        self.config
            .endpoint
            .as_deref()
            .ok_or_else(|| SdkError::InvalidConfig("no ingest endpoint configured".to_string()))
    }

    fn url_for(&self, mechanism: Mechanism) -> Result<String, SdkError> {
        match mechanism {
            // Proxy-only setups have no endpoint; beacons then go through the proxy.
            Mechanism::Beacon => match &self.config.endpoint {
                Some(endpoint) => Ok(endpoint.clone()),
                None => proxy_url(&self.page, &self.config.proxy_path),
            },
            Mechanism::Direct => {
                let endpoint = self.endpoint()?;
                if self.config.cross_origin_mode == CorsMode::SameOrigin
                    && page_origin(&self.page) != page_origin(&PageInfo::from_url(endpoint))
                {
                    return Err(SdkError::UnsupportedCapability(format!(
                        "direct send to {endpoint} is cross-origin"
                    )));
                }
                Ok(endpoint.to_string())
            }
            Mechanism::Proxy => proxy_url(&self.page, &self.config.proxy_path),
            Mechanism::Relay => {
                let relay = self.relay_base.as_deref().ok_or_else(|| {
                    SdkError::UnsupportedCapability("no relay configured or detected".to_string())
                })?;
                Ok(relay_target_url(relay, self.endpoint()?))
            }
        }
    }
}
