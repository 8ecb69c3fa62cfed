// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Loki SDK
//!
//! Ships application logs and errors to a Grafana Loki push endpoint from
//! environments that may lose connectivity, block cross-origin requests or be
//! torn down at any moment.
//!
//! ## Pipeline
//!
//! capture → redaction → rate limiter → batch queue → delivery (direct,
//! beacon, same-origin proxy or CORS relay, with retry) → on failure, requeue
//! and persist to the offline buffer.
//!
//! Platform facts and capabilities come from a [`Host`]; [`NativeHost`] covers
//! ordinary processes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use loki_sdk::{LogLevel, LokiSdk, NativeHost, SdkOptions};
//!
//! # async fn run() -> Result<(), loki_sdk::SdkError> {
//! let sdk = LokiSdk::new(Arc::new(NativeHost::new()));
//! sdk.init(SdkOptions::new("checkout", "https://logs.example.com"))?;
//! sdk.log(LogLevel::Info, "order placed", None, None);
//! sdk.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod config;
pub mod constants;
pub mod context;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod offline;
pub mod payload;
pub mod rate_limiter;
pub mod redact;
pub mod retry;
pub mod sdk;

pub use config::{CorsMode, DeliveryMode, Mechanism, SdkOptions};
pub use envelope::{Envelope, ErrorValue, LogLevel};
pub use error::SdkError;
pub use host::{BeaconOutcome, Host, LifecycleSignal, NativeHost};
pub use lifecycle::LifecycleState;
pub use offline::{FileStore, MemoryStore, PersistentStore};
pub use sdk::LokiSdk;
