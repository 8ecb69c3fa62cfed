// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Standalone HTTP relay for Loki pushes made from pages that cannot reach
//! the ingestion endpoint cross-origin.
//!
//! `/proxy?target=<url>` forwards the request to `target` and answers with
//! permissive `Access-Control-Allow-*` headers. `/health` reports liveness.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod error;
pub mod http_utils;
pub mod rate_limit;
pub mod server;

pub use config::RelayConfig;
pub use error::RelayError;
pub use server::RelayServer;
