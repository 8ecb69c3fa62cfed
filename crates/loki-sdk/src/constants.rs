// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults and fixed limits for the delivery pipeline.

/// Path appended to the ingest base URL when it is not already present.
pub const LOKI_PUSH_PATH: &str = "/loki/api/v1/push";

/// Label value identifying this library in every stream.
pub const SDK_VERSION_TAG: &str = concat!("loki-sdk@", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_APP_VERSION: &str = "1.0.0";
pub const DEFAULT_ENVIRONMENT: &str = "prod";
pub const DEFAULT_PLATFORM: &str = "web";

/// Maximum serialized bytes per batch (512 KiB).
pub const DEFAULT_BATCH_MAX_BYTES: usize = 512 * 1024;
pub const DEFAULT_BATCH_MAX_RECORDS: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_RATE_LIMIT_PER_MIN: u32 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PROXY_PATH: &str = "/api/loki";

/// Durable key holding the offline buffer.
pub const DEFAULT_STORAGE_KEY: &str = "loki-sdk-offline-buffer";

/// Only the most recent records survive a persist.
pub const MAX_OFFLINE_RECORDS: usize = 50;

/// Relay used when the page looks like a local development setup.
pub const LOCAL_RELAY_URL: &str = "http://localhost:3000";

/// Subdomain prepended to the registrable domain for production relays.
pub const RELAY_SUBDOMAIN: &str = "cors-proxy";

/// Ports commonly bound by local dev servers.
pub const DEV_PORTS: &[u16] = &[3000, 3001, 4200, 5173, 5174, 8000, 8080, 8081, 8888];

pub const DEV_HOST_SUFFIXES: &[&str] = &[".local", ".localhost", ".test"];
