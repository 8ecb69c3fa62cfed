// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{net::SocketAddr, process, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use loki_cors_proxy::{RelayConfig, RelayServer};

#[tokio::main]
pub async fn main() {
    let config = RelayConfig::from_env();
    let env_filter = match &config {
        Ok(config) => config.env_filter(),
        Err(_) => RelayConfig::default().env_filter(),
    };

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("RELAY | {e}");
            process::exit(1);
        }
    };

    let relay = match RelayServer::new(&config) {
        Ok(relay) => Arc::new(relay),
        Err(e) => {
            error!("RELAY | {e}");
            process::exit(1);
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("RELAY | Failed to bind {addr}: {e}");
            process::exit(1);
        }
    };
    info!("RELAY | Listening on http://{addr}, forwarding via /proxy?target=<loki-url>");

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("RELAY | Failed to listen for shutdown signal: {e}");
            return;
        }
        info!("RELAY | Shutdown signal received");
        stop.cancel();
    });

    if let Err(e) = relay.serve(listener, cancel).await {
        error!("RELAY | {e}");
        process::exit(1);
    }
}
