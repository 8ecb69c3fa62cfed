// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities for relay integration tests

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use loki_cors_proxy::{RelayConfig, RelayServer};

pub struct RunningRelay {
    pub base_url: String,
    pub cancel: CancellationToken,
    pub handle: tokio::task::JoinHandle<Result<(), loki_cors_proxy::RelayError>>,
}

/// Starts a relay on an ephemeral loopback port.
pub async fn start_relay(config: RelayConfig) -> RunningRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = Arc::new(RelayServer::new(&config).unwrap());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(relay.serve(listener, cancel.clone()));

    RunningRelay {
        base_url: format!("http://{addr}"),
        cancel,
        handle,
    }
}

pub fn proxy_url(base_url: &str, target: &str) -> String {
    format!(
        "{base_url}/proxy?target={}",
        url::form_urlencoded::byte_serialize(target.as_bytes()).collect::<String>()
    )
}
