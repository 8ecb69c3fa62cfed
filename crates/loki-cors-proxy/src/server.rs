// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    service::service_fn,
    Method, Request, StatusCode,
};
use serde_json::json;
use std::convert::Infallible;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::http_utils::{
    add_cors_headers, create_response, log_and_create_json_response, preflight_response,
    HttpResponse,
};
use crate::rate_limit::FixedWindowLimiter;

pub const SERVICE_NAME: &str = "loki-cors-proxy";
pub const FORWARDED_BY: &str = "loki-cors-proxy";
pub const RELAY_USER_AGENT: &str = "Loki-SDK-CORS-Proxy/1.0";

const HEALTH_PATH: &str = "/health";
const PROXY_PATH: &str = "/proxy";

/// Request headers that describe the inbound connection rather than the payload.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct RelayServer {
    client: reqwest::Client,
    limiter: FixedWindowLimiter,
}

impl RelayServer {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RelayError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(RelayServer {
            client,
            limiter: FixedWindowLimiter::new(config.rate_limit_max, config.rate_limit_window),
        })
    }

    /// Routes one fully-buffered request from `peer`.
    pub async fn handle(&self, req: Request<Bytes>, peer: IpAddr) -> HttpResponse {
        if req.method() == Method::OPTIONS {
            return preflight_response();
        }

        if !self.limiter.check(peer) {
            return log_and_create_json_response(
                json!({ "error": format!("too many requests from {peer}, try again later") }),
                StatusCode::TOO_MANY_REQUESTS,
            );
        }

        let path = req.uri().path();
        if path == HEALTH_PATH && req.method() == Method::GET {
            return log_and_create_json_response(
                json!({
                    "status": "ok",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "service": SERVICE_NAME,
                }),
                StatusCode::OK,
            );
        }

        if path == PROXY_PATH || path.starts_with("/proxy/") {
            return match self.forward(req).await {
                Ok(response) => response,
                Err(e) => log_and_create_json_response(
                    json!({ "error": e.label(), "message": e.to_string() }),
                    StatusCode::BAD_GATEWAY,
                ),
            };
        }

        log_and_create_json_response(
            json!({ "error": "not found", "available": [HEALTH_PATH, PROXY_PATH] }),
            StatusCode::NOT_FOUND,
        )
    }

    async fn forward(&self, req: Request<Bytes>) -> Result<HttpResponse, RelayError> {
        let target = target_from_query(req.uri().query())?;
        let (parts, body) = req.into_parts();

        let mut headers = forwardable_headers(&parts.headers);
        headers.insert(
            HeaderName::from_static("x-forwarded-by"),
            HeaderValue::from_static(FORWARDED_BY),
        );
        headers.insert(header::USER_AGENT, HeaderValue::from_static(RELAY_USER_AGENT));

        let time = Instant::now();
        let upstream = self
            .client
            .request(parts.method.clone(), target.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
        let body = upstream
            .bytes()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        debug!(
            "RELAY | {} {target} -> {status} in {} ms",
            parts.method,
            time.elapsed().as_millis()
        );

        let mut response = create_response(status, body);
        if let Some(content_type) = content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        add_cors_headers(response.headers_mut());
        Ok(response)
    }

    /// Accepts connections until `cancel` fires. In-flight connections are aborted on stop.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), RelayError> {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let (conn, peer) = tokio::select! {
                () = cancel.cancelled() => break,
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("RELAY | Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, peer)) => (conn, peer.ip()),
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("RELAY | Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };

            let relay = Arc::clone(&self);
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let relay = Arc::clone(&relay);
                async move {
                    let (parts, body) = req.into_parts();
                    let body = match body.collect().await {
                        Ok(collected) => collected.to_bytes(),
                        Err(e) => {
                            return Ok::<_, Infallible>(log_and_create_json_response(
                                json!({ "error": "invalid request body", "message": e.to_string() }),
                                StatusCode::BAD_REQUEST,
                            ));
                        }
                    };
                    Ok(relay.handle(Request::from_parts(parts, body), peer).await)
                }
            });

            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    debug!("RELAY | Connection error: {e}");
                }
            });
        }

        debug!("RELAY | Stopping, aborting {} open connections", joinset.len());
        joinset.shutdown().await;
        Ok(())
    }
}

/// Extracts the absolute `http`/`https` URL passed as `?target=`.
fn target_from_query(query: Option<&str>) -> Result<Url, RelayError> {
    let raw = query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "target")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|value| !value.is_empty())
        .ok_or(RelayError::MissingTarget)?;

    let target = Url::parse(&raw).map_err(|_| RelayError::InvalidTarget(raw.clone()))?;
    if !matches!(target.scheme(), "http" | "https") || target.host_str().is_none() {
        return Err(RelayError::InvalidTarget(raw));
    }
    Ok(target)
}

fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    inbound
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
