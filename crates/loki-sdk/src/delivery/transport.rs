// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tracing::debug;

use crate::config::{Config, CorsMode};
use crate::error::SdkError;
use crate::http::build_client;

/// One HTTP POST of an encoded push body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &str, body: Bytes) -> Result<(), SdkError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    headers: HeaderMap,
    cors_mode: CorsMode,
}

impl HttpTransport {
    /// Fails when a configured header is not a valid HTTP header.
    pub fn new(config: &Config) -> Result<Self, SdkError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                SdkError::InvalidConfig(format!("invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                SdkError::InvalidConfig(format!("invalid value for header '{name}': {e}"))
            })?;
            headers.insert(name, value);
        }

        Ok(HttpTransport {
            client: build_client(config.request_timeout)?,
            headers,
            cors_mode: config.cross_origin_mode,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, body: Bytes) -> Result<(), SdkError> {
        let time = tokio::time::Instant::now();
        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| SdkError::Network(e.to_string()))?;

        let status = response.status();
        // Opaque responses: the request went out, nothing more is knowable.
        if status.is_success() || self.cors_mode == CorsMode::NoCors {
            debug!(
                "LOKI | Pushed to {url} with status {status} in {} ms",
                time.elapsed().as_millis()
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SdkError::Transport {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdkOptions;

    fn transport(server_url: &str, cors: CorsMode) -> HttpTransport {
        let mut options = SdkOptions::new("shop", server_url);
        options.headers.insert("X-Scope-OrgID".into(), "tenant-1".into());
        options.cross_origin_mode = Some(cors);
        HttpTransport::new(&Config::resolve(options).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_post_sends_headers_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("content-type", "application/json")
            .match_header("x-scope-orgid", "tenant-1")
            .match_body(r#"{"streams":[]}"#)
            .with_status(204)
            .create_async()
            .await;

        let t = transport(&server.url(), CorsMode::Cors);
        let url = format!("{}/loki/api/v1/push", server.url());
        t.post(&url, Bytes::from_static(br#"{"streams":[]}"#))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_maps_to_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(400)
            .with_body("entry out of order")
            .create_async()
            .await;

        let t = transport(&server.url(), CorsMode::Cors);
        let url = format!("{}/loki/api/v1/push", server.url());
        let err = t.post(&url, Bytes::new()).await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.to_string(), "Loki push failed: 400 entry out of order");
    }

    #[tokio::test]
    async fn test_no_cors_treats_any_response_as_sent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(500)
            .create_async()
            .await;

        let t = transport(&server.url(), CorsMode::NoCors);
        let url = format!("{}/loki/api/v1/push", server.url());
        assert!(t.post(&url, Bytes::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        let t = transport("http://127.0.0.1:1", CorsMode::NoCors);
        let err = t
            .post("http://127.0.0.1:1/loki/api/v1/push", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Network(_)));
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let mut options = SdkOptions::new("shop", "https://logs.example.com");
        options.headers.insert("bad header".into(), "x".into());
        let config = Config::resolve(options).unwrap();
        assert!(matches!(
            HttpTransport::new(&config),
            Err(SdkError::InvalidConfig(_))
        ));
    }
}
