// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header::{self, HeaderMap, HeaderValue},
    Response, StatusCode,
};
use serde_json::Value;
use tracing::{debug, error, warn};

pub type HttpResponse = Response<Full<Bytes>>;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Requested-With";

/// Overwrites the `Access-Control-Allow-*` headers so any origin may read the response.
pub fn add_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
}

/// Builds a response with the CORS headers already applied.
pub fn create_response(status: StatusCode, body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    add_cors_headers(response.headers_mut());
    response
}

/// Answer to a preflight request.
pub fn preflight_response() -> HttpResponse {
    create_response(StatusCode::NO_CONTENT, Bytes::new())
}

/// Does two things:
/// 1. Logs the given body. Success statuses are logged at debug, client errors at warn and
///    everything else at error.
/// 2. Returns the body as JSON with the given status code and the CORS headers.
pub fn log_and_create_json_response(body: Value, status: StatusCode) -> HttpResponse {
    if status.is_success() {
        debug!("RELAY | {status} {body}");
    } else if status.is_client_error() {
        warn!("RELAY | {status} {body}");
    } else {
        error!("RELAY | {status} {body}");
    }
    let mut response = create_response(status, Bytes::from(body.to_string()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn get_response_body_as_string(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_json_response_has_cors_and_content_type() {
        let response = log_and_create_json_response(
            json!({"error": "not found"}),
            StatusCode::NOT_FOUND,
        );
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], ALLOW_METHODS);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], ALLOW_HEADERS);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            get_response_body_as_string(response).await,
            "{\"error\":\"not found\"}"
        );
    }

    #[tokio::test]
    async fn test_preflight_is_empty_no_content() {
        let response = preflight_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(get_response_body_as_string(response).await, "");
    }

    #[test]
    fn test_add_cors_headers_overwrites_upstream_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://only.example.com"),
        );
        add_cors_headers(&mut headers);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers.get_all(header::ACCESS_CONTROL_ALLOW_ORIGIN).iter().count(), 1);
    }
}
