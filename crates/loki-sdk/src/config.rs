// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Caller options and the resolved, immutable configuration.
//!
//! [`SdkOptions`] mirrors what an application passes to `init`: every field is
//! optional except the application name. [`Config::resolve`] fills in the
//! defaults, validates the result and derives the push endpoint once.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::*;
use crate::delivery::endpoint::ensure_push_url;
use crate::envelope::Envelope;
use crate::error::SdkError;

/// How the host's cross-origin policy treats direct requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorsMode {
    #[default]
    Cors,
    /// Responses are opaque: a completed request counts as accepted.
    NoCors,
    /// Direct sends to another origin are refused before they leave.
    SameOrigin,
}

/// Which transmission mechanisms a flush uses, and in what order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    Direct,
    #[serde(alias = "fireAndForgetOnly")]
    Beacon,
    Proxy,
    #[serde(alias = "corsProxy", alias = "cors-proxy")]
    Relay,
    Fallback,
    #[default]
    Auto,
}

/// A single transmission mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mechanism {
    Direct,
    Beacon,
    Proxy,
    Relay,
}

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Direct => "direct",
            Mechanism::Beacon => "beacon",
            Mechanism::Proxy => "proxy",
            Mechanism::Relay => "relay",
        }
    }
}

pub const DEFAULT_FALLBACK_CHAIN: [Mechanism; 3] =
    [Mechanism::Direct, Mechanism::Beacon, Mechanism::Proxy];

type RedactFn = dyn Fn(Envelope) -> Option<Envelope> + Send + Sync;
type ErrorFn = dyn Fn(&SdkError) + Send + Sync;

/// Caller-supplied envelope transform. Returning `None` drops the envelope.
#[derive(Clone)]
pub struct RedactHook(Arc<RedactFn>);

impl RedactHook {
    pub fn new(f: impl Fn(Envelope) -> Option<Envelope> + Send + Sync + 'static) -> Self {
        RedactHook(Arc::new(f))
    }

    pub fn apply(&self, envelope: Envelope) -> Option<Envelope> {
        (self.0)(envelope)
    }
}

impl Debug for RedactHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RedactHook")
    }
}

/// Receives every failure that happens after an envelope was accepted.
#[derive(Clone)]
pub struct ErrorHook(Arc<ErrorFn>);

impl ErrorHook {
    pub fn new(f: impl Fn(&SdkError) + Send + Sync + 'static) -> Self {
        ErrorHook(Arc::new(f))
    }

    pub fn call(&self, err: &SdkError) {
        (self.0)(err)
    }
}

impl Debug for ErrorHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ErrorHook")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedactOptions {
    /// Strip query string and fragment from `context.page.url`. Defaults to true.
    pub url_query: Option<bool>,
    /// Header names removed from an `attributes.headers` object.
    pub headers: Vec<String>,
    #[serde(skip)]
    pub custom: Option<RedactHook>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoints {
    #[serde(alias = "loki")]
    pub ingest_url: Option<String>,
}

/// Options recognised by [`crate::LokiSdk::init`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SdkOptions {
    pub app_name: String,
    pub app_version: Option<String>,
    pub release: Option<String>,
    pub environment: Option<String>,
    pub endpoints: Endpoints,
    /// Extra headers sent with every HTTP push.
    pub headers: HashMap<String, String>,
    pub batch_max_bytes: Option<usize>,
    pub batch_max_records: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    #[serde(alias = "useSendBeacon")]
    pub use_fire_and_forget_on_exit: Option<bool>,
    pub enable_offline_buffer: Option<bool>,
    pub sample_rate: Option<f64>,
    pub rate_limit_per_min: Option<u32>,
    #[serde(alias = "corsMode")]
    pub cross_origin_mode: Option<CorsMode>,
    pub use_proxy: Option<bool>,
    pub proxy_path: Option<String>,
    #[serde(alias = "transportMode")]
    pub delivery_mode: Option<DeliveryMode>,
    pub fallback_chain: Option<Vec<Mechanism>>,
    #[serde(alias = "corsProxyUrl")]
    pub relay_url: Option<String>,
    pub auto_detect_relay: Option<bool>,
    pub storage_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub redact: RedactOptions,
    #[serde(skip)]
    pub on_error: Option<ErrorHook>,
}

impl SdkOptions {
    pub fn new(app_name: &str, ingest_url: &str) -> Self {
        SdkOptions {
            app_name: app_name.to_string(),
            endpoints: Endpoints {
                ingest_url: Some(ingest_url.to_string()),
            },
            ..Default::default()
        }
    }

    /// Parses options from a JSON document. Callbacks must be set afterwards.
    pub fn from_json(raw: &str) -> Result<Self, SdkError> {
        serde_json::from_str(raw).map_err(|e| SdkError::InvalidConfig(e.to_string()))
    }

    #[must_use]
    pub fn with_on_error(mut self, f: impl Fn(&SdkError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(ErrorHook::new(f));
        self
    }

    #[must_use]
    pub fn with_redact(
        mut self,
        f: impl Fn(Envelope) -> Option<Envelope> + Send + Sync + 'static,
    ) -> Self {
        self.redact.custom = Some(RedactHook::new(f));
        self
    }
}

#[derive(Debug, Clone)]
pub struct RedactConfig {
    pub url_query: bool,
    pub headers: Vec<String>,
    pub custom: Option<RedactHook>,
}

/// Fully resolved configuration. Built once per instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub release: String,
    pub environment: String,
    /// Push URL derived from `endpoints.ingest_url`.
    pub endpoint: Option<String>,
    pub headers: HashMap<String, String>,
    pub batch_max_bytes: usize,
    pub batch_max_records: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub use_fire_and_forget_on_exit: bool,
    pub enable_offline_buffer: bool,
    pub sample_rate: f64,
    pub rate_limit_per_min: u32,
    pub cross_origin_mode: CorsMode,
    pub proxy_path: String,
    pub delivery_mode: DeliveryMode,
    pub fallback_chain: Vec<Mechanism>,
    pub relay_url: Option<String>,
    pub auto_detect_relay: bool,
    pub storage_key: String,
    pub request_timeout: Duration,
    pub redact: RedactConfig,
    pub on_error: Option<ErrorHook>,
}

impl Config {
    pub fn resolve(options: SdkOptions) -> Result<Config, SdkError> {
        let app_version = options
            .app_version
            .unwrap_or_else(|| DEFAULT_APP_VERSION.to_string());
        let release = options.release.unwrap_or_else(|| app_version.clone());

        let delivery_mode = match (options.delivery_mode, options.use_proxy) {
            (Some(mode), _) => mode,
            (None, Some(true)) => DeliveryMode::Proxy,
            (None, _) => DeliveryMode::Auto,
        };

        let endpoint = options
            .endpoints
            .ingest_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(ensure_push_url);

        let config = Config {
            app_name: options.app_name.trim().to_string(),
            app_version,
            release,
            environment: options
                .environment
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            endpoint,
            headers: options.headers,
            batch_max_bytes: options.batch_max_bytes.unwrap_or(DEFAULT_BATCH_MAX_BYTES),
            batch_max_records: options
                .batch_max_records
                .unwrap_or(DEFAULT_BATCH_MAX_RECORDS),
            flush_interval: Duration::from_millis(
                options.flush_interval_ms.unwrap_or(DEFAULT_FLUSH_INTERVAL_MS),
            ),
            max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            backoff_ms: options.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS),
            use_fire_and_forget_on_exit: options.use_fire_and_forget_on_exit.unwrap_or(true),
            enable_offline_buffer: options.enable_offline_buffer.unwrap_or(true),
            sample_rate: options.sample_rate.unwrap_or(1.0),
            rate_limit_per_min: options
                .rate_limit_per_min
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_MIN),
            cross_origin_mode: options.cross_origin_mode.unwrap_or_default(),
            proxy_path: options
                .proxy_path
                .unwrap_or_else(|| DEFAULT_PROXY_PATH.to_string()),
            delivery_mode,
            fallback_chain: options
                .fallback_chain
                .unwrap_or_else(|| DEFAULT_FALLBACK_CHAIN.to_vec()),
            relay_url: options
                .relay_url
                .map(|u| u.trim_end_matches('/').to_string()),
            auto_detect_relay: options.auto_detect_relay.unwrap_or(true),
            storage_key: options
                .storage_key
                .unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_string()),
            request_timeout: Duration::from_millis(
                options
                    .request_timeout_ms
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            redact: RedactConfig {
                url_query: options.redact.url_query.unwrap_or(true),
                headers: options.redact.headers,
                custom: options.redact.custom,
            },
            on_error: options.on_error,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SdkError> {
        if self.app_name.is_empty() {
            return Err(SdkError::InvalidConfig("appName cannot be empty".to_string()));
        }

        match &self.endpoint {
            Some(endpoint) => check_http_url("endpoints.ingestUrl", endpoint)?,
            None if self.delivery_mode != DeliveryMode::Proxy => {
                return Err(SdkError::InvalidConfig(
                    "endpoints.ingestUrl is required unless deliveryMode is proxy".to_string(),
                ));
            }
            None => {}
        }

        if let Some(relay) = &self.relay_url {
            check_http_url("relayUrl", relay)?;
        }

        if !self.proxy_path.starts_with('/') {
            return Err(SdkError::InvalidConfig(format!(
                "proxyPath must be an absolute path, got '{}'",
                self.proxy_path
            )));
        }

        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(SdkError::InvalidConfig(format!(
                "sampleRate must be within [0, 1], got {}",
                self.sample_rate
            )));
        }

        if self.batch_max_records == 0 || self.batch_max_bytes == 0 {
            return Err(SdkError::InvalidConfig(
                "batch limits must be greater than 0".to_string(),
            ));
        }

        if self.flush_interval.is_zero() {
            return Err(SdkError::InvalidConfig(
                "flushIntervalMs must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_per_min == 0 {
            return Err(SdkError::InvalidConfig(
                "rateLimitPerMin must be greater than 0".to_string(),
            ));
        }

        if self.fallback_chain.is_empty() {
            return Err(SdkError::InvalidConfig(
                "fallbackChain cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub(crate) fn report(&self, err: &SdkError) {
        if let Some(hook) = &self.on_error {
            hook.call(err);
        }
    }
}

fn check_http_url(field: &str, raw: &str) -> Result<(), SdkError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| SdkError::InvalidConfig(format!("{field} '{raw}' is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SdkError::InvalidConfig(format!(
            "{field} must use http or https, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::resolve(SdkOptions::new("shop", "https://logs.example.com")).unwrap();

        assert_eq!(config.app_version, "1.0.0");
        assert_eq!(config.release, "1.0.0");
        assert_eq!(config.environment, "prod");
        assert_eq!(
            config.endpoint.as_deref(),
            Some("https://logs.example.com/loki/api/v1/push")
        );
        assert_eq!(config.batch_max_bytes, 512 * 1024);
        assert_eq!(config.batch_max_records, 100);
        assert_eq!(config.flush_interval, Duration::from_millis(2000));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_ms, 1000);
        assert!(config.use_fire_and_forget_on_exit);
        assert!(config.enable_offline_buffer);
        assert_eq!(config.sample_rate, 1.0);
        assert_eq!(config.rate_limit_per_min, 300);
        assert_eq!(config.cross_origin_mode, CorsMode::Cors);
        assert_eq!(config.proxy_path, "/api/loki");
        assert_eq!(config.delivery_mode, DeliveryMode::Auto);
        assert_eq!(config.fallback_chain, DEFAULT_FALLBACK_CHAIN.to_vec());
        assert!(config.auto_detect_relay);
        assert!(config.redact.url_query);
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
    }

    #[test]
    fn test_release_falls_back_to_version() {
        let options = SdkOptions {
            app_version: Some("3.2.1".into()),
            ..SdkOptions::new("shop", "https://logs.example.com")
        };
        let config = Config::resolve(options).unwrap();
        assert_eq!(config.release, "3.2.1");
    }

    #[test]
    fn test_use_proxy_selects_proxy_mode() {
        let options = SdkOptions {
            use_proxy: Some(true),
            endpoints: Endpoints::default(),
            ..SdkOptions::new("shop", "")
        };
        let config = Config::resolve(options).unwrap();
        assert_eq!(config.delivery_mode, DeliveryMode::Proxy);
        assert_eq!(config.endpoint, None);

        let options = SdkOptions {
            use_proxy: Some(true),
            delivery_mode: Some(DeliveryMode::Direct),
            ..SdkOptions::new("shop", "https://logs.example.com")
        };
        assert_eq!(
            Config::resolve(options).unwrap().delivery_mode,
            DeliveryMode::Direct
        );
    }

    #[test]
    fn test_from_json() {
        let raw = r#"{
            "appName": "shop",
            "environment": "staging",
            "endpoints": { "loki": "https://logs.example.com/" },
            "batchMaxRecords": 10,
            "useSendBeacon": false,
            "corsMode": "no-cors",
            "deliveryMode": "fireAndForgetOnly",
            "fallbackChain": ["relay", "direct"],
            "redact": { "urlQuery": false, "headers": ["authorization"] }
        }"#;
        let config = Config::resolve(SdkOptions::from_json(raw).unwrap()).unwrap();
        assert_eq!(config.environment, "staging");
        assert_eq!(
            config.endpoint.as_deref(),
            Some("https://logs.example.com/loki/api/v1/push")
        );
        assert_eq!(config.batch_max_records, 10);
        assert!(!config.use_fire_and_forget_on_exit);
        assert_eq!(config.cross_origin_mode, CorsMode::NoCors);
        assert_eq!(config.delivery_mode, DeliveryMode::Beacon);
        assert_eq!(
            config.fallback_chain,
            vec![Mechanism::Relay, Mechanism::Direct]
        );
        assert!(!config.redact.url_query);
        assert_eq!(config.redact.headers, vec!["authorization".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let invalid = |options: SdkOptions| Config::resolve(options).is_err();

        assert!(invalid(SdkOptions::new("  ", "https://logs.example.com")));
        assert!(invalid(SdkOptions::new("shop", "not a url")));
        assert!(invalid(SdkOptions::new("shop", "ftp://logs.example.com")));
        assert!(invalid(SdkOptions::new("shop", "")));
        assert!(invalid(SdkOptions {
            sample_rate: Some(1.5),
            ..SdkOptions::new("shop", "https://logs.example.com")
        }));
        assert!(invalid(SdkOptions {
            batch_max_records: Some(0),
            ..SdkOptions::new("shop", "https://logs.example.com")
        }));
        assert!(invalid(SdkOptions {
            rate_limit_per_min: Some(0),
            ..SdkOptions::new("shop", "https://logs.example.com")
        }));
        assert!(invalid(SdkOptions {
            proxy_path: Some("api/loki".into()),
            ..SdkOptions::new("shop", "https://logs.example.com")
        }));
        assert!(invalid(SdkOptions {
            relay_url: Some("relay".into()),
            ..SdkOptions::new("shop", "https://logs.example.com")
        }));
        assert!(invalid(SdkOptions {
            fallback_chain: Some(vec![]),
            ..SdkOptions::new("shop", "https://logs.example.com")
        }));
    }

    #[test]
    fn test_report_calls_hook() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let options = SdkOptions::new("shop", "https://logs.example.com")
            .with_on_error(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let config = Config::resolve(options).unwrap();
        config.report(&SdkError::Network("down".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
