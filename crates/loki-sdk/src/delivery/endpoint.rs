// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! URL derivation for each transmission mechanism.

use url::form_urlencoded::byte_serialize;
use url::Url;

use crate::config::Config;
use crate::constants::{
    DEV_HOST_SUFFIXES, DEV_PORTS, LOCAL_RELAY_URL, LOKI_PUSH_PATH, RELAY_SUBDOMAIN,
};
use crate::context::PageInfo;
use crate::error::SdkError;

/// Appends the push path to `base` unless it is already there.
pub fn ensure_push_url(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with(LOKI_PUSH_PATH) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{LOKI_PUSH_PATH}")
    }
}

/// Origin (`scheme://host[:port]`) of the page, if it has one.
pub fn page_origin(page: &PageInfo) -> Option<String> {
    let parsed = Url::parse(&page.url).ok()?;
    match parsed.origin() {
        origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

/// Same-origin proxy URL: page origin + proxy path + push path.
pub fn proxy_url(page: &PageInfo, proxy_path: &str) -> Result<String, SdkError> {
    let origin = page_origin(page).ok_or_else(|| {
        SdkError::UnsupportedCapability("proxy delivery needs a page origin".to_string())
    })?;
    Ok(format!(
        "{origin}{}{LOKI_PUSH_PATH}",
        proxy_path.trim_end_matches('/')
    ))
}

pub fn relay_target_url(relay_base: &str, endpoint: &str) -> String {
    let target: String = byte_serialize(endpoint.as_bytes()).collect();
    format!("{}/proxy?target={target}", relay_base.trim_end_matches('/'))
}

/// Picks the relay base URL.
///
/// An explicit `relay_url` always wins. Otherwise, when auto-detection is on,
/// development-looking pages use the local relay and anything else gets
/// `cors-proxy.<last two labels of the hostname>`.
pub fn resolve_relay_base(config: &Config, page: &PageInfo) -> Option<String> {
    if let Some(relay) = &config.relay_url {
        return Some(relay.clone());
    }
    if !config.auto_detect_relay {
        return None;
    }

    let parsed = Url::parse(&page.url).ok()?;
    let host = parsed.host_str()?;
    if is_dev_host(host, parsed.port()) {
        return Some(LOCAL_RELAY_URL.to_string());
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }
    let domain = labels[labels.len() - 2..].join(".");
    Some(format!("https://{RELAY_SUBDOMAIN}.{domain}"))
}

fn is_dev_host(host: &str, port: Option<u16>) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "0.0.0.0")
        || port.is_some_and(|p| DEV_PORTS.contains(&p))
        || DEV_HOST_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}
