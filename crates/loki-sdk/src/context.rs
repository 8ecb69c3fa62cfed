// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment facts attached to every envelope.
//!
//! The snapshot is captured once at init. `app`, `page` and `device` come from
//! the configuration and the host; `user` and any custom top-level keys can be
//! patched later. Envelopes clone the snapshot when they are built, so a patch
//! never rewrites records that are already queued.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::SdkError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Location of the page (or screen) the host is currently showing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

impl PageInfo {
    /// Builds page info from a full URL, deriving `path` from it.
    pub fn from_url(raw: &str) -> Self {
        let path = url::Url::parse(raw)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        PageInfo {
            url: raw.to_string(),
            path,
            referrer: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub ua: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub app: AppInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(default)]
    pub page: PageInfo,
    #[serde(default)]
    pub device: DeviceInfo,
    /// Custom top-level fields added through [`ContextSnapshot::merge`].
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContextSnapshot {
    pub fn initial(config: &Config, page: PageInfo, mut device: DeviceInfo) -> Self {
        if device.browser.is_none() {
            device.browser = Some(detect_browser(&device.ua).to_string());
        }
        ContextSnapshot {
            app: AppInfo {
                name: config.app_name.clone(),
                version: Some(config.app_version.clone()),
                env: Some(config.environment.clone()),
                release: Some(config.release.clone()),
            },
            user: Some(UserInfo {
                session_id: Some(generate_session_id()),
                ..Default::default()
            }),
            page,
            device,
            extra: Map::new(),
        }
    }

    pub fn set_user(&mut self, user_id: Option<String>) {
        self.user.get_or_insert_with(UserInfo::default).id = user_id;
    }

    /// Applies a partial update.
    ///
    /// Object values are merged field by field into the existing section of
    /// the same name; anything else replaces the key. A patch that leaves the
    /// snapshot in an invalid shape is rejected and nothing changes.
    pub fn merge(&mut self, patch: &Map<String, Value>) -> Result<(), SdkError> {
        let mut current = serde_json::to_value(&*self)?;
        let Some(fields) = current.as_object_mut() else {
            return Err(SdkError::Serialization(
                "context did not serialize to an object".to_string(),
            ));
        };
        for (key, value) in patch {
            match (fields.get_mut(key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.insert(k.clone(), v.clone());
                    }
                }
                _ => {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }
        *self = serde_json::from_value(current)?;
        Ok(())
    }
}

/// Best-effort browser family from a user agent string.
///
/// Order matters: Edge and Opera user agents also mention Chrome, and Chrome
/// mentions Safari.
pub fn detect_browser(user_agent: &str) -> &'static str {
    if user_agent.is_empty() {
        return "unknown";
    }
    let ua = user_agent.to_lowercase();
    if ua.contains("edg/") || ua.contains("edge/") {
        "edge"
    } else if ua.contains("opr/") || ua.contains("opera/") {
        "opera"
    } else if ua.contains("chrome/") {
        "chrome"
    } else if ua.contains("firefox/") {
        "firefox"
    } else if ua.contains("safari/") {
        "safari"
    } else if ua.contains("msie") || ua.contains("trident/") {
        "ie"
    } else {
        "unknown"
    }
}

/// Random base-36 prefix followed by the base-36 wall clock in milliseconds.
pub fn generate_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let mut id: String = (0..11)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    let mut millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let mut suffix = Vec::new();
    while millis > 0 {
        suffix.push(ALPHABET[(millis % 36) as usize]);
        millis /= 36;
    }
    suffix.reverse();
    id.push_str(&String::from_utf8_lossy(&suffix));
    id
}
