// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transforms applied to every envelope before it is queued.

use serde_json::Value;

use crate::config::RedactConfig;
use crate::envelope::Envelope;

/// Runs the custom hook, then URL and header scrubbing.
///
/// Returns `None` when the hook drops the envelope. The hook runs outside any
/// panic guard: it is caller code and a panic there reaches the caller.
pub fn apply_redaction(envelope: Envelope, redact: &RedactConfig) -> Option<Envelope> {
    let mut envelope = match &redact.custom {
        Some(hook) => hook.apply(envelope)?,
        None => envelope,
    };

    if redact.url_query && !envelope.context.page.url.is_empty() {
        if let Some(stripped) = strip_query(&envelope.context.page.url) {
            envelope.context.page.url = stripped;
        }
    }

    if !redact.headers.is_empty() {
        strip_headers(&mut envelope, &redact.headers);
    }

    Some(envelope)
}

/// Origin plus path. `None` when the input does not parse as a URL.
pub fn strip_query(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(format!("{}{}", origin.ascii_serialization(), url.path()))
}

fn strip_headers(envelope: &mut Envelope, names: &[String]) {
    let Some(Value::Object(headers)) = envelope
        .attributes
        .as_mut()
        .and_then(|attrs| attrs.get_mut("headers"))
    else {
        return;
    };
    headers.retain(|key, _| !names.iter().any(|name| name.eq_ignore_ascii_case(key)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedactHook;
    use crate::context::{ContextSnapshot, PageInfo};
    use crate::envelope::{build_log_envelope, LogLevel};
    use serde_json::{json, Map};

    fn envelope_with_url(url: &str) -> Envelope {
        let ctx = ContextSnapshot {
            page: PageInfo::from_url(url),
            ..Default::default()
        };
        build_log_envelope(LogLevel::Info, "hello", &ctx, None, None)
    }

    fn config(url_query: bool) -> RedactConfig {
        RedactConfig {
            url_query,
            headers: vec![],
            custom: None,
        }
    }

    #[test]
    fn test_strips_query_and_fragment() {
        let env = apply_redaction(envelope_with_url("https://x.test/a?b=1#c"), &config(true)).unwrap();
        assert_eq!(env.context.page.url, "https://x.test/a");
    }

    #[test]
    fn test_keeps_port_in_origin() {
        assert_eq!(
            strip_query("http://localhost:5173/app/?token=abc").as_deref(),
            Some("http://localhost:5173/app/")
        );
        assert_eq!(strip_query("not a url"), None);
    }

    #[test]
    fn test_url_untouched_when_disabled_or_invalid() {
        let env = apply_redaction(envelope_with_url("https://x.test/a?b=1"), &config(false)).unwrap();
        assert_eq!(env.context.page.url, "https://x.test/a?b=1");

        let env = apply_redaction(envelope_with_url("garbage?x=1"), &config(true)).unwrap();
        assert_eq!(env.context.page.url, "garbage?x=1");
    }

    #[test]
    fn test_custom_hook_can_drop_or_modify() {
        let mut cfg = config(true);
        cfg.custom = Some(RedactHook::new(|env: Envelope| {
            if env.message.contains("secret") {
                None
            } else {
                Some(Envelope {
                    message: env.message.to_uppercase(),
                    ..env
                })
            }
        }));

        let mut dropped = envelope_with_url("https://x.test/a");
        dropped.message = "secret token".into();
        assert!(apply_redaction(dropped, &cfg).is_none());

        let kept = apply_redaction(envelope_with_url("https://x.test/a?q=1"), &cfg).unwrap();
        assert_eq!(kept.message, "HELLO");
        assert_eq!(kept.context.page.url, "https://x.test/a");
    }

    #[test]
    #[should_panic(expected = "redaction bug")]
    fn test_custom_hook_panic_propagates() {
        let mut cfg = config(false);
        cfg.custom = Some(RedactHook::new(|_| panic!("redaction bug")));
        apply_redaction(envelope_with_url("https://x.test/a"), &cfg);
    }

    #[test]
    fn test_strips_named_headers_case_insensitively() {
        let mut env = envelope_with_url("https://x.test/a");
        let mut attrs = Map::new();
        attrs.insert(
            "headers".into(),
            json!({ "Authorization": "Bearer x", "cookie": "a=b", "accept": "*/*" }),
        );
        env.attributes = Some(attrs);

        let cfg = RedactConfig {
            url_query: false,
            headers: vec!["authorization".into(), "Cookie".into()],
            custom: None,
        };
        let env = apply_redaction(env, &cfg).unwrap();
        assert_eq!(
            env.attributes.unwrap()["headers"],
            json!({ "accept": "*/*" })
        );
    }
}
