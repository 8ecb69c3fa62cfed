// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Normalized log/error records.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::context::ContextSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Error,
    ManualLog,
}

/// One record in the queue. Identity is its position, not an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Wall clock in milliseconds scaled to nanoseconds. Serialized as a string.
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp_ns: u64,
    pub level: LogLevel,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
    pub context: ContextSnapshot,
}

fn serialize_timestamp<S: Serializer>(ts: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_string())
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        Raw::Number(n) => Ok(n),
    }
}

/// Any value a host error channel can hand to `capture_error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorValue {
    /// A native error with its message and, when known, a stack or cause chain.
    Native {
        message: String,
        stack: Option<String>,
    },
    Text(String),
    /// Structured value; its `message` (and `stack`) fields are used when present.
    Object(Value),
}

impl ErrorValue {
    /// Captures an error and its `source()` chain as the stack.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        ErrorValue::Native {
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| causes.join("\n")),
        }
    }

    fn normalize(self) -> (String, Option<String>) {
        match self {
            ErrorValue::Native { message, stack } => (message, stack),
            ErrorValue::Text(message) => (message, None),
            ErrorValue::Object(value) => {
                let message = match value.get("message") {
                    Some(Value::String(m)) if !m.is_empty() => m.clone(),
                    _ => value.to_string(),
                };
                let stack = value
                    .get("stack")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                (message, stack)
            }
        }
    }
}

impl From<&str> for ErrorValue {
    fn from(message: &str) -> Self {
        ErrorValue::Text(message.to_string())
    }
}

impl From<String> for ErrorValue {
    fn from(message: String) -> Self {
        ErrorValue::Text(message)
    }
}

impl From<Value> for ErrorValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(message) => ErrorValue::Text(message),
            other => ErrorValue::Object(other),
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ErrorValue {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        ErrorValue::from_error(err.as_ref())
    }
}

pub fn now_ns() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    millis.saturating_mul(1_000_000)
}

/// Bernoulli trial against `rate`.
pub fn sample(rate: f64) -> bool {
    rand::random::<f64>() < rate
}

pub fn build_error_envelope(
    error: ErrorValue,
    context: &ContextSnapshot,
    attributes: Option<Map<String, Value>>,
    title: Option<String>,
) -> Envelope {
    let (message, stack) = error.normalize();
    Envelope {
        timestamp_ns: now_ns(),
        level: LogLevel::Error,
        kind: EnvelopeKind::Error,
        message,
        title,
        stack,
        attributes,
        context: context.clone(),
    }
}

pub fn build_log_envelope(
    level: LogLevel,
    message: &str,
    context: &ContextSnapshot,
    attributes: Option<Map<String, Value>>,
    title: Option<String>,
) -> Envelope {
    Envelope {
        timestamp_ns: now_ns(),
        level,
        kind: EnvelopeKind::ManualLog,
        message: message.to_string(),
        title,
        stack: None,
        attributes,
        context: context.clone(),
    }
}
