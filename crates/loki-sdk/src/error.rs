// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the SDK.
///
/// Capture calls never return these; they reach the configured `on_error`
/// callback instead. Only [`crate::LokiSdk::init`] returns them directly.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SdkError {
    #[error("SDK already initialized")]
    AlreadyInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Loki push failed: {status} {body}")]
    Transport { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("All delivery strategies failed: {}", .0.join("; "))]
    AllStrategiesFailed(Vec<String>),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl SdkError {
    /// HTTP status carried by the failure, if one was observed.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            SdkError::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Client errors other than 429 will fail the same way on every attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SdkError::Transport { status, .. } => !((400..500).contains(status) && *status != 429),
            SdkError::Network(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SdkError {
    fn from(err: std::io::Error) -> Self {
        SdkError::Storage(err.to_string())
    }
}
