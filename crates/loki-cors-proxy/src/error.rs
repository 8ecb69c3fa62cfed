// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised by the relay
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing target query parameter")]
    MissingTarget,

    #[error("Invalid target URL '{0}'")]
    InvalidTarget(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl RelayError {
    /// Short label used as the `error` field of JSON error bodies.
    pub fn label(&self) -> &'static str {
        match self {
            RelayError::InvalidConfig(_) => "invalid configuration",
            RelayError::MissingTarget => "missing target",
            RelayError::InvalidTarget(_) => "invalid target",
            RelayError::Upstream(_) => "proxy error",
            RelayError::Server(_) => "server error",
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Server(err.to_string())
    }
}
