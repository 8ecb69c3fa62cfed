// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;

use crate::error::SdkError;

/// Builds the reqwest client used for pushes and native beacons.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, SdkError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SdkError::InvalidConfig(format!("failed to build HTTP client: {e}")))
}
