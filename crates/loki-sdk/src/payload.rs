// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loki push API body.
//!
//! ```json
//! {"streams":[{"stream":{"app":"shop",...},"values":[["<ts ns>","<envelope json>"]]}]}
//! ```
//!
//! Records sharing the same label set land in one stream; streams appear in
//! the order their first record appears in the batch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::Config;
use crate::constants::{DEFAULT_PLATFORM, SDK_VERSION_TAG};
use crate::envelope::Envelope;
use crate::error::SdkError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamLabels {
    pub app: String,
    pub env: String,
    pub release: String,
    pub platform: String,
    pub sdk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub stream: StreamLabels,
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub streams: Vec<Stream>,
}

impl PushRequest {
    pub fn build(records: &[Envelope], config: &Config) -> Result<Self, SdkError> {
        let mut streams: Vec<Stream> = Vec::new();
        let mut index: HashMap<StreamLabels, usize> = HashMap::new();

        for record in records {
            let labels = labels_for(record, config);
            let line = serde_json::to_string(record)?;
            let value = (record.timestamp_ns.to_string(), line);

            match index.get(&labels) {
                Some(&i) => streams[i].values.push(value),
                None => {
                    index.insert(labels.clone(), streams.len());
                    streams.push(Stream {
                        stream: labels,
                        values: vec![value],
                    });
                }
            }
        }

        Ok(PushRequest { streams })
    }

    pub fn to_bytes(&self) -> Result<bytes::Bytes, SdkError> {
        Ok(serde_json::to_vec(self)?.into())
    }
}

/// Labels come from the record's own context, falling back to the config.
fn labels_for(record: &Envelope, config: &Config) -> StreamLabels {
    let app = &record.context.app;
    let pick = |value: Option<&String>, fallback: &str| {
        value
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    };
    StreamLabels {
        app: pick(Some(&app.name), &config.app_name),
        env: pick(app.env.as_ref(), &config.environment),
        release: pick(app.release.as_ref(), &config.release),
        platform: pick(Some(&record.context.device.platform), DEFAULT_PLATFORM),
        sdk: SDK_VERSION_TAG.to_string(),
    }
}
