// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! FIFO buffer of pending records and the batch carving rules.
//!
//! # Batching Strategy
//!
//! A flush is due once the queue holds `max_records` entries or its
//! serialized size reaches `max_bytes`. A batch is carved greedily from the
//! front:
//! 1. Stop at `max_records`.
//! 2. Stop before a record that would push the batch past `max_bytes`,
//!    unless the batch is still empty. An oversized record ships alone
//!    instead of blocking the queue forever.
//!
//! Failed batches go back to the *front*, ahead of newer records.

use std::collections::VecDeque;
use tracing::warn;

use crate::envelope::Envelope;

/// Serialized size of a record, used for byte ceilings.
pub trait Measured {
    fn encoded_len(&self) -> usize;
}

impl Measured for Envelope {
    fn encoded_len(&self) -> usize {
        match serde_json::to_vec(self) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                warn!("LOKI | Failed to measure envelope: {e}");
                0
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_bytes: usize,
    pub max_records: usize,
}

#[derive(Debug, Clone)]
pub struct BatchQueue<T> {
    /// Records paired with their cached size.
    entries: VecDeque<(T, usize)>,
    total_bytes: usize,
    limits: BatchLimits,
}

impl<T: Measured> BatchQueue<T> {
    pub fn new(limits: BatchLimits) -> Self {
        BatchQueue {
            entries: VecDeque::new(),
            total_bytes: 0,
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn push(&mut self, record: T) {
        let size = record.encoded_len();
        self.total_bytes += size;
        self.entries.push_back((record, size));
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = T>) {
        for record in records {
            self.push(record);
        }
    }

    pub fn should_flush(&self) -> bool {
        self.entries.len() >= self.limits.max_records || self.total_bytes >= self.limits.max_bytes
    }

    /// Removes and returns the next batch. Empty only when the queue is.
    pub fn drain(&mut self) -> Vec<T> {
        let mut batch = Vec::new();
        let mut batch_bytes = 0;

        while batch.len() < self.limits.max_records {
            let Some((_, size)) = self.entries.front() else {
                break;
            };
            if batch_bytes + size > self.limits.max_bytes && !batch.is_empty() {
                break;
            }
            if let Some((record, size)) = self.entries.pop_front() {
                batch_bytes += size;
                self.total_bytes -= size;
                batch.push(record);
            }
        }

        batch
    }

    /// Puts a failed batch back ahead of everything queued since.
    pub fn requeue_front(&mut self, batch: Vec<T>) {
        for record in batch.into_iter().rev() {
            let size = record.encoded_len();
            self.total_bytes += size;
            self.entries.push_front((record, size));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(record, _)| record)
    }
}
