// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::time::Instant;

/// Token bucket bounding captured events per minute.
///
/// Starts full. Tokens refill continuously at `max_per_minute / 60s` and never
/// exceed the capacity. Rejected events are dropped by the caller.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        RateLimiter {
            tokens: f64::from(max_per_minute),
            max_tokens: f64::from(max_per_minute),
            last_refill: Instant::now(),
        }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_secs_f64() * 1_000.0;
        self.tokens = (self.tokens + elapsed_ms / 60_000.0 * self.max_tokens).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
