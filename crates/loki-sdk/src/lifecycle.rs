// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background driver for timed and signal-driven flushes.

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::host::LifecycleSignal;
use crate::sdk::{Inner, LokiSdk};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Ready,
    ShuttingDown,
    Terminated,
}

enum Event {
    Tick,
    Signal(Option<LifecycleSignal>),
}

/// Runs until `cancel` fires or the SDK is dropped.
///
/// Holds only a weak reference so an abandoned instance can be freed without
/// an explicit shutdown.
pub(crate) async fn run(
    sdk: Weak<Inner>,
    period: Duration,
    mut signals: Option<broadcast::Receiver<LifecycleSignal>>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.tick().await; // discard first tick

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => Event::Tick,
            signal = next_signal(&mut signals) => Event::Signal(signal),
        };

        let Some(inner) = sdk.upgrade() else {
            break;
        };
        let sdk_handle = LokiSdk::from_inner(inner);

        match event {
            Event::Tick | Event::Signal(Some(LifecycleSignal::VisibilityHidden)) => {
                // Delivery can stall for a long time; keep reading signals meanwhile.
                tokio::spawn(async move { sdk_handle.try_flush().await });
            }
            Event::Signal(Some(signal)) if signal.is_termination() => {
                debug!("LOKI | {signal:?} received, running exit flush");
                sdk_handle.exit_flush();
            }
            Event::Signal(Some(_)) => {}
            Event::Signal(None) => {
                debug!("LOKI | Lifecycle signal channel closed");
                signals = None;
            }
        }
    }

    debug!("LOKI | Lifecycle task stopped");
}

/// Never resolves when there is no signal source.
async fn next_signal(
    signals: &mut Option<broadcast::Receiver<LifecycleSignal>>,
) -> Option<LifecycleSignal> {
    let Some(rx) = signals else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(signal) => return Some(signal),
            Err(RecvError::Lagged(skipped)) => {
                debug!("LOKI | Missed {skipped} lifecycle signals");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}
