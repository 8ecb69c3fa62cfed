// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The object applications talk to.
//!
//! `LokiSdk` is a cheap handle; clones share one pipeline. Capture calls are
//! synchronous and never fail from the caller's point of view. Everything that
//! goes wrong after an envelope has been accepted is logged and handed to the
//! `on_error` callback.
//!
//! Flushes are serialized by a single guard. Timer, visibility and threshold
//! triggers skip when a flush is already running; explicit [`LokiSdk::flush`]
//! and [`LokiSdk::shutdown`] wait for it.

use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::batch::{BatchLimits, BatchQueue};
use crate::config::{Config, SdkOptions};
use crate::context::ContextSnapshot;
use crate::delivery::transport::{HttpTransport, Transport};
use crate::delivery::{Deliverer, Delivery};
use crate::envelope::{
    build_error_envelope, build_log_envelope, sample, Envelope, ErrorValue, LogLevel,
};
use crate::error::SdkError;
use crate::host::Host;
use crate::lifecycle::{self, LifecycleState};
use crate::offline::OfflineBuffer;
use crate::rate_limiter::RateLimiter;
use crate::redact::apply_redaction;

struct Pipeline {
    config: Arc<Config>,
    context: ContextSnapshot,
    queue: BatchQueue<Envelope>,
    limiter: RateLimiter,
    offline: Option<OfflineBuffer>,
    deliverer: Arc<Deliverer>,
    runtime: Handle,
    cancel: CancellationToken,
    /// The store may hold a snapshot of the queue.
    persisted: bool,
}

impl Pipeline {
    fn persist_queue(&mut self) {
        if let Some(offline) = &self.offline {
            offline.persist(self.queue.iter());
            self.persisted = !self.queue.is_empty();
        }
    }

    /// Rewrites a stale snapshot after records it holds were delivered.
    fn refresh_snapshot(&mut self) {
        if self.persisted {
            self.persist_queue();
        }
    }
}

#[derive(Default)]
struct State {
    lifecycle: LifecycleState,
    pipeline: Option<Pipeline>,
}

pub(crate) struct Inner {
    host: Arc<dyn Host>,
    transport: Option<Arc<dyn Transport>>,
    state: Mutex<State>,
    flush_guard: Arc<tokio::sync::Mutex<()>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        // Redaction hooks run outside this lock; a poisoned guard still holds
        // consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct LokiSdk {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LokiSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LokiSdk")
            .field("state", &self.state())
            .finish()
    }
}

impl LokiSdk {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self::build(host, None)
    }

    /// Uses `transport` for every HTTP mechanism instead of the reqwest one.
    pub fn with_transport(host: Arc<dyn Host>, transport: Arc<dyn Transport>) -> Self {
        Self::build(host, Some(transport))
    }

    fn build(host: Arc<dyn Host>, transport: Option<Arc<dyn Transport>>) -> Self {
        LokiSdk {
            inner: Arc::new(Inner {
                host,
                transport,
                state: Mutex::new(State::default()),
                flush_guard: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        LokiSdk { inner }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state().lifecycle
    }

    /// Number of envelopes waiting for delivery.
    pub fn pending(&self) -> usize {
        self.inner
            .state()
            .pipeline
            .as_ref()
            .map_or(0, |p| p.queue.len())
    }

    /// Resolves `options`, restores the offline buffer and starts the
    /// background flush task on the current tokio runtime.
    pub fn init(&self, options: SdkOptions) -> Result<(), SdkError> {
        let mut state = self.inner.state();
        if state.lifecycle != LifecycleState::Uninitialized {
            return Err(SdkError::AlreadyInitialized);
        }

        let runtime = Handle::try_current().map_err(|_| {
            SdkError::UnsupportedCapability("init must be called inside a tokio runtime".to_string())
        })?;
        let config = Arc::new(Config::resolve(options)?);
        let transport = match &self.inner.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let host = Arc::clone(&self.inner.host);
        let deliverer = Arc::new(Deliverer::new(config.clone(), host.clone(), transport));

        let mut queue = BatchQueue::new(BatchLimits {
            max_bytes: config.batch_max_bytes,
            max_records: config.batch_max_records,
        });
        let offline = if config.enable_offline_buffer {
            host.persistent_store()
                .map(|store| OfflineBuffer::new(store, &config.storage_key))
        } else {
            None
        };
        if let Some(offline) = &offline {
            queue.extend(offline.restore());
        }

        let cancel = CancellationToken::new();
        runtime.spawn(lifecycle::run(
            Arc::downgrade(&self.inner),
            config.flush_interval,
            host.lifecycle_signals(),
            cancel.clone(),
        ));

        debug!(
            "LOKI | Initialized for {} ({} restored records)",
            config.app_name,
            queue.len()
        );
        state.pipeline = Some(Pipeline {
            context: ContextSnapshot::initial(&config, host.page_info(), host.device_info()),
            limiter: RateLimiter::new(config.rate_limit_per_min),
            config,
            queue,
            offline,
            deliverer,
            runtime,
            cancel,
            persisted: false,
        });
        state.lifecycle = LifecycleState::Ready;
        Ok(())
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        attributes: Option<Map<String, Value>>,
        title: Option<String>,
    ) {
        self.capture(|context, _| {
            Some(build_log_envelope(level, message, context, attributes, title))
        });
    }

    /// Records an error. Subject to `sample_rate`.
    pub fn capture_error(
        &self,
        error: impl Into<ErrorValue>,
        attributes: Option<Map<String, Value>>,
        title: Option<String>,
    ) {
        self.capture(|context, config| {
            sample(config.sample_rate)
                .then(|| build_error_envelope(error.into(), context, attributes, title))
        });
    }

    fn capture(
        &self,
        build: impl FnOnce(&ContextSnapshot, &Config) -> Option<Envelope>,
    ) {
        let (context, config) = {
            let state = self.inner.state();
            match (&state.lifecycle, &state.pipeline) {
                (LifecycleState::Ready, Some(p)) => (p.context.clone(), Arc::clone(&p.config)),
                _ => return,
            }
        };

        // Runs outside the lock: the redaction hook is caller code.
        let Some(envelope) = build(&context, &config) else {
            return;
        };
        let Some(envelope) = apply_redaction(envelope, &config.redact) else {
            return;
        };

        let mut state = self.inner.state();
        if state.lifecycle != LifecycleState::Ready {
            return;
        }
        let Some(pipeline) = state.pipeline.as_mut() else {
            return;
        };
        if !pipeline.limiter.allow() {
            debug!("LOKI | Rate limit reached, dropping envelope");
            return;
        }
        pipeline.queue.push(envelope);

        if pipeline.queue.should_flush() {
            self.spawn_threshold_flush(pipeline);
        }
    }

    /// Drains the due batch now and ships it in the background.
    fn spawn_threshold_flush(&self, pipeline: &mut Pipeline) {
        let Ok(guard) = Arc::clone(&self.inner.flush_guard).try_lock_owned() else {
            debug!("LOKI | Flush in flight, skipping threshold flush");
            return;
        };
        let batch = pipeline.queue.drain();
        let sdk = self.clone();
        pipeline.runtime.spawn(async move {
            sdk.deliver_while_due(batch, guard).await;
        });
    }

    async fn deliver_while_due(&self, mut batch: Vec<Envelope>, _guard: OwnedMutexGuard<()>) {
        loop {
            if !self.deliver_batch(batch).await {
                return;
            }
            batch = {
                let mut state = self.inner.state();
                let ready = state.lifecycle == LifecycleState::Ready;
                match state.pipeline.as_mut() {
                    Some(p) if ready && p.queue.should_flush() => p.queue.drain(),
                    _ => return,
                }
            };
        }
    }

    pub fn set_user(&self, user_id: Option<String>) {
        if let Some(p) = self.inner.state().pipeline.as_mut() {
            p.context.set_user(user_id);
        }
    }

    /// Merges `patch` into the context of envelopes built from now on.
    pub fn set_context(&self, patch: Map<String, Value>) {
        if let Some(p) = self.inner.state().pipeline.as_mut() {
            if let Err(e) = p.context.merge(&patch) {
                warn!("LOKI | Ignoring invalid context update: {e}");
            }
        }
    }

    /// Delivers everything queued. Waits for an in-flight flush first.
    pub async fn flush(&self) {
        if self.state() != LifecycleState::Ready {
            return;
        }
        let _guard = self.inner.flush_guard.lock().await;
        self.drain_all().await;
    }

    /// Timer and visibility flush: skipped when one is already running.
    pub(crate) async fn try_flush(&self) {
        if self.state() != LifecycleState::Ready {
            return;
        }
        let Ok(_guard) = self.inner.flush_guard.try_lock() else {
            debug!("LOKI | Flush in flight, skipping scheduled flush");
            return;
        };
        self.drain_all().await;
    }

    /// Returns false if a batch could not be delivered.
    async fn drain_all(&self) -> bool {
        loop {
            let batch = {
                let mut state = self.inner.state();
                match state.pipeline.as_mut() {
                    Some(p) if !p.queue.is_empty() => p.queue.drain(),
                    _ => return true,
                }
            };
            if !self.deliver_batch(batch).await {
                return false;
            }
        }
    }

    /// Ships one batch and applies the failure policy. Returns true on
    /// delivery.
    async fn deliver_batch(&self, batch: Vec<Envelope>) -> bool {
        let Some((deliverer, config)) = self
            .inner
            .state()
            .pipeline
            .as_ref()
            .map(|p| (Arc::clone(&p.deliverer), Arc::clone(&p.config)))
        else {
            return false;
        };

        let outcome = deliverer.deliver(&batch).await;

        let mut state = self.inner.state();
        let shutting_down = state.lifecycle == LifecycleState::ShuttingDown;
        let Some(pipeline) = state.pipeline.as_mut() else {
            return false;
        };
        match outcome {
            Ok(Delivery::Delivered(_)) => {
                pipeline.refresh_snapshot();
                true
            }
            Ok(Delivery::Deferred) => {
                debug!("LOKI | Every mechanism failed, keeping {} records offline", batch.len());
                pipeline.queue.requeue_front(batch);
                pipeline.persist_queue();
                false
            }
            Err(e) => {
                warn!("LOKI | Failed to deliver {} records: {e}", batch.len());
                if config.enable_offline_buffer && !shutting_down {
                    pipeline.queue.requeue_front(batch);
                    pipeline.persist_queue();
                }
                drop(state);
                config.report(&e);
                false
            }
        }
    }

    /// Last-chance flush when the host is going away.
    ///
    /// Sends one batch by beacon. If the beacon is unavailable, disabled or
    /// refused, the batch goes back to the queue and the whole queue is
    /// persisted.
    pub(crate) fn exit_flush(&self) {
        let mut state = self.inner.state();
        if state.lifecycle != LifecycleState::Ready {
            return;
        }
        let Some(pipeline) = state.pipeline.as_mut() else {
            return;
        };
        if pipeline.queue.is_empty() {
            return;
        }
        if !pipeline.config.use_fire_and_forget_on_exit {
            pipeline.persist_queue();
            return;
        }

        let batch = pipeline.queue.drain();
        let sent = pipeline
            .deliverer
            .encode(&batch)
            .and_then(|body| pipeline.deliverer.beacon(body));
        match sent {
            Ok(()) => debug!("LOKI | Exit flush sent {} records by beacon", batch.len()),
            Err(e) => {
                debug!("LOKI | Exit beacon failed: {e}");
                pipeline.queue.requeue_front(batch);
            }
        }
        if !pipeline.queue.is_empty() {
            pipeline.persist_queue();
        } else {
            pipeline.refresh_snapshot();
        }
    }

    /// Stops the timer, delivers what is queued and terminates.
    ///
    /// Delivery stops at the first failed batch; whatever is still queued
    /// then is persisted when the offline buffer is enabled.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state();
            if state.lifecycle != LifecycleState::Ready {
                return;
            }
            state.lifecycle = LifecycleState::ShuttingDown;
            if let Some(p) = &state.pipeline {
                p.cancel.cancel();
            }
        }

        let _guard = self.inner.flush_guard.lock().await;
        if !self.drain_all().await {
            if let Some(p) = self.inner.state().pipeline.as_mut() {
                if !p.queue.is_empty() {
                    p.persist_queue();
                }
            }
        }

        self.inner.state().lifecycle = LifecycleState::Terminated;
        debug!("LOKI | Shut down");
    }
}
