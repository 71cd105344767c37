//! Event router for the device pipeline.
//!
//! The router delivers every [`PipelineEvent`] to all registered
//! [`EventCallback`]s in registration order. Each callback is isolated: an
//! error inside one callback is logged and counted, and the remaining
//! callbacks still receive the event. Nothing propagates back to the caller of
//! [`EventRouter::dispatch`].
//!
//! Panics are isolated the same way only when the binary unwinds. The release
//! profile uses `panic = "abort"`, so there a panicking callback takes the
//! process down.
//!
//! Callbacks may emit follow-up [`Alert`]s through the [`DispatchContext`].
//! Alerts raised while handling a detection are dispatched to every callback
//! right after the fan-out. Alerts are a single extra hop: anything emitted
//! while handling an alert is dropped.
//!
//! Workers do not call `dispatch` directly. They submit into a per-device
//! [`DispatchLane`], a channel drained by one task, so the worker never waits
//! for persistence while events of one device keep their production order.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::defaults;
use crate::event::{Alert, PipelineEvent};

/// Error returned by a callback. Logged by the router, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// The callback refused the event.
    #[error("Event rejected: {0}")]
    Rejected(String),

    /// Persisting or forwarding the event failed.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Other error.
    #[error("Callback error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type for callbacks.
pub type CallbackResult = std::result::Result<(), CallbackError>;

/// Per-dispatch scratch space handed to each callback.
#[derive(Debug, Default)]
pub struct DispatchContext {
    alerts: Vec<Alert>,
}

impl DispatchContext {
    /// Queue an alert for re-submission to every callback.
    pub fn emit(&mut self, alert: Alert) {
        self.alerts.push(alert);
    }

    pub fn emitted(&self) -> usize {
        self.alerts.len()
    }
}

/// Subscriber receiving pipeline events.
#[async_trait]
pub trait EventCallback: Send + Sync {
    /// Name used in logs and dispatch reports.
    fn name(&self) -> &str;

    /// Handle one event.
    async fn on_event(&self, event: &PipelineEvent, ctx: &mut DispatchContext) -> CallbackResult;
}

/// Callback backed by a plain closure.
pub struct FnCallback<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> EventCallback for FnCallback<F>
where
    F: Fn(&PipelineEvent) -> CallbackResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &PipelineEvent, _ctx: &mut DispatchContext) -> CallbackResult {
        (self.f)(event)
    }
}

/// Wrap a closure as a callback.
pub fn callback_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn EventCallback>
where
    F: Fn(&PipelineEvent) -> CallbackResult + Send + Sync + 'static,
{
    Arc::new(FnCallback {
        name: name.into(),
        f,
    })
}

/// Outcome of one `dispatch` call, including the alert hop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Successful callback invocations.
    pub delivered: usize,
    /// Names of callbacks that failed, one entry per failure.
    pub failed: Vec<String>,
    /// Alerts emitted by callbacks and re-dispatched.
    pub alerts_emitted: usize,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Router counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub callbacks: usize,
    pub dispatched: u64,
    pub alerts: u64,
    pub callback_failures: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    alerts: AtomicU64,
    callback_failures: AtomicU64,
}

/// Fan-out router.
pub struct EventRouter {
    callbacks: RwLock<Vec<Arc<dyn EventCallback>>>,
    tx: broadcast::Sender<PipelineEvent>,
    counters: Counters,
    lane_capacity: usize,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::with_capacity(defaults::BROADCAST_CAPACITY, defaults::LANE_CAPACITY)
    }

    /// Create a router with explicit observer and lane buffer sizes.
    pub fn with_capacity(broadcast_capacity: usize, lane_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            callbacks: RwLock::new(Vec::new()),
            tx,
            counters: Counters::default(),
            lane_capacity: lane_capacity.max(1),
        }
    }

    /// Append a callback. Registration order is delivery order.
    pub fn register(&self, callback: Arc<dyn EventCallback>) {
        tracing::debug!(callback = %callback.name(), "Registered event callback");
        self.callbacks.write().push(callback);
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Observe every dispatched event. Slow observers may miss events.
    pub fn subscribe(&self) -> RouterReceiver {
        RouterReceiver {
            rx: self.tx.subscribe(),
        }
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            callbacks: self.callback_count(),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            alerts: self.counters.alerts.load(Ordering::Relaxed),
            callback_failures: self.counters.callback_failures.load(Ordering::Relaxed),
        }
    }

    /// Deliver `event` to every callback, then dispatch any alerts they emitted.
    pub async fn dispatch(&self, event: PipelineEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        let follow_ups = self.deliver(&event, &mut report).await;

        if event.is_alert() {
            if !follow_ups.is_empty() {
                tracing::debug!(
                    dropped = follow_ups.len(),
                    "Ignoring alerts raised while handling an alert"
                );
            }
            return report;
        }

        for alert in follow_ups {
            report.alerts_emitted += 1;
            self.counters.alerts.fetch_add(1, Ordering::Relaxed);
            let alert_event = PipelineEvent::from(alert);
            let ignored = self.deliver(&alert_event, &mut report).await;
            if !ignored.is_empty() {
                tracing::debug!(
                    dropped = ignored.len(),
                    "Ignoring alerts raised while handling an alert"
                );
            }
        }

        report
    }

    async fn deliver(&self, event: &PipelineEvent, report: &mut DispatchReport) -> Vec<Alert> {
        // Snapshot so no lock is held across callback awaits.
        let callbacks: Vec<Arc<dyn EventCallback>> = self.callbacks.read().clone();
        let mut ctx = DispatchContext::default();

        for callback in &callbacks {
            let outcome = AssertUnwindSafe(callback.on_event(event, &mut ctx))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(
                        callback = %callback.name(),
                        device_id = %event.device_id(),
                        event_type = %event.event_type(),
                        error = %e,
                        "Event callback failed"
                    );
                    self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
                    report.failed.push(callback.name().to_string());
                }
                Err(_) => {
                    tracing::error!(
                        callback = %callback.name(),
                        device_id = %event.device_id(),
                        event_type = %event.event_type(),
                        "Event callback panicked"
                    );
                    self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
                    report.failed.push(callback.name().to_string());
                }
            }
        }

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        // No observers is fine.
        let _ = self.tx.send(event.clone());

        ctx.alerts
    }

    /// Open a FIFO dispatch lane for one device.
    ///
    /// Must be called from within a tokio runtime. The drain task finishes once
    /// the lane is closed or dropped and every queued event has been dispatched.
    pub fn lane(self: &Arc<Self>, device_id: impl Into<String>) -> DispatchLane {
        let device_id = device_id.into();
        let (tx, mut rx) = mpsc::channel::<PipelineEvent>(self.lane_capacity);
        let router = Arc::clone(self);
        let lane_device = device_id.clone();

        let handle = tokio::spawn(async move {
            let mut drained = 0u64;
            while let Some(event) = rx.recv().await {
                router.dispatch(event).await;
                drained += 1;
            }
            tracing::debug!(device_id = %lane_device, drained, "Dispatch lane closed");
            drained
        });

        DispatchLane {
            device_id,
            tx,
            handle,
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared router handle.
pub type SharedEventRouter = Arc<EventRouter>;

/// Per-device FIFO submission handle.
pub struct DispatchLane {
    device_id: String,
    tx: mpsc::Sender<PipelineEvent>,
    handle: JoinHandle<u64>,
}

impl DispatchLane {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Queue an event. Waits only while the lane buffer is full.
    ///
    /// Returns `false` if the drain task is gone.
    pub async fn submit(&self, event: PipelineEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Close the lane and wait until every queued event has been dispatched.
    ///
    /// Returns how many events the lane dispatched over its lifetime.
    pub async fn close(self) -> u64 {
        drop(self.tx);
        self.handle.await.unwrap_or(0)
    }
}

/// Receiver for observed events.
pub struct RouterReceiver {
    rx: broadcast::Receiver<PipelineEvent>,
}

impl RouterReceiver {
    /// Receive the next event. Returns `None` once the router is gone.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Router observer lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.rx.try_recv().ok()
    }
}
