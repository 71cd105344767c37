//! Device supervisor.
//!
//! Owns one polling worker per running device. A worker loops over
//! read, classify and submit, then sleeps for the device's poll interval. It
//! re-reads the device configuration from the registry every cycle, so
//! updates take effect on the next poll without a restart.
//!
//! Lifecycle per device:
//!
//! ```text
//! Stopped --start--> Starting --open ok--> Running --stop--> Stopping --> Stopped
//!                       |                     |
//!                       +--open failed--> Stopped (last_error set)
//!                                             +--retry budget spent--> Error
//! ```
//!
//! Stopping is cooperative: the worker watches a stop signal between steps.
//! A worker stuck inside a read is given the grace period and then left
//! behind; the device is reported stopped regardless.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use sami_core::config::defaults;
use sami_core::{DispatchLane, EventRouter, PipelineEvent, RouterStats};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapter::{AdapterError, AdapterFactory, DeviceAdapter, Frame, Sample, SamplePayload};
use crate::classifier::SampleClassifier;
use crate::config::{ConnectionConfig, DeviceConfig, DeviceConfigUpdate, DeviceKind};
use crate::registry::DeviceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// How long `stop` waits for a worker to acknowledge.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,
    /// Consecutive device failures tolerated before a worker gives up.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Upper bound on one `read_next` wait.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

fn default_stop_grace() -> u64 {
    defaults::STOP_GRACE_MS
}

fn default_retry_budget() -> u32 {
    defaults::RETRY_BUDGET
}

fn default_retry_backoff() -> u64 {
    defaults::RETRY_BACKOFF_MS
}

fn default_read_timeout() -> u64 {
    defaults::READ_TIMEOUT_MS
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            stop_grace_ms: default_stop_grace(),
            retry_budget: default_retry_budget(),
            retry_backoff_ms: default_retry_backoff(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl SupervisorSettings {
    fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

const STOP_SETTLE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device {0} is disabled")]
    Disabled(String),

    /// A previous stop is still inside its grace period. Transient: `start`
    /// waits for the stop to settle first and only returns this if it does
    /// not settle within the grace period.
    #[error("Device {0} is still stopping")]
    Stopping(String),

    #[error("Start of device {0} was interrupted by stop")]
    Interrupted(String),

    #[error("Failed to connect device {device_id}: {reason}")]
    Connection { device_id: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<SupervisorError> for sami_core::Error {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::NotFound(id) => sami_core::Error::NotFound(format!("device {}", id)),
            SupervisorError::Configuration(msg) => sami_core::Error::Configuration(msg),
            other => sami_core::Error::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// `acknowledged` is false when the worker outlived the grace period.
    Stopped { acknowledged: bool },
    NotRunning,
}

/// Result of a one-off connectivity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub device_id: String,
    pub kind: DeviceKind,
    pub connected: bool,
    /// Adapter error when `connected` is false.
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Point-in-time view of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub enabled: bool,
    pub state: WorkerState,
    pub is_running: bool,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub samples: u64,
    pub events: u64,
    pub device_errors: u64,
    pub classification_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub total_devices: usize,
    pub running_devices: usize,
    pub error_devices: usize,
    pub devices: Vec<DeviceStatus>,
    pub router: RouterStats,
}

#[derive(Default)]
struct RuntimeEntry {
    state: WorkerState,
    generation: u64,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    last_sample_at: Option<DateTime<Utc>>,
    samples: u64,
    events: u64,
    device_errors: u64,
    classification_errors: u64,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    registry: Arc<DeviceRegistry>,
    router: Arc<EventRouter>,
    classifier: Arc<SampleClassifier>,
    factory: Arc<dyn AdapterFactory>,
    settings: SupervisorSettings,
    runtime: Mutex<HashMap<String, RuntimeEntry>>,
    generations: AtomicU64,
}

impl Inner {
    /// Mutate the runtime entry if it still belongs to `generation`.
    fn with_entry(&self, device_id: &str, generation: u64, f: impl FnOnce(&mut RuntimeEntry)) {
        let mut runtime = self.runtime.lock();
        if let Some(entry) = runtime.get_mut(device_id) {
            if entry.generation == generation {
                f(entry);
            }
        }
    }
}

/// Starts, stops and monitors device workers.
#[derive(Clone)]
pub struct DeviceSupervisor {
    inner: Arc<Inner>,
}

impl DeviceSupervisor {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        classifier: Arc<SampleClassifier>,
        factory: Arc<dyn AdapterFactory>,
        settings: SupervisorSettings,
    ) -> Self {
        Self::with_router(registry, classifier, factory, settings, Arc::new(EventRouter::new()))
    }

    pub fn with_router(
        registry: Arc<DeviceRegistry>,
        classifier: Arc<SampleClassifier>,
        factory: Arc<dyn AdapterFactory>,
        settings: SupervisorSettings,
        router: Arc<EventRouter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                router,
                classifier,
                factory,
                settings,
                runtime: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(1),
            }),
        }
    }

    /// Router events are dispatched through. Register callbacks here.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.inner.router
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    /// Start polling a device. Starting a running device is a no-op; a device
    /// that is still stopping is started once the stop settles.
    pub async fn start(&self, device_id: &str) -> Result<StartOutcome, SupervisorError> {
        let inner = &self.inner;
        let config = inner
            .registry
            .get(device_id)
            .ok_or_else(|| SupervisorError::NotFound(device_id.to_string()))?;
        if !config.enabled {
            return Err(SupervisorError::Disabled(device_id.to_string()));
        }

        // A stop in progress settles within its grace period.
        let deadline = tokio::time::Instant::now() + inner.settings.stop_grace() + STOP_SETTLE_POLL;
        let generation = loop {
            {
                let mut runtime = inner.runtime.lock();
                let entry = runtime.entry(device_id.to_string()).or_default();
                match entry.state {
                    WorkerState::Starting | WorkerState::Running => return Ok(StartOutcome::AlreadyRunning),
                    WorkerState::Stopped | WorkerState::Error => {
                        let generation = inner.generations.fetch_add(1, Ordering::Relaxed);
                        entry.state = WorkerState::Starting;
                        entry.generation = generation;
                        entry.last_error = None;
                        break generation;
                    }
                    WorkerState::Stopping => {}
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::Stopping(device_id.to_string()));
            }
            tokio::time::sleep(STOP_SETTLE_POLL).await;
        };

        // Adapter creation and open happen outside the lock.
        let mut adapter = match inner.factory.create(&config) {
            Ok(adapter) => adapter,
            Err(e) => {
                let reason = e.to_string();
                self.abort_start(device_id, generation, &reason);
                return Err(SupervisorError::Configuration(reason));
            }
        };
        if let Err(e) = adapter.open().await {
            adapter.close().await;
            let reason = e.to_string();
            self.abort_start(device_id, generation, &reason);
            tracing::warn!(device_id = %device_id, error = %reason, "Failed to open device");
            return Err(SupervisorError::Connection {
                device_id: device_id.to_string(),
                reason,
            });
        }

        let mut pending = Some(adapter);
        {
            let mut runtime = inner.runtime.lock();
            if let Some(entry) = runtime.get_mut(device_id) {
                if entry.generation == generation && entry.state == WorkerState::Starting {
                    if let Some(adapter) = pending.take() {
                        let (stop_tx, stop_rx) = watch::channel(false);
                        let worker = Worker {
                            inner: inner.clone(),
                            device_id: device_id.to_string(),
                            generation,
                            connection: config.connection.clone(),
                            adapter,
                            stop_rx,
                        };
                        entry.handle = Some(tokio::spawn(worker.run()));
                        entry.stop_tx = Some(stop_tx);
                        entry.state = WorkerState::Running;
                        entry.started_at = Some(Utc::now());
                    }
                }
            }
        }

        // A stop arrived while the adapter was opening.
        if let Some(mut adapter) = pending {
            adapter.close().await;
            return Err(SupervisorError::Interrupted(device_id.to_string()));
        }

        tracing::info!(device_id = %device_id, kind = %config.kind(), "Device started");
        Ok(StartOutcome::Started)
    }

    fn abort_start(&self, device_id: &str, generation: u64, reason: &str) {
        self.inner.with_entry(device_id, generation, |entry| {
            entry.state = WorkerState::Stopped;
            entry.last_error = Some(reason.to_string());
        });
    }

    /// Signal the worker and wait up to the grace period for it to exit.
    pub async fn stop(&self, device_id: &str) -> Result<StopOutcome, SupervisorError> {
        if !self.inner.registry.contains(device_id) {
            return Err(SupervisorError::NotFound(device_id.to_string()));
        }

        let (stop_tx, handle, generation) = {
            let mut runtime = self.inner.runtime.lock();
            let Some(entry) = runtime.get_mut(device_id) else {
                return Ok(StopOutcome::NotRunning);
            };
            match entry.state {
                WorkerState::Running => {
                    entry.state = WorkerState::Stopping;
                    (entry.stop_tx.take(), entry.handle.take(), entry.generation)
                }
                WorkerState::Starting => {
                    // `start` notices the state change and closes its adapter.
                    entry.state = WorkerState::Stopped;
                    return Ok(StopOutcome::Stopped { acknowledged: true });
                }
                _ => return Ok(StopOutcome::NotRunning),
            }
        };

        if let Some(tx) = &stop_tx {
            let _ = tx.send(true);
        }

        let acknowledged = match handle {
            Some(handle) => tokio::time::timeout(self.inner.settings.stop_grace(), handle)
                .await
                .is_ok(),
            None => true,
        };
        if !acknowledged {
            tracing::warn!(
                device_id = %device_id,
                grace_ms = self.inner.settings.stop_grace_ms,
                "Worker did not stop within grace period, leaving it behind"
            );
        }

        self.inner.with_entry(device_id, generation, |entry| {
            if entry.state == WorkerState::Stopping {
                entry.state = WorkerState::Stopped;
            }
        });
        tracing::info!(device_id = %device_id, acknowledged, "Device stopped");
        Ok(StopOutcome::Stopped { acknowledged })
    }

    /// Start every enabled device. Returns how many are running afterwards.
    pub async fn start_all(&self) -> usize {
        let ids: Vec<String> = self
            .inner
            .registry
            .list()
            .into_iter()
            .filter(|c| c.enabled)
            .map(|c| c.device_id.clone())
            .collect();

        let results = join_all(ids.iter().map(|id| self.start(id))).await;
        let mut started = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(_) => started += 1,
                Err(e) => tracing::warn!(device_id = %id, error = %e, "Device failed to start"),
            }
        }
        tracing::info!(started, total = ids.len(), "Started devices");
        started
    }

    /// Stop every running device. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<String> = {
            let runtime = self.inner.runtime.lock();
            runtime
                .iter()
                .filter(|(_, e)| matches!(e.state, WorkerState::Running | WorkerState::Starting))
                .map(|(id, _)| id.clone())
                .collect()
        };

        join_all(ids.iter().map(|id| self.stop(id)))
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(StopOutcome::Stopped { .. })))
            .count()
    }

    /// Stop everything. Workers that miss the grace period are abandoned.
    pub async fn shutdown(&self) {
        let stopped = self.stop_all().await;
        tracing::info!(stopped, "Device supervisor shut down");
    }

    /// Open and close a fresh adapter for the device without starting a
    /// worker or touching its runtime state. Disabled devices can be tested.
    pub async fn test_device(&self, device_id: &str) -> Result<ConnectionTest, SupervisorError> {
        let config = self
            .inner
            .registry
            .get(device_id)
            .ok_or_else(|| SupervisorError::NotFound(device_id.to_string()))?;
        let mut adapter = self
            .inner
            .factory
            .create(&config)
            .map_err(|e| SupervisorError::Configuration(e.to_string()))?;

        let started = std::time::Instant::now();
        let result = adapter.open().await;
        adapter.close().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let error = result.err().map(|e| e.to_string());
        tracing::info!(
            device_id = %device_id,
            connected = error.is_none(),
            elapsed_ms,
            "Device connection test"
        );
        Ok(ConnectionTest {
            device_id: device_id.to_string(),
            kind: config.kind(),
            connected: error.is_none(),
            error,
            elapsed_ms,
        })
    }

    /// Grab one frame from a camera outside its worker. The camera's
    /// analysis cadence does not apply. Returns `None` if no frame arrived
    /// within the read timeout.
    pub async fn capture_frame(&self, device_id: &str) -> Result<Option<Frame>, SupervisorError> {
        let config = self
            .inner
            .registry
            .get(device_id)
            .ok_or_else(|| SupervisorError::NotFound(device_id.to_string()))?;
        if config.kind() != DeviceKind::Camera {
            return Err(SupervisorError::Configuration(format!(
                "device {} is a {}, not a camera",
                device_id,
                config.kind()
            )));
        }

        let mut adapter = self
            .inner
            .factory
            .create(&config)
            .map_err(|e| SupervisorError::Configuration(e.to_string()))?;
        let connection_error = |e: AdapterError| SupervisorError::Connection {
            device_id: device_id.to_string(),
            reason: e.to_string(),
        };

        if let Err(e) = adapter.open().await {
            adapter.close().await;
            return Err(connection_error(e));
        }
        let captured = adapter.capture(self.inner.settings.read_timeout()).await;
        adapter.close().await;

        match captured.map_err(connection_error)? {
            Some(Sample {
                payload: SamplePayload::Frame(frame),
                ..
            }) => Ok(Some(frame)),
            Some(other) => Err(SupervisorError::Configuration(format!(
                "camera {} returned a {} sample",
                device_id,
                other.kind_name()
            ))),
            None => Ok(None),
        }
    }

    pub fn get_status(&self, device_id: &str) -> Result<DeviceStatus, SupervisorError> {
        let config = self
            .inner
            .registry
            .get(device_id)
            .ok_or_else(|| SupervisorError::NotFound(device_id.to_string()))?;
        let runtime = self.inner.runtime.lock();
        Ok(status_of(&config, runtime.get(device_id)))
    }

    pub fn get_all_status(&self) -> SupervisorStatus {
        let configs = self.inner.registry.list();
        let devices: Vec<DeviceStatus> = {
            let runtime = self.inner.runtime.lock();
            configs
                .iter()
                .map(|c| status_of(c, runtime.get(&c.device_id)))
                .collect()
        };

        SupervisorStatus {
            total_devices: devices.len(),
            running_devices: devices.iter().filter(|d| d.is_running).count(),
            error_devices: devices.iter().filter(|d| d.state == WorkerState::Error).count(),
            devices,
            router: self.inner.router.stats(),
        }
    }

    /// Apply a configuration update. A running worker picks it up on its
    /// next cycle.
    pub fn update_config(
        &self,
        device_id: &str,
        update: &DeviceConfigUpdate,
    ) -> Result<Arc<DeviceConfig>, SupervisorError> {
        self.inner
            .registry
            .update(device_id, update)
            .map_err(|e| match e {
                sami_core::Error::NotFound(_) => SupervisorError::NotFound(device_id.to_string()),
                other => SupervisorError::Configuration(other.to_string()),
            })
    }
}

fn status_of(config: &DeviceConfig, entry: Option<&RuntimeEntry>) -> DeviceStatus {
    let mut status = DeviceStatus {
        device_id: config.device_id.clone(),
        name: config.name.clone(),
        kind: config.kind(),
        enabled: config.enabled,
        state: WorkerState::Stopped,
        is_running: false,
        last_error: None,
        started_at: None,
        last_sample_at: None,
        samples: 0,
        events: 0,
        device_errors: 0,
        classification_errors: 0,
    };
    if let Some(entry) = entry {
        status.state = entry.state;
        status.is_running = entry.state == WorkerState::Running;
        status.last_error = entry.last_error.clone();
        status.started_at = entry.started_at;
        status.last_sample_at = entry.last_sample_at;
        status.samples = entry.samples;
        status.events = entry.events;
        status.device_errors = entry.device_errors;
        status.classification_errors = entry.classification_errors;
    }
    status
}

enum WorkerExit {
    Stopped,
    Disabled,
    Removed,
    Failed(String),
}

struct Worker {
    inner: Arc<Inner>,
    device_id: String,
    generation: u64,
    connection: ConnectionConfig,
    adapter: Box<dyn DeviceAdapter>,
    stop_rx: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let lane = self.inner.router.lane(self.device_id.clone());
        let exit = self.poll_loop(&lane).await;
        self.adapter.close().await;
        // Queued events keep draining after the worker is gone.
        drop(lane);

        let generation = self.generation;
        match &exit {
            WorkerExit::Stopped => {
                tracing::debug!(device_id = %self.device_id, "Worker acknowledged stop");
            }
            WorkerExit::Disabled | WorkerExit::Removed => {
                tracing::info!(device_id = %self.device_id, "Device no longer enabled, worker exiting");
                self.inner.with_entry(&self.device_id, generation, |entry| {
                    if entry.state == WorkerState::Running {
                        entry.state = WorkerState::Stopped;
                        entry.stop_tx = None;
                        entry.handle = None;
                    }
                });
            }
            WorkerExit::Failed(reason) => {
                tracing::error!(
                    device_id = %self.device_id,
                    error = %reason,
                    "Retry budget exhausted, worker exiting"
                );
                self.inner.with_entry(&self.device_id, generation, |entry| {
                    if entry.state == WorkerState::Running {
                        entry.state = WorkerState::Error;
                        entry.stop_tx = None;
                        entry.handle = None;
                    }
                    entry.last_error = Some(reason.clone());
                });
            }
        }
    }

    async fn poll_loop(&mut self, lane: &DispatchLane) -> WorkerExit {
        let settings = self.inner.settings;
        let mut failures: u32 = 0;

        loop {
            if *self.stop_rx.borrow() {
                return WorkerExit::Stopped;
            }
            let Some(config) = self.inner.registry.get(&self.device_id) else {
                return WorkerExit::Removed;
            };
            if !config.enabled {
                return WorkerExit::Disabled;
            }
            if config.connection != self.connection {
                if let Err(reason) = self.reconnect(&config).await {
                    failures += 1;
                    self.record_error(&reason);
                    if failures > settings.retry_budget {
                        return WorkerExit::Failed(reason);
                    }
                    if self.wait_or_stop(settings.retry_backoff()).await {
                        return WorkerExit::Stopped;
                    }
                    continue;
                }
            }

            match self.adapter.read_next(settings.read_timeout()).await {
                Ok(None) => failures = 0,
                Ok(Some(sample)) => {
                    failures = 0;
                    self.process(&config, sample, lane).await;
                }
                Err(e) => {
                    let mut reason = e.to_string();
                    failures += 1;
                    tracing::warn!(
                        device_id = %self.device_id,
                        attempt = failures,
                        error = %reason,
                        "Device read failed"
                    );
                    self.record_error(&reason);

                    // Reopen with backoff until it works or the budget is spent.
                    loop {
                        if failures > settings.retry_budget {
                            return WorkerExit::Failed(reason);
                        }
                        self.adapter.close().await;
                        if self.wait_or_stop(settings.retry_backoff()).await {
                            return WorkerExit::Stopped;
                        }
                        match self.adapter.open().await {
                            Ok(()) => break,
                            Err(e) => {
                                reason = e.to_string();
                                failures += 1;
                                self.record_error(&reason);
                            }
                        }
                    }
                    continue;
                }
            }

            if self.wait_or_stop(config.poll_interval()).await {
                return WorkerExit::Stopped;
            }
        }
    }

    async fn process(&mut self, config: &DeviceConfig, sample: Sample, lane: &DispatchLane) {
        let captured_at = sample.captured_at;
        let events = match self.inner.classifier.classify(config, &sample).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(device_id = %self.device_id, error = %e, "Classification failed, sample dropped");
                self.inner.with_entry(&self.device_id, self.generation, |entry| {
                    entry.samples += 1;
                    entry.classification_errors += 1;
                    entry.last_sample_at = Some(captured_at);
                    entry.last_error = Some(e.to_string());
                });
                return;
            }
        };

        let count = events.len() as u64;
        for event in events {
            if !lane.submit(PipelineEvent::from(event)).await {
                tracing::warn!(device_id = %self.device_id, "Dispatch lane closed, dropping event");
            }
        }

        self.inner.with_entry(&self.device_id, self.generation, |entry| {
            entry.samples += 1;
            entry.events += count;
            entry.last_sample_at = Some(captured_at);
        });
    }

    async fn reconnect(&mut self, config: &DeviceConfig) -> Result<(), String> {
        tracing::info!(device_id = %self.device_id, "Connection settings changed, reconnecting");
        self.adapter.close().await;
        let mut adapter = self.inner.factory.create(config).map_err(|e| e.to_string())?;
        adapter.open().await.map_err(|e| e.to_string())?;
        self.adapter = adapter;
        self.connection = config.connection.clone();
        Ok(())
    }

    fn record_error(&self, reason: &str) {
        self.inner.with_entry(&self.device_id, self.generation, |entry| {
            entry.device_errors += 1;
            entry.last_error = Some(reason.to_string());
        });
    }

    /// Sleep for `period`, waking early on stop. Returns true if stop was
    /// requested.
    async fn wait_or_stop(&mut self, period: Duration) -> bool {
        if *self.stop_rx.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => *self.stop_rx.borrow(),
            changed = self.stop_rx.changed() => changed.is_err() || *self.stop_rx.borrow(),
        }
    }
}
