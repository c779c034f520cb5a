//! Runs every enabled dataset on its own timer.
//!
//! Each dataset gets a tokio task that owns its collector. On every tick the
//! collector runs on a blocking worker with a deadline of
//! `min(interval, max_timeout)`. A tick that arrives while the previous
//! invocation is still running is skipped. Failures are logged and counted;
//! the next tick simply tries again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::shared::config::DEFAULT_MAX_TIMEOUT;
use crate::shared::error::{CollectionError, RegistryError};
use crate::shared::event::EventNormalizer;
use crate::shared::record::Collection;
use crate::shared::registry::{CollectorDescriptor, CollectorFactory, CollectorRegistry};
use crate::shared::sink::EventSink;
use crate::shared::traits::{CollectContext, DataCollector};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Upper bound on a single collection, whatever the interval.
    pub max_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_timeout: DEFAULT_MAX_TIMEOUT,
        }
    }
}

/// Where a dataset's collector currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Running,
    /// The last invocation failed; the next tick retries.
    Failed,
}

impl CollectorState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CollectorState::Running,
            2 => CollectorState::Failed,
            _ => CollectorState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CollectorState::Idle => 0,
            CollectorState::Running => 1,
            CollectorState::Failed => 2,
        }
    }
}

/// Live counters for one dataset.
#[derive(Debug, Default)]
pub struct DatasetStats {
    ticks: AtomicU64,
    invocations: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    events: AtomicU64,
    dropped: AtomicU64,
    sink_failures: AtomicU64,
    state: AtomicU8,
}

impl DatasetStats {
    fn set_state(&self, state: CollectorState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            state: CollectorState::from_u8(self.state.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub invocations: u64,
    /// Ticks skipped because the previous invocation was still running.
    pub skipped: u64,
    pub failures: u64,
    pub events: u64,
    /// Events dropped by the normalizer.
    pub dropped: u64,
    pub sink_failures: u64,
    pub state: CollectorState,
}

struct RunningDataset {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the registry and every per-dataset timer.
pub struct Scheduler {
    registry: CollectorRegistry,
    normalizer: Arc<EventNormalizer>,
    sink: Arc<dyn EventSink>,
    options: SchedulerOptions,
    root: CancellationToken,
    running: HashMap<String, RunningDataset>,
    stats: HashMap<String, Arc<DatasetStats>>,
}

impl Scheduler {
    pub fn new(
        registry: CollectorRegistry,
        normalizer: EventNormalizer,
        sink: Arc<dyn EventSink>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            registry,
            normalizer: Arc::new(normalizer),
            sink,
            options,
            root: CancellationToken::new(),
            running: HashMap::new(),
            stats: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Starts a timer for every enabled dataset. A dataset whose collector
    /// cannot be constructed is logged and left stopped.
    pub fn start(&mut self) -> Result<(), RegistryError> {
        let descriptors = self.registry.enabled_descriptors();
        info!("Starting scheduler with {} datasets", descriptors.len());
        for descriptor in descriptors {
            match self.spawn_dataset(&descriptor.name) {
                Ok(()) => {}
                Err(RegistryError::Factory { dataset, source }) => {
                    error!("Dataset {} could not be started: {}", dataset, source);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Starts the dataset's timer if it is not already running.
    pub fn enable(&mut self, name: &str) -> Result<(), RegistryError> {
        self.registry.descriptor(name)?;
        if self.is_running(name) {
            return Ok(());
        }
        self.spawn_dataset(name)
    }

    /// Stops the dataset's timer and waits for an in-flight invocation.
    pub async fn disable(&mut self, name: &str) -> Result<(), RegistryError> {
        self.registry.descriptor(name)?;
        if let Some(running) = self.running.remove(name) {
            running.token.cancel();
            if let Err(e) = running.handle.await {
                error!("Dataset {} task ended abnormally: {}", name, e);
            }
            info!("Dataset {} disabled", name);
        }
        Ok(())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running
            .get(name)
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn running_datasets(&self) -> Vec<String> {
        let mut names: Vec<_> = self.running.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self, name: &str) -> Option<StatsSnapshot> {
        self.stats.get(name).map(|s| s.snapshot())
    }

    /// Token that fires when the scheduler shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Cancels every timer, drains in-flight invocations and returns the
    /// registry.
    pub async fn shutdown(mut self) -> CollectorRegistry {
        info!("Shutting down scheduler ({} datasets)", self.running.len());
        self.root.cancel();
        let handles: Vec<_> = self.running.drain().map(|(_, r)| r.handle).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Dataset task ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
        self.registry
    }

    fn spawn_dataset(&mut self, name: &str) -> Result<(), RegistryError> {
        let descriptor = self.registry.descriptor(name)?;
        let factory = self.registry.factory(name)?;
        let collector = self.registry.resolve(name)?;
        let token = self.root.child_token();
        let stats = Arc::clone(self.stats.entry(name.to_string()).or_default());
        stats.set_state(CollectorState::Idle);

        let task = DatasetTask {
            timeout: descriptor.interval.min(self.options.max_timeout),
            descriptor,
            factory,
            normalizer: Arc::clone(&self.normalizer),
            sink: Arc::clone(&self.sink),
            stats,
            token: token.clone(),
            last_timestamp: None,
        };
        let handle = tokio::spawn(task.run(collector));
        self.running
            .insert(name.to_string(), RunningDataset { token, handle });
        Ok(())
    }
}

type Invocation = JoinHandle<(Box<dyn DataCollector>, Result<Collection, CollectionError>)>;

/// The collector is either home or out on a blocking worker.
enum Slot {
    Idle(Box<dyn DataCollector>),
    /// Still running past its deadline, which is kept for shutdown draining.
    Busy(Invocation, Instant),
    Lost,
}

struct DatasetTask {
    descriptor: Arc<CollectorDescriptor>,
    factory: CollectorFactory,
    timeout: Duration,
    normalizer: Arc<EventNormalizer>,
    sink: Arc<dyn EventSink>,
    stats: Arc<DatasetStats>,
    token: CancellationToken,
    last_timestamp: Option<DateTime<Utc>>,
}

impl DatasetTask {
    async fn run(mut self, collector: Box<dyn DataCollector>) {
        let name = self.descriptor.name.clone();
        debug!(
            "Dataset {} scheduled every {:?} (timeout {:?})",
            name, self.descriptor.interval, self.timeout
        );

        // Ticks are armed from the first fire time, not from completion.
        let mut ticker = time::interval_at(Instant::now(), self.descriptor.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut slot = Slot::Idle(collector);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.stats.ticks.fetch_add(1, Ordering::Relaxed);

            let collector = match self.reclaim(slot).await {
                Ok(collector) => collector,
                Err(Slot::Lost) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    self.stats.set_state(CollectorState::Failed);
                    slot = Slot::Lost;
                    continue;
                }
                Err(busy) => {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Skipping tick for dataset {}: previous collection still running",
                        name
                    );
                    slot = busy;
                    continue;
                }
            };

            let timestamp = self.next_timestamp();
            slot = self.invoke(collector, timestamp).await;
        }

        if let Slot::Busy(handle, deadline) = slot {
            if Instant::now() < deadline {
                debug!("Waiting for in-flight collection of {} to finish", name);
                let _ = time::timeout_at(deadline, handle).await;
            } else {
                warn!("Abandoning collection of {} that outlived its deadline", name);
            }
        }
        self.stats.set_state(CollectorState::Idle);
        debug!("Dataset {} stopped", name);
    }

    /// Gets the collector back, or hands the still-busy slot back as `Err`.
    async fn reclaim(&self, slot: Slot) -> Result<Box<dyn DataCollector>, Slot> {
        match slot {
            Slot::Idle(collector) => Ok(collector),
            Slot::Busy(handle, deadline) if !handle.is_finished() => Err(Slot::Busy(handle, deadline)),
            Slot::Busy(handle, _) => match handle.await {
                // Result of an invocation that already timed out is stale.
                Ok((collector, _)) => {
                    self.stats.set_state(CollectorState::Failed);
                    Ok(collector)
                }
                Err(e) => {
                    error!("Collector for {} panicked: {}", self.descriptor.name, e);
                    self.rebuild().ok_or(Slot::Lost)
                }
            },
            Slot::Lost => self.rebuild().ok_or(Slot::Lost),
        }
    }

    fn rebuild(&self) -> Option<Box<dyn DataCollector>> {
        match (self.factory)() {
            Ok(collector) => Some(collector),
            Err(e) => {
                error!("Failed to recreate collector for {}: {}", self.descriptor.name, e);
                None
            }
        }
    }

    /// Wall-clock time of this tick, never earlier than the previous one.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    async fn invoke(&self, mut collector: Box<dyn DataCollector>, timestamp: DateTime<Utc>) -> Slot {
        let name = &self.descriptor.name;
        let deadline = Instant::now() + self.timeout;
        let ctx = CollectContext::new(deadline.into_std(), self.token.child_token());

        self.stats.invocations.fetch_add(1, Ordering::Relaxed);
        self.stats.set_state(CollectorState::Running);
        let mut handle: Invocation = tokio::task::spawn_blocking(move || {
            let result = collector.collect(&ctx);
            (collector, result)
        });

        let joined = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = time::sleep_until(deadline) => None,
            _ = self.token.cancelled() => {
                // Give the collector until its deadline to notice.
                time::timeout_at(deadline, &mut handle).await.ok()
            }
        };

        match joined {
            Some(Ok((collector, result))) => {
                self.handle_result(result, timestamp).await;
                Slot::Idle(collector)
            }
            Some(Err(e)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                self.stats.set_state(CollectorState::Failed);
                error!("Collector for {} panicked: {}", name, e);
                match self.rebuild() {
                    Some(collector) => Slot::Idle(collector),
                    None => Slot::Lost,
                }
            }
            None => {
                // Still on its worker, so the state stays Running until reclaimed.
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                if self.token.is_cancelled() {
                    warn!("Collector for {} did not stop within {:?}", name, self.timeout);
                } else {
                    error!("Error collecting {}: {}", name, CollectionError::Timeout);
                }
                Slot::Busy(handle, deadline)
            }
        }
    }

    async fn handle_result(&self, result: Result<Collection, CollectionError>, timestamp: DateTime<Utc>) {
        let name = &self.descriptor.name;
        let collection = match result {
            Ok(collection) => collection,
            Err(CollectionError::Cancelled) => {
                debug!("Collection of {} cancelled", name);
                self.stats.set_state(CollectorState::Idle);
                return;
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                self.stats.set_state(CollectorState::Failed);
                error!("Error collecting {}: {}", name, e);
                return;
            }
        };
        self.stats.set_state(CollectorState::Idle);

        if collection.degraded {
            debug!("Dataset {} collected with reduced visibility", name);
        }

        let mut events = Vec::with_capacity(collection.records.len());
        for record in collection.records {
            match self
                .normalizer
                .normalize(&self.descriptor, record, timestamp, collection.degraded)
            {
                Ok(event) => events.push(event),
                Err(e) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping {} event: {}", name, e);
                }
            }
        }

        if events.is_empty() {
            debug!("Dataset {} produced no events", name);
            return;
        }

        let count = events.len() as u64;
        match self.sink.publish(events).await {
            Ok(()) => {
                self.stats.events.fetch_add(count, Ordering::Relaxed);
                debug!("Published {} {} events to {}", count, name, self.sink.name());
            }
            Err(e) => {
                self.stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                error!("Failed to publish {} {} events: {}", count, name, e);
            }
        }
    }
}
