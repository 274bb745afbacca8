//! Delta-sampling rate engine.
//!
//! Kernel counters only ever grow, so a rate needs two readings of the same
//! entity. The [`RateTracker`] keeps the previous reading per
//! ([`Metric`], [`TrackedEntity`]) pair and turns each new reading into a
//! rate against it. The first request for an unseen key captures a
//! reading, waits out the settling interval, and captures a second one.
//!
//! Per-key state sits behind its own mutex, which is held for the whole
//! sample (bootstrap wait included). Two callers sampling the same key are
//! serialized; callers sampling different keys never contend past the
//! table lookup.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, WatchError};

/// Settling interval used when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Time source for snapshot timestamps and the bootstrap wait
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary, fixed origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `Instant` and `thread::sleep`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// What a rate is computed for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackedEntity {
    System,
    Core(String),
    Process(u32),
}

impl fmt::Display for TrackedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackedEntity::System => write!(f, "system"),
            TrackedEntity::Core(name) => write!(f, "core {}", name),
            TrackedEntity::Process(pid) => write!(f, "pid {}", pid),
        }
    }
}

/// Counter family being tracked; one entity can be tracked under several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Cpu,
    Io,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleKey {
    pub metric: Metric,
    pub entity: TrackedEntity,
}

impl SampleKey {
    pub fn new(metric: Metric, entity: TrackedEntity) -> Self {
        Self { metric, entity }
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} of {}", self.metric, self.entity)
    }
}

/// Raw counters produced by a reader, before the tracker timestamps them.
///
/// `total` is the denominator of ratio rates (ignored by throughput rates);
/// `values` are the numerators, one rate is produced per value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterReading {
    pub total: u64,
    pub values: Vec<u64>,
}

impl CounterReading {
    pub fn ratio(total: u64, value: u64) -> Self {
        Self {
            total,
            values: vec![value],
        }
    }

    pub fn counters(values: Vec<u64>) -> Self {
        Self { total: 0, values }
    }
}

/// An immutable, timestamped reading of one counter family
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSnapshot {
    pub reading: CounterReading,
    pub taken_at: Duration,
}

/// Previous snapshot of one tracked key. The timestamp lives inside the
/// snapshot, so the state is either fully unset or fully set.
#[derive(Debug, Clone, Default)]
pub struct SampleState {
    previous: Option<CounterSnapshot>,
}

impl SampleState {
    pub fn is_bootstrapped(&self) -> bool {
        self.previous.is_some()
    }

    pub fn previous(&self) -> Option<&CounterSnapshot> {
        self.previous.as_ref()
    }
}

/// How a pair of snapshots turns into a rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateKind {
    /// `Δvalue × scale / Δtotal`
    Ratio { scale: f64 },
    /// `Δvalue / divisor / Δseconds`
    Throughput { divisor: f64 },
}

impl RateKind {
    pub const PERCENT: RateKind = RateKind::Ratio { scale: 100.0 };
    /// Disk I/O is reported in decimal megabytes per second.
    pub const DISK_MB_PER_SEC: RateKind = RateKind::Throughput {
        divisor: 1_000_000.0,
    };
    /// Network throughput is reported in KiB per second.
    pub const NET_KIB_PER_SEC: RateKind = RateKind::Throughput { divisor: 1024.0 };
}

#[derive(Debug, PartialEq)]
enum Delta {
    Rates(Vec<f64>),
    /// The denominator did not advance.
    Stalled,
    /// A counter went backwards: the series restarted.
    Reset,
}

fn compute(previous: &CounterSnapshot, current: &CounterSnapshot, kind: RateKind) -> Delta {
    let prev = &previous.reading;
    let cur = &current.reading;

    if cur.values.len() != prev.values.len()
        || cur.total < prev.total
        || cur.values.iter().zip(&prev.values).any(|(c, p)| c < p)
    {
        return Delta::Reset;
    }

    let deltas = cur.values.iter().zip(&prev.values).map(|(c, p)| (c - p) as f64);
    match kind {
        RateKind::Ratio { scale } => {
            let denominator = cur.total - prev.total;
            if denominator == 0 {
                return Delta::Stalled;
            }
            Delta::Rates(deltas.map(|d| d * scale / denominator as f64).collect())
        }
        RateKind::Throughput { divisor } => {
            let elapsed = current.taken_at.saturating_sub(previous.taken_at).as_secs_f64();
            if elapsed <= 0.0 {
                return Delta::Stalled;
            }
            Delta::Rates(deltas.map(|d| d / divisor / elapsed).collect())
        }
    }
}

type Slot = Arc<Mutex<SampleState>>;
type GroupSlot = Arc<Mutex<BTreeMap<String, SampleState>>>;

/// Owns the per-entity sample state of one monitoring session
pub struct RateTracker {
    states: Mutex<HashMap<SampleKey, Slot>>,
    groups: Mutex<HashMap<Metric, GroupSlot>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl RateTracker {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            clock,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn slot(&self, key: &SampleKey) -> Slot {
        let mut states = self.states.lock();
        Arc::clone(states.entry(key.clone()).or_default())
    }

    fn group(&self, metric: Metric) -> GroupSlot {
        let mut groups = self.groups.lock();
        Arc::clone(groups.entry(metric).or_default())
    }

    fn capture<F>(&self, read: &mut F) -> Result<CounterSnapshot>
    where
        F: FnMut() -> Result<CounterReading>,
    {
        let reading = read()?;
        Ok(CounterSnapshot {
            reading,
            taken_at: self.clock.now(),
        })
    }

    /// Sample one key, blocking for the settling interval if it has never
    /// been sampled before.
    ///
    /// A counter that went backwards resets the key and re-bootstraps once;
    /// a second reset in a row yields [`WatchError::CounterReset`]. A
    /// denominator that did not move yields
    /// [`WatchError::InsufficientInterval`] and keeps the old snapshot so
    /// the next attempt sees a wider gap.
    pub fn sample_rate<F>(&self, key: &SampleKey, kind: RateKind, mut read: F) -> Result<Vec<f64>>
    where
        F: FnMut() -> Result<CounterReading>,
    {
        let slot = self.slot(key);
        let mut state = slot.lock();

        for _ in 0..2 {
            let previous = match state.previous.take() {
                Some(previous) => previous,
                None => {
                    log::debug!("bootstrapping {} ({:?} settle)", key, self.interval);
                    let first = self.capture(&mut read)?;
                    self.clock.sleep(self.interval);
                    first
                }
            };

            let current = match self.capture(&mut read) {
                Ok(current) => current,
                Err(e) => {
                    state.previous = Some(previous);
                    return Err(e);
                }
            };
            match compute(&previous, &current, kind) {
                Delta::Rates(rates) => {
                    state.previous = Some(current);
                    return Ok(rates);
                }
                Delta::Stalled => {
                    state.previous = Some(previous);
                    return Err(WatchError::InsufficientInterval {
                        entity: key.to_string(),
                    });
                }
                Delta::Reset => {
                    log::debug!("counter reset for {}, re-bootstrapping", key);
                }
            }
        }

        Err(WatchError::CounterReset {
            entity: key.to_string(),
        })
    }

    /// First half of the non-blocking API: record the starting snapshot.
    pub fn begin_sample<F>(&self, key: &SampleKey, mut read: F) -> Result<()>
    where
        F: FnMut() -> Result<CounterReading>,
    {
        let snapshot = self.capture(&mut read)?;
        self.slot(key).lock().previous = Some(snapshot);
        Ok(())
    }

    /// Second half of the non-blocking API: compute against the stored
    /// snapshot. On a counter reset the new reading becomes the starting
    /// point and [`WatchError::CounterReset`] asks the caller to finish again
    /// later.
    pub fn finish_sample<F>(&self, key: &SampleKey, kind: RateKind, mut read: F) -> Result<Vec<f64>>
    where
        F: FnMut() -> Result<CounterReading>,
    {
        let slot = self.slot(key);
        let mut state = slot.lock();
        let Some(previous) = state.previous.as_ref() else {
            return Err(WatchError::NotBootstrapped {
                entity: key.to_string(),
            });
        };

        let current = self.capture(&mut read)?;
        match compute(previous, &current, kind) {
            Delta::Rates(rates) => {
                state.previous = Some(current);
                Ok(rates)
            }
            Delta::Stalled => Err(WatchError::InsufficientInterval {
                entity: key.to_string(),
            }),
            Delta::Reset => {
                state.previous = Some(current);
                Err(WatchError::CounterReset {
                    entity: key.to_string(),
                })
            }
        }
    }

    /// Record starting snapshots for the names of a group that have none yet.
    /// Returns whether anything was recorded, in which case the caller owes
    /// one [`settle`](Self::settle) before sampling the group.
    pub fn begin_multi<F>(&self, metric: Metric, mut read: F) -> Result<bool>
    where
        F: FnMut() -> Result<BTreeMap<String, CounterReading>>,
    {
        let group = self.group(metric);
        let mut states = group.lock();
        if !states.is_empty() && states.values().all(SampleState::is_bootstrapped) {
            return Ok(false);
        }

        let mut begun = false;
        for (name, snapshot) in self.capture_all(&mut read)? {
            let state = states.entry(name).or_default();
            if !state.is_bootstrapped() {
                state.previous = Some(snapshot);
                begun = true;
            }
        }
        Ok(begun)
    }

    /// Wait out one settling interval. Pairs with `begin_sample` and
    /// `begin_multi` so that a batch of fresh keys shares a single wait.
    pub fn settle(&self) {
        log::debug!("settling for {:?}", self.interval);
        self.clock.sleep(self.interval);
    }

    /// Sample several named sub-entities that are read together (per-core
    /// CPU). Each name has its own state; all of them share one settling
    /// wait.
    ///
    /// Names that appear for the first time in a non-bootstrap round, stall,
    /// or reset twice are left out of the result rather than failing the
    /// whole call.
    pub fn sample_rates_multi<F>(
        &self,
        metric: Metric,
        kind: RateKind,
        mut read: F,
    ) -> Result<BTreeMap<String, Vec<f64>>>
    where
        F: FnMut() -> Result<BTreeMap<String, CounterReading>>,
    {
        let group = self.group(metric);
        let mut states = group.lock();
        let mut results = BTreeMap::new();
        let mut pending: Option<Vec<String>> = None;

        for _ in 0..2 {
            let mut readings = self.capture_all(&mut read)?;
            if let Some(names) = &pending {
                readings.retain(|name, _| names.contains(name));
            }

            let fresh: Vec<String> = readings
                .keys()
                .filter(|name| !states.get(*name).is_some_and(SampleState::is_bootstrapped))
                .cloned()
                .collect();
            if !fresh.is_empty() {
                log::debug!("bootstrapping {:?} for {} entities", metric, fresh.len());
                for name in &fresh {
                    if let Some(snapshot) = readings.remove(name) {
                        states.entry(name.clone()).or_default().previous = Some(snapshot);
                    }
                }
                self.clock.sleep(self.interval);
                let mut settled = self.capture_all(&mut read)?;
                settled.retain(|name, _| fresh.contains(name));
                readings.extend(settled);
            }

            let mut reset = Vec::new();
            for (name, current) in readings {
                let state = states.entry(name.clone()).or_default();
                let Some(previous) = state.previous.as_ref() else {
                    state.previous = Some(current);
                    continue;
                };
                match compute(previous, &current, kind) {
                    Delta::Rates(rates) => {
                        state.previous = Some(current);
                        results.insert(name, rates);
                    }
                    Delta::Stalled => {
                        log::debug!("{:?} of {} did not advance, skipping", metric, name);
                    }
                    Delta::Reset => {
                        state.previous = None;
                        reset.push(name);
                    }
                }
            }

            if reset.is_empty() {
                return Ok(results);
            }
            pending = Some(reset);
        }

        if let Some(names) = pending {
            log::warn!("{:?} counters kept resetting for {:?}", metric, names);
        }
        Ok(results)
    }

    fn capture_all<F>(&self, read: &mut F) -> Result<BTreeMap<String, CounterSnapshot>>
    where
        F: FnMut() -> Result<BTreeMap<String, CounterReading>>,
    {
        let taken_at = self.clock.now();
        Ok(read()?
            .into_iter()
            .map(|(name, reading)| (name, CounterSnapshot { reading, taken_at }))
            .collect())
    }

    pub fn is_tracked(&self, key: &SampleKey) -> bool {
        self.states
            .lock()
            .get(key)
            .is_some_and(|slot| slot.lock().is_bootstrapped())
    }

    /// Drop every piece of state held for an entity. Call this when a pid has
    /// exited so that a reused pid starts a fresh series.
    pub fn forget(&self, entity: &TrackedEntity) {
        self.states.lock().retain(|key, _| &key.entity != entity);
        if let TrackedEntity::Core(name) = entity {
            for group in self.groups.lock().values() {
                group.lock().remove(name);
            }
        }
    }

    /// Keep process state only for the given live pids.
    pub fn retain_processes(&self, live: &[u32]) {
        self.states.lock().retain(|key, _| match key.entity {
            TrackedEntity::Process(pid) => live.contains(&pid),
            _ => true,
        });
    }

    /// Number of keys that currently hold state
    pub fn tracked_count(&self) -> usize {
        self.states.lock().len()
    }
}
