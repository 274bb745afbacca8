//! Typed sampling operations on top of the rate tracker.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

use super::metrics::*;
use super::rate::{CounterReading, Metric, RateKind, RateTracker, SampleKey, TrackedEntity};
use super::source::SnapshotSource;

/// Collects system and per-process rates from a snapshot source
pub struct MetricsCollector {
    source: Arc<dyn SnapshotSource>,
    tracker: RateTracker,
}

impl MetricsCollector {
    pub fn new(source: Arc<dyn SnapshotSource>, tracker: RateTracker) -> Self {
        Self { source, tracker }
    }

    pub fn tracker(&self) -> &RateTracker {
        &self.tracker
    }

    fn read_cpu(&self) -> Result<CounterReading> {
        let cpu = self.source.cpu_times()?;
        Ok(CounterReading::ratio(cpu.total(), cpu.work()))
    }

    fn read_cores(&self) -> Result<BTreeMap<String, CounterReading>> {
        Ok(self
            .source
            .per_core_times()?
            .into_iter()
            .map(|(name, cpu)| (name, CounterReading::ratio(cpu.total(), cpu.work())))
            .collect())
    }

    fn read_net(&self) -> Result<CounterReading> {
        let net = self.source.net_counters()?;
        Ok(CounterReading::counters(vec![net.recv_bytes, net.send_bytes]))
    }

    fn read_process_cpu(&self, pid: u32) -> Result<CounterReading> {
        let ticks = self.source.process_cpu_ticks(pid)?;
        let total = self.source.cpu_times()?.total();
        Ok(CounterReading::ratio(total, ticks))
    }

    fn read_process_io(&self, pid: u32) -> Result<CounterReading> {
        let io = self.source.process_io(pid)?;
        Ok(CounterReading::counters(vec![io.read_chars, io.write_chars]))
    }

    /// Record a starting snapshot for an untracked key. Returns whether one
    /// was taken.
    fn begin_if_untracked<F>(&self, key: &SampleKey, read: F) -> Result<bool>
    where
        F: FnMut() -> Result<CounterReading>,
    {
        if self.tracker.is_tracked(key) {
            return Ok(false);
        }
        self.tracker.begin_sample(key, read)?;
        Ok(true)
    }

    /// Second phase of a batch: keys begun in this round are finished,
    /// the rest sample normally (without waiting, since they are tracked).
    fn complete<F>(&self, key: &SampleKey, begun: bool, kind: RateKind, read: F) -> Result<Vec<f64>>
    where
        F: FnMut() -> Result<CounterReading>,
    {
        if begun {
            self.tracker.finish_sample(key, kind, read)
        } else {
            self.tracker.sample_rate(key, kind, read)
        }
    }

    /// Whole-machine CPU usage, percent
    pub fn cpu_percent(&self) -> Result<f64> {
        let rates = self
            .tracker
            .sample_rate(&system_key(Metric::Cpu), RateKind::PERCENT, || self.read_cpu())?;
        Ok(first(&rates))
    }

    /// CPU usage of every core, percent, keyed by `cpuN`
    pub fn core_percents(&self) -> Result<BTreeMap<String, f64>> {
        let rates = self
            .tracker
            .sample_rates_multi(Metric::Cpu, RateKind::PERCENT, || self.read_cores())?;
        Ok(rates
            .into_iter()
            .map(|(name, rates)| (name, first(&rates)))
            .collect())
    }

    /// Memory in use, percent. Instantaneous; no tracker state involved.
    pub fn mem_percent(&self) -> Result<f64> {
        Ok(self.source.memory()?.used_percent())
    }

    pub fn memory(&self) -> Result<MemoryMetrics> {
        let mem = self.source.memory()?;
        Ok(MemoryMetrics {
            total_kb: mem.total_kb,
            free_kb: mem.free_kb,
            available_kb: mem.available_kb,
            used_percent: mem.used_percent(),
        })
    }

    /// Download/upload speed summed over all non-loopback devices
    pub fn net_speed(&self) -> Result<NetSpeed> {
        let rates = self.tracker.sample_rate(
            &system_key(Metric::Network),
            RateKind::NET_KIB_PER_SEC,
            || self.read_net(),
        )?;
        Ok(net_speed_from(&rates))
    }

    /// Share of total machine CPU time used by one process, percent.
    ///
    /// The denominator is the system-wide tick total, so a process saturating
    /// one of eight cores reads 12.5.
    pub fn process_cpu_percent(&self, pid: u32) -> Result<f64> {
        let rates = self.tracker.sample_rate(
            &process_key(Metric::Cpu, pid),
            RateKind::PERCENT,
            || self.read_process_cpu(pid),
        )?;
        Ok(first(&rates))
    }

    pub fn process_io_rate(&self, pid: u32) -> Result<IoRate> {
        let rates = self.tracker.sample_rate(
            &process_key(Metric::Io, pid),
            RateKind::DISK_MB_PER_SEC,
            || self.read_process_io(pid),
        )?;
        Ok(io_rate_from(&rates))
    }

    pub fn process_rss_bytes(&self, pid: u32) -> Result<u64> {
        self.source.process_rss_bytes(pid)
    }

    /// Resident memory of one process as a share of physical memory, percent
    pub fn process_mem_percent(&self, pid: u32) -> Result<f64> {
        let rss = self.source.process_rss_bytes(pid)?;
        let total_bytes = self.source.memory()?.total_kb * 1024;
        if total_bytes == 0 {
            return Ok(0.0);
        }
        Ok(rss as f64 * 100.0 / total_bytes as f64)
    }

    /// Everything known about one process in a single call.
    ///
    /// Identity, CPU and memory failures propagate. I/O is optional: a
    /// zombie or access-denied I/O read leaves `io` empty. Fresh CPU and I/O
    /// series share one settling wait.
    pub fn process_metrics(&self, pid: u32) -> Result<ProcessMetrics> {
        let identity = self.source.identity(pid)?;
        let cpu_key = process_key(Metric::Cpu, pid);
        let io_key = process_key(Metric::Io, pid);

        let cpu_begun = self.begin_if_untracked(&cpu_key, || self.read_process_cpu(pid))?;
        let io_begun = match self.begin_if_untracked(&io_key, || self.read_process_io(pid)) {
            Ok(begun) => begun,
            Err(e) if e.is_zombie() || e.is_access_denied() => false,
            Err(e) => return Err(e),
        };
        if cpu_begun || io_begun {
            self.tracker.settle();
        }

        let cpu_rates = self.complete(&cpu_key, cpu_begun, RateKind::PERCENT, || {
            self.read_process_cpu(pid)
        })?;
        let memory_bytes = self.process_rss_bytes(pid)?;
        let memory_percent = self.process_mem_percent(pid)?;
        let io = match self.complete(&io_key, io_begun, RateKind::DISK_MB_PER_SEC, || {
            self.read_process_io(pid)
        }) {
            Ok(rates) => Some(io_rate_from(&rates)),
            Err(e) if e.is_zombie() || e.is_access_denied() => {
                log::debug!("no I/O rate for pid {}: {}", pid, e);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(ProcessMetrics {
            pid,
            name: identity.command_name,
            state: identity.state_char,
            parent_pid: identity.parent_pid,
            group_id: identity.group_id,
            cpu_percent: first(&cpu_rates),
            memory_bytes,
            memory_percent,
            io,
        })
    }

    /// System CPU, cores, memory and network in one round. Fresh series
    /// share one settling wait.
    pub fn system_metrics(&self) -> Result<SystemMetrics> {
        let cpu_key = system_key(Metric::Cpu);
        let net_key = system_key(Metric::Network);

        let cpu_begun = self.begin_if_untracked(&cpu_key, || self.read_cpu())?;
        let net_begun = self.begin_if_untracked(&net_key, || self.read_net())?;
        let cores_begun = self.tracker.begin_multi(Metric::Cpu, || self.read_cores())?;
        if cpu_begun || net_begun || cores_begun {
            self.tracker.settle();
        }

        let cpu_rates = self.complete(&cpu_key, cpu_begun, RateKind::PERCENT, || self.read_cpu())?;
        let net_rates = self.complete(&net_key, net_begun, RateKind::NET_KIB_PER_SEC, || {
            self.read_net()
        })?;
        Ok(SystemMetrics {
            timestamp: chrono::Utc::now().timestamp(),
            cpu_percent: first(&cpu_rates),
            per_core_percent: self.core_percents()?,
            memory: self.memory()?,
            network: net_speed_from(&net_rates),
        })
    }

    /// Discard tracker state of an exited process
    pub fn forget_process(&self, pid: u32) {
        self.tracker.forget(&TrackedEntity::Process(pid));
    }
}

fn system_key(metric: Metric) -> SampleKey {
    SampleKey::new(metric, TrackedEntity::System)
}

fn process_key(metric: Metric, pid: u32) -> SampleKey {
    SampleKey::new(metric, TrackedEntity::Process(pid))
}

fn net_speed_from(rates: &[f64]) -> NetSpeed {
    NetSpeed {
        download_kib_per_sec: first(rates),
        upload_kib_per_sec: rates.get(1).copied().unwrap_or_default(),
    }
}

fn io_rate_from(rates: &[f64]) -> IoRate {
    IoRate {
        read_mb_per_sec: first(rates),
        write_mb_per_sec: rates.get(1).copied().unwrap_or_default(),
    }
}

fn first(rates: &[f64]) -> f64 {
    rates.first().copied().unwrap_or_default()
}
