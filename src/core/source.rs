//! Point-in-time counter reads from the kernel.
//!
//! A [`SnapshotSource`] has no memory of previous calls: every method is a
//! single read-and-parse of one counter family. All failures come back as a
//! classified [`WatchError`], never as a raw I/O error for pid-bound reads.
//!
//! [`ProcFs`] is the Linux implementation. Its root is configurable so tests
//! can point it at a fixture tree instead of `/proc`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchError};
use crate::platform;

/// Aggregate CPU time counters of one `cpu` line in `/proc/stat`, in ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// Ticks spent doing work: user + nice + system.
    pub fn work(&self) -> u64 {
        self.user + self.nice + self.system
    }

    /// Sum of the eight accounted states. guest and guest_nice are already
    /// folded into user and nice, so they are left out.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

/// System memory totals from `/proc/meminfo`, in kilobytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemInfo {
    pub total_kb: u64,
    pub free_kb: u64,
    pub available_kb: u64,
}

impl MemInfo {
    /// Percentage of memory in use, computed from `MemAvailable` so that
    /// reclaimable caches do not count as used.
    pub fn used_percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        self.total_kb.saturating_sub(self.available_kb) as f64 * 100.0 / self.total_kb as f64
    }
}

/// Aggregate network byte counters over every device except loopback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetCounters {
    pub recv_bytes: u64,
    pub send_bytes: u64,
}

/// Per-process I/O counters from `/proc/<pid>/io`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoCounters {
    pub read_chars: u64,
    pub write_chars: u64,
}

/// Identity record of one process, read fresh on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub command_name: String,
    pub state_char: char,
    pub parent_pid: u32,
    pub group_id: u32,
}

impl ProcessIdentity {
    pub fn is_zombie(&self) -> bool {
        self.state_char == 'Z'
    }

    /// The zombie condition for this process, carrying its name and parent.
    pub fn zombie_error(&self) -> WatchError {
        WatchError::zombie(
            self.pid,
            Some(self.command_name.clone()),
            Some(self.parent_pid),
        )
    }
}

/// Everything the core needs out of `/proc/<pid>/stat` in one read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStat {
    pub identity: ProcessIdentity,
    pub utime: u64,
    pub stime: u64,
    pub cutime: u64,
    pub cstime: u64,
    pub rss_pages: u64,
}

impl ProcessStat {
    /// utime + stime + cutime + cstime
    pub fn cpu_ticks(&self) -> u64 {
        self.utime + self.stime + self.cutime + self.cstime
    }
}

/// One-shot reads of kernel counters and process identity fields.
pub trait SnapshotSource: Send + Sync {
    /// System-wide `cpu` line.
    fn cpu_times(&self) -> Result<CpuTimes>;

    /// Every `cpuN` line, keyed by its name.
    fn per_core_times(&self) -> Result<BTreeMap<String, CpuTimes>>;

    fn memory(&self) -> Result<MemInfo>;

    fn net_counters(&self) -> Result<NetCounters>;

    /// All currently visible pids, ascending.
    fn list_pids(&self) -> Result<Vec<u32>>;

    fn process_stat(&self, pid: u32) -> Result<ProcessStat>;

    fn process_io(&self, pid: u32) -> Result<IoCounters>;

    /// Full command line joined with spaces; empty for kernel threads and zombies.
    fn cmdline(&self, pid: u32) -> Result<String>;

    fn exe_path(&self, pid: u32) -> Result<PathBuf>;

    /// Working directory of the process.
    fn cwd(&self, pid: u32) -> Result<PathBuf>;

    fn page_size(&self) -> u64 {
        platform::page_size()
    }

    fn identity(&self, pid: u32) -> Result<ProcessIdentity> {
        Ok(self.process_stat(pid)?.identity)
    }

    fn process_cpu_ticks(&self, pid: u32) -> Result<u64> {
        Ok(self.process_stat(pid)?.cpu_ticks())
    }

    fn process_rss_bytes(&self, pid: u32) -> Result<u64> {
        Ok(self.process_stat(pid)?.rss_pages * self.page_size())
    }
}

impl<S: SnapshotSource + ?Sized> SnapshotSource for Arc<S> {
    fn cpu_times(&self) -> Result<CpuTimes> {
        (**self).cpu_times()
    }

    fn per_core_times(&self) -> Result<BTreeMap<String, CpuTimes>> {
        (**self).per_core_times()
    }

    fn memory(&self) -> Result<MemInfo> {
        (**self).memory()
    }

    fn net_counters(&self) -> Result<NetCounters> {
        (**self).net_counters()
    }

    fn list_pids(&self) -> Result<Vec<u32>> {
        (**self).list_pids()
    }

    fn process_stat(&self, pid: u32) -> Result<ProcessStat> {
        (**self).process_stat(pid)
    }

    fn process_io(&self, pid: u32) -> Result<IoCounters> {
        (**self).process_io(pid)
    }

    fn cmdline(&self, pid: u32) -> Result<String> {
        (**self).cmdline(pid)
    }

    fn exe_path(&self, pid: u32) -> Result<PathBuf> {
        (**self).exe_path(pid)
    }

    fn cwd(&self, pid: u32) -> Result<PathBuf> {
        (**self).cwd(pid)
    }

    fn page_size(&self) -> u64 {
        (**self).page_size()
    }
}

/// Snapshot source backed by a procfs mount
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
    page_size: u64,
}

impl ProcFs {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            page_size: platform::page_size(),
        }
    }

    /// Override the page size used to convert `rss` (fixture trees).
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn system_file(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        fs::read_to_string(&path)
            .map_err(|e| WatchError::malformed(path.display().to_string(), e.to_string()))
    }

    fn pid_path(&self, pid: u32, name: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(name)
    }

    /// Read a pid file with plain errno classification. Used for `stat`
    /// itself, where no zombie check is possible.
    fn read_stat_raw(&self, pid: u32) -> Result<String> {
        fs::read_to_string(self.pid_path(pid, "stat")).map_err(|e| WatchError::from_pid_io(pid, e))
    }

    /// Classify a failed pid-bound read, promoting it to a zombie condition
    /// when the process turns out to be defunct.
    fn classify(&self, pid: u32, err: io::Error) -> WatchError {
        let base = WatchError::from_pid_io(pid, err);
        if !base.is_per_process() {
            return base;
        }
        match self.process_stat(pid) {
            Ok(stat) if stat.identity.is_zombie() => stat.identity.zombie_error(),
            Ok(stat) => base.with_name(stat.identity.command_name),
            Err(stat_err) if stat_err.is_no_such_process() => stat_err,
            Err(_) => base,
        }
    }

    fn read_pid_file(&self, pid: u32, name: &str) -> Result<String> {
        fs::read_to_string(self.pid_path(pid, name)).map_err(|e| self.classify(pid, e))
    }

    fn read_pid_link(&self, pid: u32, name: &str) -> Result<PathBuf> {
        fs::read_link(self.pid_path(pid, name)).map_err(|e| self.classify(pid, e))
    }

    /// Refuse operations a zombie cannot answer.
    fn ensure_not_zombie(&self, pid: u32) -> Result<()> {
        let stat = self.process_stat(pid)?;
        if stat.identity.is_zombie() {
            return Err(stat.identity.zombie_error());
        }
        Ok(())
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for ProcFs {
    fn cpu_times(&self) -> Result<CpuTimes> {
        let content = self.system_file("stat")?;
        let (_, times) = parse_cpu_lines(&content)?
            .into_iter()
            .find(|(name, _)| name == "cpu")
            .ok_or_else(|| WatchError::malformed("/proc/stat", "missing aggregate cpu line"))?;
        Ok(times)
    }

    fn per_core_times(&self) -> Result<BTreeMap<String, CpuTimes>> {
        let content = self.system_file("stat")?;
        Ok(parse_cpu_lines(&content)?
            .into_iter()
            .filter(|(name, _)| name != "cpu")
            .collect())
    }

    fn memory(&self) -> Result<MemInfo> {
        parse_meminfo(&self.system_file("meminfo")?)
    }

    fn net_counters(&self) -> Result<NetCounters> {
        parse_net_dev(&self.system_file("net/dev")?)
    }

    fn list_pids(&self) -> Result<Vec<u32>> {
        let mut pids: Vec<u32> = fs::read_dir(&self.root)
            .map_err(|e| WatchError::malformed(self.root.display().to_string(), e.to_string()))?
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|&pid| pid > 0)
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn process_stat(&self, pid: u32) -> Result<ProcessStat> {
        let content = self.read_stat_raw(pid)?;
        parse_process_stat(&content).ok_or_else(|| {
            log::debug!("unparseable stat for pid {}: {:?}", pid, content);
            WatchError::no_such_process(pid)
        })
    }

    fn process_io(&self, pid: u32) -> Result<IoCounters> {
        self.ensure_not_zombie(pid)?;
        let content = self.read_pid_file(pid, "io")?;
        parse_process_io(&content).ok_or_else(|| WatchError::no_such_process(pid))
    }

    fn cmdline(&self, pid: u32) -> Result<String> {
        let raw = self.read_pid_file(pid, "cmdline")?;
        Ok(raw
            .split('\0')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn exe_path(&self, pid: u32) -> Result<PathBuf> {
        self.ensure_not_zombie(pid)?;
        self.read_pid_link(pid, "exe")
    }

    fn cwd(&self, pid: u32) -> Result<PathBuf> {
        self.read_pid_link(pid, "cwd")
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }
}

/// Parse every `cpu*` line of `/proc/stat`, in file order.
pub fn parse_cpu_lines(content: &str) -> Result<Vec<(String, CpuTimes)>> {
    let mut result = Vec::new();
    for line in content.lines().filter(|l| l.starts_with("cpu")) {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default().to_string();
        let fields = parts
            .take(8)
            .map(str::parse::<u64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| WatchError::malformed("/proc/stat", format!("{}: {}", name, e)))?;

        // kernels older than 2.6.11 report fewer columns
        if fields.len() < 4 {
            return Err(WatchError::malformed(
                "/proc/stat",
                format!("{}: expected at least 4 fields, got {}", name, fields.len()),
            ));
        }
        let field = |i: usize| fields.get(i).copied().unwrap_or(0);

        result.push((
            name,
            CpuTimes {
                user: field(0),
                nice: field(1),
                system: field(2),
                idle: field(3),
                iowait: field(4),
                irq: field(5),
                softirq: field(6),
                steal: field(7),
            },
        ));
    }
    Ok(result)
}

pub fn parse_meminfo(content: &str) -> Result<MemInfo> {
    let values: HashMap<&str, u64> = content
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim(), value))
        })
        .collect();

    let total_kb = *values
        .get("MemTotal")
        .ok_or_else(|| WatchError::malformed("/proc/meminfo", "missing MemTotal"))?;
    let free_kb = values.get("MemFree").copied().unwrap_or(0);
    // MemAvailable only exists since 3.14; approximate it on older kernels
    let available_kb = values.get("MemAvailable").copied().unwrap_or_else(|| {
        free_kb
            + values.get("Buffers").copied().unwrap_or(0)
            + values.get("Cached").copied().unwrap_or(0)
    });

    Ok(MemInfo {
        total_kb,
        free_kb,
        available_kb,
    })
}

pub fn parse_net_dev(content: &str) -> Result<NetCounters> {
    let mut counters = NetCounters::default();
    for line in content.lines() {
        let Some((iface, data)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let columns: Vec<&str> = data.split_whitespace().collect();
        if columns.len() < 9 {
            return Err(WatchError::malformed(
                "/proc/net/dev",
                format!("{}: expected 16 columns, got {}", iface.trim(), columns.len()),
            ));
        }
        let parse = |s: &str| {
            s.parse::<u64>()
                .map_err(|e| WatchError::malformed("/proc/net/dev", format!("{}: {}", iface.trim(), e)))
        };
        counters.recv_bytes += parse(columns[0])?;
        counters.send_bytes += parse(columns[8])?;
    }
    Ok(counters)
}

/// Parse `/proc/<pid>/stat`. The command name sits in parentheses and may
/// itself contain spaces or parentheses, so it is cut at the last `)`.
pub fn parse_process_stat(content: &str) -> Option<ProcessStat> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let pid = content[..open].trim().parse().ok()?;
    let command_name = content[open + 1..close].to_string();

    // fields[0] is field 3 (state) of proc(5)
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    let state_char = fields.first()?.chars().next()?;
    let unsigned = |field: usize| -> Option<u64> { fields.get(field - 3)?.parse().ok() };
    // cutime and cstime are signed in the kernel
    let signed = |field: usize| -> Option<u64> {
        fields.get(field - 3)?.parse::<i64>().ok().map(|v| v.max(0) as u64)
    };
    let identity = ProcessIdentity {
        pid,
        command_name,
        state_char,
        parent_pid: unsigned(4)? as u32,
        group_id: unsigned(5)? as u32,
    };

    Some(ProcessStat {
        identity,
        utime: unsigned(14)?,
        stime: unsigned(15)?,
        cutime: signed(16)?,
        cstime: signed(17)?,
        rss_pages: signed(24)?,
    })
}

pub fn parse_process_io(content: &str) -> Option<IoCounters> {
    let mut read_chars = None;
    let mut write_chars = None;
    for line in content.lines() {
        match line.split_once(':') {
            Some(("rchar", v)) => read_chars = v.trim().parse().ok(),
            Some(("wchar", v)) => write_chars = v.trim().parse().ok(),
            _ => {}
        }
    }
    Some(IoCounters {
        read_chars: read_chars?,
        write_chars: write_chars?,
    })
}

type Job<S> = Box<dyn FnOnce(&S) + Send>;

#[derive(Debug, Default)]
struct WorkerState {
    /// Id of the job on the worker right now
    running: Option<u64>,
    /// The running job outlived its caller's deadline
    stalled: bool,
}

/// Wraps a source so that no single read can block its caller past a
/// deadline.
///
/// Reads run on one long-lived worker thread. A read that misses its
/// deadline is abandoned there; until it returns, further reads fail fast
/// with [`WatchError::Timeout`] instead of queueing behind it, so a hung
/// `/proc` costs at most one blocked thread.
pub struct DeadlineSource<S> {
    inner: Arc<S>,
    timeout: Duration,
    jobs: Mutex<Option<mpsc::Sender<(u64, Job<S>)>>>,
    worker: Arc<Mutex<WorkerState>>,
    next_id: AtomicU64,
}

impl<S: SnapshotSource + 'static> DeadlineSource<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
            jobs: Mutex::new(None),
            worker: Arc::new(Mutex::new(WorkerState::default())),
            next_id: AtomicU64::new(0),
        }
    }

    fn timeout_error(&self, what: &str) -> WatchError {
        WatchError::Timeout {
            what: what.to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn spawn_worker(&self) -> Result<mpsc::Sender<(u64, Job<S>)>> {
        let (tx, queue) = mpsc::channel::<(u64, Job<S>)>();
        let inner = Arc::clone(&self.inner);
        let worker = Arc::clone(&self.worker);
        std::thread::Builder::new()
            .name("snapshot-read".to_string())
            .spawn(move || {
                for (id, job) in queue {
                    worker.lock().running = Some(id);
                    job(&inner);
                    let mut state = worker.lock();
                    state.running = None;
                    state.stalled = false;
                }
            })?;
        Ok(tx)
    }

    fn submit(&self, id: u64, job: Job<S>) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let tx = match jobs.take() {
            Some(tx) => tx,
            None => self.spawn_worker()?,
        };
        let sent = tx.send((id, job));
        *jobs = Some(tx);
        sent.map_err(|_| WatchError::Io(io::Error::other("snapshot reader thread is gone")))
    }

    fn run<T, F>(&self, what: &str, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        if self.worker.lock().stalled {
            log::debug!("{} read skipped, an earlier read is still stuck", what);
            return Err(self.timeout_error(what));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.timeout;
        let (tx, rx) = mpsc::channel();
        self.submit(
            id,
            Box::new(move |inner: &S| {
                // queued past the deadline: the caller is gone
                if Instant::now() >= deadline {
                    return;
                }
                let _ = tx.send(read(inner));
            }),
        )?;

        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let mut worker = self.worker.lock();
                if worker.running == Some(id) {
                    worker.stalled = true;
                }
                log::warn!("{} read exceeded {:?}, abandoning it", what, self.timeout);
                Err(self.timeout_error(what))
            }
            Err(RecvTimeoutError::Disconnected) if Instant::now() >= deadline => {
                Err(self.timeout_error(what))
            }
            Err(RecvTimeoutError::Disconnected) => Err(WatchError::Io(io::Error::other(format!(
                "{} reader exited without a result",
                what
            )))),
        }
    }
}

impl<S: SnapshotSource + 'static> SnapshotSource for DeadlineSource<S> {
    fn cpu_times(&self) -> Result<CpuTimes> {
        self.run("cpu times", |s| s.cpu_times())
    }

    fn per_core_times(&self) -> Result<BTreeMap<String, CpuTimes>> {
        self.run("per-core cpu times", |s| s.per_core_times())
    }

    fn memory(&self) -> Result<MemInfo> {
        self.run("meminfo", |s| s.memory())
    }

    fn net_counters(&self) -> Result<NetCounters> {
        self.run("net/dev", |s| s.net_counters())
    }

    fn list_pids(&self) -> Result<Vec<u32>> {
        self.run("pid list", |s| s.list_pids())
    }

    fn process_stat(&self, pid: u32) -> Result<ProcessStat> {
        self.run("process stat", move |s| s.process_stat(pid))
    }

    fn process_io(&self, pid: u32) -> Result<IoCounters> {
        self.run("process io", move |s| s.process_io(pid))
    }

    fn cmdline(&self, pid: u32) -> Result<String> {
        self.run("cmdline", move |s| s.cmdline(pid))
    }

    fn exe_path(&self, pid: u32) -> Result<PathBuf> {
        self.run("exe link", move |s| s.exe_path(pid))
    }

    fn cwd(&self, pid: u32) -> Result<PathBuf> {
        self.run("cwd link", move |s| s.cwd(pid))
    }

    fn page_size(&self) -> u64 {
        self.inner.page_size()
    }
}
