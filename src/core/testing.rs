//! In-memory doubles shared by the core unit tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;

use super::rate::Clock;
use super::source::{
    CpuTimes, IoCounters, MemInfo, NetCounters, ProcessIdentity, ProcessStat, SnapshotSource,
};
use crate::error::{Result, WatchError};

type SleepHook = Box<dyn Fn() + Send + Sync>;

/// Clock that never blocks: `sleep` records the request and advances time.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
    on_sleep: Mutex<Option<SleepHook>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Run `hook` after every sleep, e.g. to move fake counters forward
    pub fn on_sleep<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        *self.on_sleep.lock() = Some(Box::new(hook));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        if let Some(hook) = self.on_sleep.lock().as_ref() {
            hook();
        }
    }
}

#[derive(Clone)]
pub struct FakeProcess {
    pub stat: ProcessStat,
    pub io: IoCounters,
    pub cmdline: String,
    pub exe: PathBuf,
    pub cwd: PathBuf,
    pub denied: bool,
}

#[derive(Default)]
struct FakeState {
    processes: BTreeMap<u32, FakeProcess>,
    cpu: CpuTimes,
    cores: BTreeMap<String, CpuTimes>,
    memory: MemInfo,
    net: NetCounters,
}

/// Scriptable snapshot source
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<FakeState>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_process(&self, pid: u32, name: &str, ppid: u32, pgid: u32) {
        let stat = ProcessStat {
            identity: ProcessIdentity {
                pid,
                command_name: name.to_string(),
                state_char: 'S',
                parent_pid: ppid,
                group_id: pgid,
            },
            utime: 0,
            stime: 0,
            cutime: 0,
            cstime: 0,
            rss_pages: 0,
        };
        self.state.lock().processes.insert(
            pid,
            FakeProcess {
                stat,
                io: IoCounters::default(),
                cmdline: String::new(),
                exe: PathBuf::from(format!("/usr/bin/{}", name)),
                cwd: PathBuf::from("/"),
                denied: false,
            },
        );
    }

    pub fn update<F: FnOnce(&mut FakeProcess)>(&self, pid: u32, f: F) {
        if let Some(process) = self.state.lock().processes.get_mut(&pid) {
            f(process);
        }
    }

    pub fn set_state(&self, pid: u32, state_char: char) {
        self.update(pid, |p| p.stat.identity.state_char = state_char);
    }

    pub fn remove_process(&self, pid: u32) {
        self.state.lock().processes.remove(&pid);
    }

    pub fn set_cpu(&self, cpu: CpuTimes) {
        self.state.lock().cpu = cpu;
    }

    pub fn set_core(&self, name: &str, cpu: CpuTimes) {
        self.state.lock().cores.insert(name.to_string(), cpu);
    }

    pub fn set_memory(&self, memory: MemInfo) {
        self.state.lock().memory = memory;
    }

    pub fn set_net(&self, net: NetCounters) {
        self.state.lock().net = net;
    }

    fn with_process<T>(&self, pid: u32, f: impl FnOnce(&FakeProcess) -> T) -> Result<T> {
        let state = self.state.lock();
        let process = state
            .processes
            .get(&pid)
            .ok_or_else(|| WatchError::no_such_process(pid))?;
        Ok(f(process))
    }

    fn guarded<T>(&self, pid: u32, f: impl FnOnce(&FakeProcess) -> T) -> Result<T> {
        self.with_process(pid, |p| {
            if p.denied {
                Err(WatchError::access_denied(pid))
            } else if p.stat.identity.is_zombie() {
                Err(p.stat.identity.zombie_error())
            } else {
                Ok(f(p))
            }
        })?
    }
}

/// CpuTimes whose work and total match the given values
pub fn cpu_times(total: u64, work: u64) -> CpuTimes {
    CpuTimes {
        user: work,
        idle: total - work,
        ..Default::default()
    }
}

impl SnapshotSource for FakeSource {
    fn cpu_times(&self) -> Result<CpuTimes> {
        Ok(self.state.lock().cpu)
    }

    fn per_core_times(&self) -> Result<BTreeMap<String, CpuTimes>> {
        Ok(self.state.lock().cores.clone())
    }

    fn memory(&self) -> Result<MemInfo> {
        Ok(self.state.lock().memory)
    }

    fn net_counters(&self) -> Result<NetCounters> {
        Ok(self.state.lock().net)
    }

    fn list_pids(&self) -> Result<Vec<u32>> {
        Ok(self.state.lock().processes.keys().copied().collect())
    }

    fn process_stat(&self, pid: u32) -> Result<ProcessStat> {
        self.with_process(pid, |p| p.stat.clone())
    }

    fn process_io(&self, pid: u32) -> Result<IoCounters> {
        self.guarded(pid, |p| p.io)
    }

    fn cmdline(&self, pid: u32) -> Result<String> {
        self.with_process(pid, |p| p.cmdline.clone())
    }

    fn exe_path(&self, pid: u32) -> Result<PathBuf> {
        self.guarded(pid, |p| p.exe.clone())
    }

    fn cwd(&self, pid: u32) -> Result<PathBuf> {
        self.guarded(pid, |p| p.cwd.clone())
    }

    fn page_size(&self) -> u64 {
        4096
    }
}
