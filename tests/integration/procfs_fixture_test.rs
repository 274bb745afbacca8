// Snapshot source, directory and collector over a fake /proc tree

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use watchdogs::core::rate::{CounterReading, Metric, SampleKey, TrackedEntity};
use watchdogs::core::{
    DeadlineSource, MetricsCollector, NamePreference, ProcFs, ProcessDirectory, RateKind,
    RateTracker, SearchMode, SnapshotSource,
};

const PAGE_SIZE: u64 = 4096;

/// Minimal procfs layout: system files plus one directory per pid
struct FakeProc {
    dir: TempDir,
}

impl FakeProc {
    fn new() -> Self {
        let fake = Self {
            dir: TempDir::new().unwrap(),
        };
        fake.write("stat", &stat_file(1000, 400));
        fake.write(
            "meminfo",
            "MemTotal:        1000000 kB\nMemFree:          200000 kB\nMemAvailable:     400000 kB\n",
        );
        fake.net(1_000_000, 500_000);
        fake
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, content: &str) {
        let path = self.root().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn net(&self, recv: u64, send: u64) {
        self.write(
            "net/dev",
            &format!(
                "Inter-|   Receive |  Transmit\n face |bytes packets|bytes packets\n    \
                 lo: 999 1 0 0 0 0 0 0 999 1 0 0 0 0 0 0\n  \
                 eth0: {} 10 0 0 0 0 0 0 {} 10 0 0 0 0 0 0\n",
                recv, send
            ),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn process(&self, pid: u32, comm: &str, state: char, ppid: u32, pgid: u32, ticks: u64, cmdline: &str) {
        self.write(
            &format!("{}/stat", pid),
            &format!(
                "{} ({}) {} {} {} {} 0 -1 4194560 0 0 0 0 {} 0 0 0 20 0 1 0 100 1000000 256 0",
                pid, comm, state, ppid, pgid, pgid, ticks
            ),
        );
        self.write(&format!("{}/cmdline", pid), &cmdline.replace(' ', "\0"));
        self.write(&format!("{}/io", pid), "rchar: 0\nwchar: 0\n");
    }

    fn procfs(&self) -> ProcFs {
        ProcFs::with_root(self.root()).with_page_size(PAGE_SIZE)
    }
}

fn stat_file(total: u64, work: u64) -> String {
    // user=work, idle=rest
    format!(
        "cpu  {} 0 0 {} 0 0 0 0 0 0\ncpu0 {} 0 0 {} 0 0 0 0 0 0\n",
        work,
        total - work,
        work,
        total - work
    )
}

fn sample_tree() -> FakeProc {
    let fake = FakeProc::new();
    fake.process(1, "systemd", 'S', 0, 1, 0, "/sbin/init splash");
    fake.process(300, "python3", 'S', 1, 300, 50, "python3 collector.py");
    fake.process(301, "python3", 'S', 300, 300, 10, "python3 collector.py --worker");
    fake.process(302, "kworker/0:1", 'I', 2, 0, 0, "");
    fake.process(303, "defunct", 'Z', 300, 300, 5, "");
    fake
}

#[test]
fn test_directory_over_procfs() {
    let fake = sample_tree();
    let directory = ProcessDirectory::new(Arc::new(fake.procfs()));

    assert_eq!(directory.list_pids().unwrap(), vec![1, 300, 301, 302, 303]);
    assert_eq!(directory.children_of(300).unwrap(), vec![301, 303]);
    assert_eq!(directory.group_peers_of(301).unwrap(), vec![300, 301, 303]);

    let names = directory.all_names(NamePreference::Cmdline).unwrap();
    assert_eq!(names[&300], "python3 collector.py");
    assert_eq!(names[&302], "kworker/0:1");

    let found = directory
        .search("collector", SearchMode::Contains, NamePreference::Cmdline)
        .unwrap();
    assert_eq!(found.len(), 2);
    let exact = directory
        .search("python3 collector.py", SearchMode::Exact, NamePreference::Cmdline)
        .unwrap();
    assert_eq!(exact, vec![(300, "python3 collector.py".to_string())]);
}

#[test]
fn test_junk_entries_are_ignored() {
    let fake = sample_tree();
    fake.write("self/stat", "junk");
    fake.write("sys/kernel/ostype", "Linux");
    // a pid directory whose stat is cut short while the process exits
    fake.write("404/stat", "404 (dying) Z");

    let directory = ProcessDirectory::new(Arc::new(fake.procfs()));
    let pids: Vec<u32> = directory.identities().unwrap().iter().map(|i| i.pid).collect();
    assert_eq!(pids, vec![1, 300, 301, 302, 303]);
    assert!(directory.identity(404).unwrap_err().is_no_such_process());
}

#[test]
fn test_zombie_exe_path() {
    let fake = sample_tree();
    let procfs = fake.procfs();

    let err = procfs.exe_path(303).unwrap_err();
    assert!(err.is_zombie());
    assert!(err.to_string().contains("ppid=300"));

    // a live process without a readable exe link
    let err = procfs.exe_path(301).unwrap_err();
    assert!(err.is_no_such_process() || err.is_access_denied());
}

#[test]
fn test_process_cpu_with_two_phase_sampling() {
    let fake = sample_tree();
    let source: Arc<dyn SnapshotSource> = Arc::new(fake.procfs());
    let collector = MetricsCollector::new(Arc::clone(&source), RateTracker::new(Duration::from_millis(10)));
    let key = SampleKey::new(Metric::Cpu, TrackedEntity::Process(300));
    let read = || -> watchdogs::Result<CounterReading> {
        Ok(CounterReading::ratio(
            source.cpu_times()?.total(),
            source.process_cpu_ticks(300)?,
        ))
    };

    collector.tracker().begin_sample(&key, read).unwrap();
    fake.write("stat", &stat_file(1400, 500));
    fake.process(300, "python3", 'R', 1, 300, 150, "python3 collector.py");

    let rates = collector
        .tracker()
        .finish_sample(&key, RateKind::PERCENT, read)
        .unwrap();
    assert!((rates[0] - 25.0).abs() < 1e-9);

    // the blocking API continues from the stored snapshot
    fake.write("stat", &stat_file(1500, 500));
    fake.process(300, "python3", 'R', 1, 300, 160, "python3 collector.py");
    let percent = collector.process_cpu_percent(300).unwrap();
    assert!((percent - 10.0).abs() < 1e-9);
}

#[test]
fn test_memory_figures() {
    let fake = sample_tree();
    let collector = MetricsCollector::new(Arc::new(fake.procfs()), RateTracker::new(Duration::from_millis(10)));

    assert!((collector.mem_percent().unwrap() - 60.0).abs() < 1e-9);
    assert_eq!(collector.process_rss_bytes(300).unwrap(), 256 * PAGE_SIZE);
    let share = collector.process_mem_percent(300).unwrap();
    assert!((share - 256.0 * 4096.0 * 100.0 / 1_024_000_000.0).abs() < 1e-9);
}

#[test]
fn test_network_bootstrap_on_real_clock() {
    let fake = sample_tree();
    let collector = MetricsCollector::new(Arc::new(fake.procfs()), RateTracker::new(Duration::from_millis(20)));

    // counters frozen across the settling wait: zero throughput
    let idle = collector.net_speed().unwrap();
    assert_eq!(idle.download_kib_per_sec, 0.0);

    std::thread::sleep(Duration::from_millis(50));
    fake.net(3_000_000, 900_000);
    let speed = collector.net_speed().unwrap();
    assert!(speed.download_kib_per_sec > 0.0);
    assert!(speed.upload_kib_per_sec > 0.0);
    assert!(speed.download_kib_per_sec > speed.upload_kib_per_sec);
}

#[test]
fn test_deadline_source_passes_through() {
    let fake = sample_tree();
    let source = DeadlineSource::new(fake.procfs(), Duration::from_secs(5));
    assert_eq!(source.identity(301).unwrap().parent_pid, 300);
    assert_eq!(source.cmdline(301).unwrap(), "python3 collector.py --worker");
    assert!(source.identity(999).unwrap_err().is_no_such_process());
}
