// Core business logic module

pub mod collector;
pub mod config;
pub mod directory;
pub mod launcher;
pub mod metrics;
pub mod process_tree;
pub mod rate;
pub mod source;
pub mod supervisor;
pub mod system_info;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used items
pub use collector::MetricsCollector;
pub use config::Config;
pub use directory::{NamePreference, ProcessDirectory, SearchMode};
pub use launcher::{DetachedSpawner, LaunchPlan, Launcher, ScriptKind, Spawner};
pub use metrics::{IoRate, MemoryMetrics, NetSpeed, ProcessMetrics, SystemMetrics};
pub use process_tree::ProcessIndex;
pub use rate::{Clock, Metric, RateKind, RateTracker, SampleKey, SystemClock, TrackedEntity};
pub use source::{DeadlineSource, ProcFs, ProcessIdentity, SnapshotSource};
pub use supervisor::{KillOptions, KillReport, LibcSignaller, PidOutcome, Signaller, Supervisor};
pub use watch::{WatchEvent, WatchOptions, WatchRuntime, WatchSnapshot};
