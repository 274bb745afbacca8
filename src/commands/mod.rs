// Command handlers module
pub mod config;
pub mod kill;
pub mod ps;
pub mod restart;
pub mod sys;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ArgMatches;

use crate::core::{
    Config, DeadlineSource, MetricsCollector, ProcFs, ProcessDirectory, RateTracker,
    SnapshotSource, Supervisor,
};

/// `/proc` reader with the configured root and per-read deadline
pub fn snapshot_source(config: &Config) -> Arc<dyn SnapshotSource> {
    let procfs = ProcFs::with_root(config.proc_root.clone());
    Arc::new(DeadlineSource::new(procfs, config.source_timeout()))
}

pub fn collector(config: &Config, source: Arc<dyn SnapshotSource>) -> MetricsCollector {
    MetricsCollector::new(source, RateTracker::new(config.interval()))
}

pub fn directory(source: Arc<dyn SnapshotSource>) -> ProcessDirectory {
    ProcessDirectory::new(source)
}

pub fn supervisor(config: &Config, source: Arc<dyn SnapshotSource>) -> Supervisor {
    Supervisor::new(source, config.launcher()).with_restart_signal(config.kill_signal)
}

/// Required pid argument
pub(crate) fn pid_arg(matches: &ArgMatches, name: &str) -> Result<u32> {
    matches
        .get_one::<u32>(name)
        .copied()
        .with_context(|| format!("<{}> is required", name))
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
