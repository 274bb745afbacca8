//! Cascading termination and restart of monitored processes.
//!
//! A kill request moves through four steps: collect the target with its
//! children and (optionally) group peers, filter out the supervisor itself,
//! signal the rest in descending pid order, and report. Per-pid failures
//! during signaling are recorded, never fatal.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Result, WatchError};
use crate::platform::{self, Signal};

use super::directory::ProcessDirectory;
use super::launcher::{DetachedSpawner, Launcher, Spawner};
use super::source::SnapshotSource;

/// Delivers termination signals
pub trait Signaller: Send + Sync {
    /// Errors keep the raw errno so ESRCH and EPERM can be told apart.
    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;
}

/// Signals through `kill(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct LibcSignaller;

impl Signaller for LibcSignaller {
    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        platform::send_signal(pid, signal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillOptions {
    /// Include direct children of the target
    pub children: bool,
    /// Include the target's process group, unless it is our own group
    pub group: bool,
    pub signal: Signal,
}

impl Default for KillOptions {
    fn default() -> Self {
        Self {
            children: true,
            group: true,
            signal: Signal::Kill,
        }
    }
}

/// What happened to one pid of the closure
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PidOutcome {
    Signaled,
    AlreadyGone,
    #[serde(serialize_with = "as_display")]
    Zombie(WatchError),
    #[serde(serialize_with = "as_display")]
    AccessDenied(WatchError),
    #[serde(serialize_with = "as_display")]
    Failed(WatchError),
}

fn as_display<S: serde::Serializer>(err: &WatchError, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}

#[derive(Debug, Serialize)]
pub struct KillReport {
    pub target: u32,
    pub signal: Signal,
    /// Pids in the order they were processed
    pub closure: Vec<u32>,
    pub outcomes: Vec<(u32, PidOutcome)>,
    pub success: bool,
}

impl KillReport {
    pub fn signaled(&self) -> Vec<u32> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, PidOutcome::Signaled))
            .map(|(pid, _)| *pid)
            .collect()
    }

    pub fn outcome(&self, pid: u32) -> Option<&PidOutcome> {
        self.outcomes
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, outcome)| outcome)
    }
}

#[derive(Debug, Serialize)]
pub struct RestartReport {
    pub kill: KillReport,
    pub new_pid: u32,
}

pub struct Supervisor {
    directory: ProcessDirectory,
    launcher: Launcher,
    signaller: Arc<dyn Signaller>,
    spawner: Arc<dyn Spawner>,
    restart_signal: Signal,
    self_pid: u32,
    self_pgid: u32,
}

impl Supervisor {
    pub fn new(source: Arc<dyn SnapshotSource>, launcher: Launcher) -> Self {
        Self {
            directory: ProcessDirectory::new(source),
            launcher,
            signaller: Arc::new(LibcSignaller),
            spawner: Arc::new(DetachedSpawner),
            restart_signal: Signal::Kill,
            self_pid: platform::current_pid(),
            self_pgid: platform::current_pgid(),
        }
    }

    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.signaller = signaller;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Signal used by `restart` to take down the old process tree
    pub fn with_restart_signal(mut self, signal: Signal) -> Self {
        self.restart_signal = signal;
        self
    }

    /// Pretend to be a different process (for tests and embedding).
    pub fn with_identity(mut self, pid: u32, pgid: u32) -> Self {
        self.self_pid = pid;
        self.self_pgid = pgid;
        self
    }

    pub fn directory(&self) -> &ProcessDirectory {
        &self.directory
    }

    /// Pids a kill of `target` would signal, in signaling order (descending).
    ///
    /// Fails only if `target` itself cannot be resolved.
    pub fn kill_closure(&self, target: u32, options: &KillOptions) -> Result<Vec<u32>> {
        let identity = self.directory.identity(target)?;
        let index = self.directory.index()?;

        let mut closure = BTreeSet::from([target]);
        if options.children {
            closure.extend(index.children_of(target).iter().filter(|&&pid| pid != target));
        }
        if options.group {
            if identity.group_id != self.self_pgid {
                closure.extend(index.group_members(identity.group_id));
            } else {
                log::debug!(
                    "pid {} shares our process group {}, not killing its peers",
                    target,
                    identity.group_id
                );
            }
        }

        // never ourselves, whatever the rules above collected
        if closure.remove(&self.self_pid) {
            log::warn!("excluded own pid {} from kill closure of {}", self.self_pid, target);
        }

        Ok(closure.into_iter().rev().collect())
    }

    /// Terminate `target` and its closure.
    ///
    /// Returns an error only if `target` could not be resolved; vanished,
    /// zombie and protected pids are recorded in the report.
    pub fn kill(&self, target: u32, options: &KillOptions) -> Result<KillReport> {
        let closure = self.kill_closure(target, options)?;
        log::info!(
            "killing pid {} with {} ({} processes: {:?})",
            target,
            options.signal,
            closure.len(),
            closure
        );

        let outcomes = closure
            .iter()
            .map(|&pid| (pid, self.terminate_one(pid, options.signal)))
            .collect();

        Ok(KillReport {
            target,
            signal: options.signal,
            closure,
            outcomes,
            success: true,
        })
    }

    /// Re-check `pid` and signal it if it is still a live process.
    fn terminate_one(&self, pid: u32, signal: Signal) -> PidOutcome {
        match self.directory.identity(pid) {
            Ok(identity) if identity.is_zombie() => {
                log::debug!("pid {} is a zombie, not signaling", pid);
                return PidOutcome::Zombie(identity.zombie_error());
            }
            Ok(_) => {}
            Err(e) if e.is_no_such_process() => return PidOutcome::AlreadyGone,
            Err(e) if e.is_zombie() => return PidOutcome::Zombie(e),
            // the signal itself decides; an unreadable stat is not proof of anything
            Err(e) => log::debug!("could not re-check pid {}: {}", pid, e),
        }

        match self.signaller.signal(pid, signal) {
            Ok(()) => PidOutcome::Signaled,
            Err(e) => match WatchError::from_pid_io(pid, e) {
                err if err.is_no_such_process() => PidOutcome::AlreadyGone,
                err if err.is_access_denied() => {
                    log::warn!("cannot signal pid {}: {}", pid, err);
                    PidOutcome::AccessDenied(err)
                }
                err => {
                    log::warn!("signaling pid {} failed: {}", pid, err);
                    PidOutcome::Failed(err)
                }
            },
        }
    }

    /// Start `path` detached from us
    pub fn start(&self, path: &Path) -> Result<u32> {
        let plan = self.launcher.plan(path)?;
        self.spawner.spawn(&plan)
    }

    /// Kill `pid` with its children and group, then start `path` in its place.
    ///
    /// `path` is validated first, so an unsupported script leaves the old
    /// process running.
    pub fn restart(&self, pid: u32, path: &Path) -> Result<RestartReport> {
        let plan = self.launcher.plan(path)?;
        let options = KillOptions {
            signal: self.restart_signal,
            ..KillOptions::default()
        };
        let kill = self.kill(pid, &options)?;
        let new_pid = self.spawner.spawn(&plan)?;
        Ok(RestartReport { kill, new_pid })
    }
}
