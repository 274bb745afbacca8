//! Tokio runtime that samples watched processes on a fixed period.
//!
//! One task per watched pid plus one for the system-wide rates. Each task
//! does its blocking reads through `spawn_blocking` and sends the result to
//! an orchestrator, which folds them into a [`WatchSnapshot`] published on a
//! `watch` channel. A `broadcast` channel carries shutdown.
//!
//! Ctrl-C is registered once when the session starts and latched into its
//! own `watch` channel, so an interrupt that lands while the foreground loop
//! is busy printing is still seen by the next [`WatchRuntime::next_event`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::collector::MetricsCollector;
use super::metrics::{ProcessMetrics, SystemMetrics};
use crate::error::WatchError;

/// What to sample and how often
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub pids: Vec<u32>,
    pub period: Duration,
    pub include_system: bool,
}

/// Latest known state of one watched process
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ProcessStatus {
    /// First samples are still settling
    Warming,
    Alive(ProcessMetrics),
    Zombie(String),
    Denied(String),
    Gone,
    Error(String),
}

impl ProcessStatus {
    fn from_sample(pid: u32, sample: crate::Result<ProcessMetrics>) -> Self {
        match sample {
            Ok(metrics) => ProcessStatus::Alive(metrics),
            Err(e) if e.is_no_such_process() => ProcessStatus::Gone,
            Err(e) if e.is_zombie() => ProcessStatus::Zombie(e.to_string()),
            Err(e) if e.is_access_denied() => ProcessStatus::Denied(e.to_string()),
            Err(WatchError::InsufficientInterval { .. } | WatchError::CounterReset { .. }) => {
                ProcessStatus::Warming
            }
            Err(e) => {
                log::warn!("sampling pid {} failed: {}", pid, e);
                ProcessStatus::Error(e.to_string())
            }
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ProcessStatus::Gone)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Number of updates merged so far
    pub updates: u64,
    pub system: Option<SystemMetrics>,
    pub processes: BTreeMap<u32, ProcessStatus>,
}

impl WatchSnapshot {
    fn new(pids: &[u32]) -> Self {
        Self {
            timestamp: Utc::now(),
            updates: 0,
            system: None,
            processes: pids.iter().map(|&pid| (pid, ProcessStatus::Warming)).collect(),
        }
    }

    /// True once every watched pid has exited
    pub fn all_gone(&self) -> bool {
        !self.processes.is_empty() && self.processes.values().all(ProcessStatus::is_final)
    }
}

/// Partial updates sent from sampling tasks to the orchestrator
#[derive(Debug)]
enum WatchUpdate {
    System(SystemMetrics),
    Process { pid: u32, status: ProcessStatus },
}

/// What the foreground loop should react to
#[derive(Debug)]
pub enum WatchEvent {
    Snapshot(Arc<WatchSnapshot>),
    Interrupted,
    Closed,
}

/// Owns the runtime and the channel endpoints of one watch session
pub struct WatchRuntime {
    snapshot_rx: watch::Receiver<Arc<WatchSnapshot>>,
    interrupt_tx: watch::Sender<bool>,
    interrupt_rx: watch::Receiver<bool>,
    shutdown_tx: broadcast::Sender<()>,
    runtime: tokio::runtime::Runtime,
}

impl WatchRuntime {
    pub fn start(collector: Arc<MetricsCollector>, options: WatchOptions) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("watch-worker")
            .build()?;

        let (snapshot_tx, snapshot_rx) =
            watch::channel(Arc::new(WatchSnapshot::new(&options.pids)));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (update_tx, update_rx) = mpsc::channel::<WatchUpdate>(32);
        let (interrupt_tx, interrupt_rx) = watch::channel(false);
        listen_for_interrupts(&runtime, interrupt_tx.clone(), shutdown_tx.subscribe())?;

        let initial = WatchSnapshot::new(&options.pids);
        runtime.spawn(orchestrator_task(
            initial,
            update_rx,
            snapshot_tx,
            shutdown_tx.subscribe(),
        ));

        if options.include_system {
            runtime.spawn(system_task(
                Arc::clone(&collector),
                options.period,
                update_tx.clone(),
                shutdown_tx.subscribe(),
            ));
        }
        for &pid in &options.pids {
            runtime.spawn(process_task(
                pid,
                Arc::clone(&collector),
                options.period,
                update_tx.clone(),
                shutdown_tx.subscribe(),
            ));
        }
        log::debug!(
            "watch runtime started for {} pids every {:?}",
            options.pids.len(),
            options.period
        );

        Ok(Self {
            snapshot_rx,
            interrupt_tx,
            interrupt_rx,
            shutdown_tx,
            runtime,
        })
    }

    /// Block until a new snapshot is published or the session is
    /// interrupted. An interrupt that arrived since the last call is
    /// reported first.
    pub fn next_event(&mut self) -> WatchEvent {
        let rx = &mut self.snapshot_rx;
        let interrupted = &mut self.interrupt_rx;
        self.runtime.block_on(async move {
            if *interrupted.borrow_and_update() {
                return WatchEvent::Interrupted;
            }
            tokio::select! {
                changed = rx.changed() => match changed {
                    Ok(()) => WatchEvent::Snapshot(Arc::clone(&rx.borrow_and_update())),
                    Err(_) => WatchEvent::Closed,
                },
                Ok(()) = interrupted.changed() => WatchEvent::Interrupted,
            }
        })
    }

    /// Ask the foreground loop to stop, as Ctrl-C does
    pub fn interrupt(&self) {
        self.interrupt_tx.send_replace(true);
    }

    /// Like `next_event`, without the Ctrl-C handler; `None` on timeout.
    pub fn wait_for_snapshot(&mut self, timeout: Duration) -> Option<Arc<WatchSnapshot>> {
        let rx = &mut self.snapshot_rx;
        self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, rx.changed()).await {
                Ok(Ok(())) => Some(Arc::clone(&rx.borrow_and_update())),
                _ => None,
            }
        })
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        // blocking samplers may be mid-sleep; don't wait for them
        self.runtime.shutdown_background();
    }
}

/// Install the SIGINT handler now, before `start` returns, and latch every
/// delivery into `interrupt_tx` until shutdown.
#[cfg(unix)]
fn listen_for_interrupts(
    runtime: &tokio::runtime::Runtime,
    interrupt_tx: watch::Sender<bool>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = {
        let _guard = runtime.enter();
        signal(SignalKind::interrupt())?
    };
    runtime.spawn(async move {
        loop {
            tokio::select! {
                Some(()) = sigint.recv() => {
                    log::debug!("interrupt received");
                    interrupt_tx.send_replace(true);
                }
                _ = shutdown.recv() => break,
                else => break,
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn listen_for_interrupts(
    runtime: &tokio::runtime::Runtime,
    interrupt_tx: watch::Sender<bool>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    runtime.spawn(async move {
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        interrupt_tx.send_replace(true);
                    }
                    Err(e) => {
                        log::warn!("cannot listen for Ctrl-C: {}", e);
                        break;
                    }
                },
                _ = shutdown.recv() => break,
            }
        }
    });
    Ok(())
}

async fn orchestrator_task(
    mut snapshot: WatchSnapshot,
    mut update_rx: mpsc::Receiver<WatchUpdate>,
    snapshot_tx: watch::Sender<Arc<WatchSnapshot>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            Some(update) = update_rx.recv() => {
                match update {
                    WatchUpdate::System(system) => snapshot.system = Some(system),
                    WatchUpdate::Process { pid, status } => {
                        snapshot.processes.insert(pid, status);
                    }
                }
                snapshot.timestamp = Utc::now();
                snapshot.updates += 1;

                // only fails once every receiver is gone
                if snapshot_tx.send(Arc::new(snapshot.clone())).is_err() {
                    break;
                }
            }
            _ = shutdown.recv() => break,
            else => break,
        }
    }
}

async fn system_task(
    collector: Arc<MetricsCollector>,
    period: Duration,
    update_tx: mpsc::Sender<WatchUpdate>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let collector = Arc::clone(&collector);
                let sample = tokio::task::spawn_blocking(move || collector.system_metrics()).await;
                match sample {
                    Ok(Ok(system)) => {
                        if update_tx.send(WatchUpdate::System(system)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => log::debug!("system sample skipped: {}", e),
                    Err(e) => {
                        log::error!("system sampler panicked: {}", e);
                        break;
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Samples one pid until it exits. The pid's tracker state is dropped on
/// exit so a reused pid starts over.
async fn process_task(
    pid: u32,
    collector: Arc<MetricsCollector>,
    period: Duration,
    update_tx: mpsc::Sender<WatchUpdate>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sampler = Arc::clone(&collector);
                let sample = tokio::task::spawn_blocking(move || sampler.process_metrics(pid)).await;
                let status = match sample {
                    Ok(sample) => ProcessStatus::from_sample(pid, sample),
                    Err(e) => ProcessStatus::Error(format!("sampler panicked: {}", e)),
                };
                let finished = status.is_final();
                if finished {
                    log::info!("pid {} exited", pid);
                    collector.forget_process(pid);
                }

                if update_tx.send(WatchUpdate::Process { pid, status }).await.is_err() || finished {
                    break;
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
