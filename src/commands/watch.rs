use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::*;

use super::{collector, snapshot_source};
use crate::core::{Config, WatchEvent, WatchOptions, WatchRuntime};
use crate::ui::system_formatters;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;

    let pids: Vec<u32> = matches
        .get_many::<u32>("pids")
        .map(|values| values.copied().collect())
        .unwrap_or_default();
    let period = matches
        .get_one::<u64>("interval")
        .map(|secs| Duration::from_secs((*secs).max(1)))
        .unwrap_or_else(|| config.interval());
    let count = matches.get_one::<u64>("count").copied();
    let json = matches.get_flag("json");
    let include_system = pids.is_empty() || !matches.get_flag("no-system");

    let collector = Arc::new(collector(&config, snapshot_source(&config)));
    let mut runtime = WatchRuntime::start(
        collector,
        WatchOptions {
            pids,
            period,
            include_system,
        },
    )
    .context("Failed to start watch runtime")?;

    if !json {
        println!(
            "{}",
            format!("Sampling every {:?}, Ctrl-C to stop", period).dimmed()
        );
    }

    // one line group per tick; updates inside a tick are coalesced
    let mut printed = 0u64;
    let mut last_print: Option<chrono::DateTime<chrono::Utc>> = None;
    loop {
        let snapshot = match runtime.next_event() {
            WatchEvent::Snapshot(snapshot) => snapshot,
            WatchEvent::Interrupted | WatchEvent::Closed => break,
        };

        let due = last_print.map_or(true, |last| {
            (snapshot.timestamp - last).to_std().unwrap_or_default() >= period / 2
        });
        if !due && !snapshot.all_gone() {
            continue;
        }
        last_print = Some(snapshot.timestamp);

        if json {
            println!(
                "{}",
                serde_json::to_string(&*snapshot).context("Failed to serialize snapshot")?
            );
        } else {
            system_formatters::print_watch_snapshot(&snapshot);
        }

        printed += 1;
        if snapshot.all_gone() {
            log::info!("all watched processes exited");
            break;
        }
        if count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    runtime.shutdown();
    Ok(())
}
