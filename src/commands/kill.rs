use anyhow::{Context, Result};
use clap::ArgMatches;

use super::{pid_arg, print_json, snapshot_source, supervisor};
use crate::core::{Config, KillOptions};
use crate::platform::{self, Signal};
use crate::ui::system_formatters;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let pid = pid_arg(matches, "pid")?;

    let signal = match matches.get_one::<String>("signal") {
        Some(value) => Signal::parse(value)
            .with_context(|| format!("Unknown signal '{}' (use term or kill)", value))?,
        None => config.kill_signal,
    };
    let options = KillOptions {
        children: !matches.get_flag("no-children"),
        group: !matches.get_flag("no-group"),
        signal,
    };

    if !platform::is_elevated() {
        log::debug!("not running as root; other users' processes will be denied");
    }

    let supervisor = supervisor(&config, snapshot_source(&config));
    if matches.get_flag("dry-run") {
        let closure = supervisor
            .kill_closure(pid, &options)
            .with_context(|| format!("Cannot resolve pid {}", pid))?;
        println!("Would signal (in order): {:?}", closure);
        return Ok(());
    }

    let report = supervisor
        .kill(pid, &options)
        .with_context(|| format!("Cannot kill pid {}", pid))?;

    if matches.get_flag("json") {
        return print_json(&report);
    }
    system_formatters::print_kill_report(&report);
    Ok(())
}
