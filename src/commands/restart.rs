use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::*;

use super::{pid_arg, print_json, snapshot_source, supervisor};
use crate::core::Config;
use crate::ui::system_formatters;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let pid = pid_arg(matches, "pid")?;
    let path = path_arg(matches)?;

    let report = supervisor(&config, snapshot_source(&config))
        .restart(pid, &path)
        .with_context(|| format!("Failed to restart pid {} as {}", pid, path.display()))?;

    if matches.get_flag("json") {
        return print_json(&report);
    }
    system_formatters::print_restart_report(&report);
    Ok(())
}

/// `wd start <path>`: launch without killing anything
pub fn execute_start(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let path = path_arg(matches)?;

    let pid = supervisor(&config, snapshot_source(&config))
        .start(&path)
        .with_context(|| format!("Failed to start {}", path.display()))?;

    println!(
        "{} started {} with pid {}",
        "✓".green(),
        path.display(),
        pid.to_string().bold()
    );
    Ok(())
}

fn path_arg(matches: &ArgMatches) -> Result<PathBuf> {
    matches
        .get_one::<PathBuf>("path")
        .cloned()
        .context("Path argument is required")
}
