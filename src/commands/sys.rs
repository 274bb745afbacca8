use anyhow::{Context, Result};
use clap::ArgMatches;

use super::{collector, print_json, snapshot_source};
use crate::core::{system_info, Config};
use crate::ui::system_formatters;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;

    match matches.subcommand() {
        Some(("info", sub_matches)) => {
            let info = system_info::collect();
            if sub_matches.get_flag("json") {
                return print_json(&info);
            }
            system_formatters::print_host_info(&info);
            Ok(())
        }
        Some((metric, sub_matches)) => execute_rate(&config, metric, sub_matches.get_flag("json")),
        None => {
            println!("Use 'wd sys --help' for more information.");
            Ok(())
        }
    }
}

/// The rate subcommands take one settling interval on first use.
fn execute_rate(config: &Config, metric: &str, json: bool) -> Result<()> {
    let collector = collector(config, snapshot_source(config));

    match metric {
        "cpu" => {
            let percent = collector.cpu_percent().context("Failed to sample CPU usage")?;
            if json {
                return print_json(&serde_json::json!({ "cpu_percent": percent }));
            }
            system_formatters::print_cpu(percent);
        }
        "cores" => {
            let cores = collector
                .core_percents()
                .context("Failed to sample per-core CPU usage")?;
            if json {
                return print_json(&cores);
            }
            system_formatters::print_cores(&cores);
        }
        "mem" => {
            let memory = collector.memory().context("Failed to read memory totals")?;
            if json {
                return print_json(&memory);
            }
            system_formatters::print_memory(&memory);
        }
        "net" => {
            let speed = collector.net_speed().context("Failed to sample network counters")?;
            if json {
                return print_json(&speed);
            }
            system_formatters::print_network(&speed);
        }
        "all" => {
            let metrics = collector
                .system_metrics()
                .context("Failed to sample system metrics")?;
            if json {
                return print_json(&metrics);
            }
            system_formatters::print_system_metrics(&metrics);
        }
        other => anyhow::bail!("Unknown sys subcommand '{}'", other),
    }
    Ok(())
}
