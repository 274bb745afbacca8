use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::Serialize;

use super::{collector, directory, pid_arg, print_json, snapshot_source};
use crate::core::process_tree::flatten_tree;
use crate::core::system_info::{self, DiskInfo};
use crate::core::{Config, ProcessMetrics, SearchMode};
use crate::ui::system_formatters;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;

    match matches.subcommand() {
        Some(("list", sub_matches)) => list(&config, sub_matches),
        Some(("search", sub_matches)) => search(&config, sub_matches),
        Some(("tree", _)) => tree(&config),
        Some(("show", sub_matches)) => show(&config, sub_matches),
        _ => {
            println!("Use 'wd ps --help' for more information.");
            Ok(())
        }
    }
}

fn list(config: &Config, matches: &ArgMatches) -> Result<()> {
    let directory = directory(snapshot_source(config));
    let index = directory.index().context("Failed to scan processes")?;
    let names = directory
        .all_names(config.name_preference)
        .context("Failed to resolve process names")?;

    if matches.get_flag("json") {
        return print_json(&names);
    }
    system_formatters::print_process_table(&index, &names);
    Ok(())
}

fn search(config: &Config, matches: &ArgMatches) -> Result<()> {
    let keyword = matches
        .get_one::<String>("keyword")
        .context("Keyword argument is required")?;
    let mode = if matches.get_flag("exact") {
        SearchMode::Exact
    } else {
        SearchMode::Contains
    };

    let results = directory(snapshot_source(config))
        .search(keyword, mode, config.name_preference)
        .context("Failed to search processes")?;

    if matches.get_flag("json") {
        return print_json(&results);
    }
    system_formatters::print_search_results(keyword, &results);
    Ok(())
}

fn tree(config: &Config) -> Result<()> {
    let tree = directory(snapshot_source(config))
        .tree()
        .context("Failed to build process tree")?;
    system_formatters::print_tree(&flatten_tree(&tree));
    Ok(())
}

#[derive(Serialize)]
struct ProcessDetail {
    #[serde(flatten)]
    metrics: ProcessMetrics,
    display_name: String,
    exe: Option<String>,
    cwd: Option<String>,
    /// Filesystem holding the working directory
    disk: Option<DiskInfo>,
    children: Vec<u32>,
    group_members: Vec<u32>,
}

fn show(config: &Config, matches: &ArgMatches) -> Result<()> {
    let pid = pid_arg(matches, "pid")?;
    let source = snapshot_source(config);
    let directory = directory(source.clone());
    let collector = collector(config, source);

    let metrics = collector
        .process_metrics(pid)
        .with_context(|| format!("Failed to sample pid {}", pid))?;
    let display_name = directory
        .resolve_name(pid, config.name_preference)
        .unwrap_or_else(|_| metrics.name.clone());

    // zombies and other users' processes hide these; show what we can
    let exe = directory.exe_path(pid).ok();
    let cwd = directory.cwd(pid).ok();
    let disk = cwd
        .as_deref()
        .and_then(|cwd| system_info::disk_for(&system_info::disks(), cwd).cloned());
    let index = directory.index().context("Failed to scan processes")?;
    let children = index.children_of(pid).to_vec();
    let group_members = index.group_members(metrics.group_id).to_vec();

    if matches.get_flag("json") {
        return print_json(&ProcessDetail {
            metrics,
            display_name,
            exe: exe.map(|p| p.display().to_string()),
            cwd: cwd.map(|p| p.display().to_string()),
            disk,
            children,
            group_members,
        });
    }

    system_formatters::print_process_detail(
        &metrics,
        &display_name,
        exe.as_deref(),
        cwd.as_deref(),
        disk.as_ref(),
        &children,
        &group_members,
    );
    Ok(())
}
