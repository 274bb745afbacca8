use std::collections::BTreeMap;
use std::path::Path;

use colored::*;

use crate::core::config::Config;
use crate::core::metrics::{MemoryMetrics, NetSpeed, ProcessMetrics, SystemMetrics};
use crate::core::process_tree::{format_tree_indent, FlattenedProcess, ProcessIndex};
use crate::core::supervisor::{KillReport, PidOutcome, RestartReport};
use crate::core::system_info::{DiskInfo, HostInfo};
use crate::core::watch::{ProcessStatus, WatchSnapshot};

use super::formatters::*;

fn print_section_header(title: &str) {
    println!("\n{}", title.bold().green());
    println!("{}", "-".repeat(title.len()));
}

pub fn print_cpu(percent: f64) {
    println!("  CPU: {}", format_percent(percent));
}

pub fn print_cores(cores: &BTreeMap<String, f64>) {
    print_section_header("CPU cores");
    // cpu10 sorts before cpu2; order by core number instead
    let mut cores: Vec<(&String, &f64)> = cores.iter().collect();
    cores.sort_by_key(|(name, _)| {
        name.trim_start_matches("cpu")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    for (name, percent) in cores {
        println!("  {:<6} {}", name, format_percent(*percent));
    }
}

pub fn print_memory(memory: &MemoryMetrics) {
    print_section_header("Memory");
    println!("  Total: {}", format_kb(memory.total_kb));
    println!("  Available: {}", format_kb(memory.available_kb));
    println!("  Free: {}", format_kb(memory.free_kb));
    println!("  Used: {}", format_percent(memory.used_percent));
}

pub fn print_network(speed: &NetSpeed) {
    print_section_header("Network");
    println!("  Download: {}", format_kib_rate(speed.download_kib_per_sec).cyan());
    println!("  Upload: {}", format_kib_rate(speed.upload_kib_per_sec).cyan());
}

pub fn print_system_metrics(metrics: &SystemMetrics) {
    print_section_header("CPU");
    print_cpu(metrics.cpu_percent);
    if !metrics.per_core_percent.is_empty() {
        print_cores(&metrics.per_core_percent);
    }
    print_memory(&metrics.memory);
    print_network(&metrics.network);
}

pub fn print_host_info(info: &HostInfo) {
    println!("\n{}", "HOST INFORMATION".bold().bright_cyan());
    println!("{}", "=".repeat(80));

    print_section_header("System");
    println!("  Hostname: {}", info.hostname);
    println!("  OS: {} {}", info.os_name, info.os_version);
    if let Some(kernel) = &info.kernel_version {
        println!("  Kernel: {}", kernel);
    }
    println!("  Architecture: {}", info.architecture);
    println!("  Uptime: {}", format_uptime(info.uptime_secs));
    println!(
        "  Load average: {:.2} {:.2} {:.2}",
        info.load_average.one, info.load_average.five, info.load_average.fifteen
    );

    print_section_header("CPU");
    println!("  Model: {}", info.cpu_brand);
    match info.physical_cores {
        Some(physical) => println!(
            "  Cores: {} physical, {} logical",
            physical, info.logical_cores
        ),
        None => println!("  Cores: {} logical", info.logical_cores),
    }

    if !info.disks.is_empty() {
        print_disks(&info.disks);
    }
    println!();
}

pub fn print_disks(disks: &[DiskInfo]) {
    print_section_header("Storage");
    for disk in disks {
        println!(
            "  {:<24} {:<8} {:>10} free of {:>10} ({})",
            truncate(&disk.mount_point, 24),
            disk.file_system,
            format_size(disk.available_bytes),
            format_size(disk.total_bytes),
            format_percent(disk.usage_percent)
        );
    }
}

pub fn print_process_table(index: &ProcessIndex, names: &BTreeMap<u32, String>) {
    if index.is_empty() {
        println!("{}", "No processes found".yellow());
        return;
    }
    println!(
        "{}",
        format!("{:>7} {:>7} {:>7} {:<2} {}", "PID", "PPID", "PGID", "S", "NAME").bold()
    );
    for identity in index.identities() {
        let name = names
            .get(&identity.pid)
            .map(String::as_str)
            .unwrap_or(&identity.command_name);
        let line = format!(
            "{:>7} {:>7} {:>7} {:<2} {}",
            identity.pid, identity.parent_pid, identity.group_id, identity.state_char, name
        );
        if identity.is_zombie() {
            println!("{}", line.dimmed());
        } else {
            println!("{}", line);
        }
    }
    println!("\n{} processes", index.len());
}

pub fn print_search_results(keyword: &str, results: &[(u32, String)]) {
    if results.is_empty() {
        println!("{}", format!("No process matches '{}'", keyword).yellow());
        return;
    }
    for (pid, name) in results {
        println!("{:>7}  {}", pid.to_string().cyan(), name);
    }
}

pub fn print_tree(rows: &[FlattenedProcess]) {
    for row in rows {
        let indent = format_tree_indent(row);
        println!(
            "{}{} {}",
            indent.dimmed(),
            row.process.command_name,
            format!("({})", row.process.pid).dimmed()
        );
    }
}

/// Full report for `wd ps show`
pub fn print_process_detail(
    metrics: &ProcessMetrics,
    name: &str,
    exe: Option<&Path>,
    cwd: Option<&Path>,
    disk: Option<&DiskInfo>,
    children: &[u32],
    group: &[u32],
) {
    print_section_header(&format!("Process {}", metrics.pid));
    println!("  Name: {}", name);
    println!(
        "  State: {} ({})",
        metrics.state,
        describe_state(metrics.state)
    );
    println!("  Parent: {}", metrics.parent_pid);
    println!("  Group: {}", metrics.group_id);
    if let Some(exe) = exe {
        println!("  Executable: {}", exe.display());
    }
    if let Some(cwd) = cwd {
        println!("  Working dir: {}", cwd.display());
    }
    if let Some(disk) = disk {
        println!(
            "  Disk: {} ({}), {} free of {}",
            disk.mount_point,
            disk.file_system,
            format_size(disk.available_bytes),
            format_size(disk.total_bytes)
        );
    }
    println!("  CPU: {}", format_percent(metrics.cpu_percent));
    println!(
        "  Memory: {} ({})",
        format_size(metrics.memory_bytes),
        format_percent(metrics.memory_percent)
    );
    match &metrics.io {
        Some(io) => println!(
            "  I/O: read {}, write {}",
            format_mb_rate(io.read_mb_per_sec),
            format_mb_rate(io.write_mb_per_sec)
        ),
        None => println!("  I/O: {}", "unavailable".dimmed()),
    }
    println!("  Children: {}", join_pids(children));
    println!("  Group members: {}", join_pids(group));
}

fn join_pids(pids: &[u32]) -> String {
    if pids.is_empty() {
        return "-".to_string();
    }
    pids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn print_kill_report(report: &KillReport) {
    println!(
        "{} pid {} with {} ({} processes)",
        "Killing".bold(),
        report.target,
        report.signal,
        report.closure.len()
    );
    for (pid, outcome) in &report.outcomes {
        let status = match outcome {
            PidOutcome::Signaled => "signaled".green(),
            PidOutcome::AlreadyGone => "already gone".dimmed(),
            PidOutcome::Zombie(_) => "zombie, skipped".yellow(),
            PidOutcome::AccessDenied(_) => "access denied".red(),
            PidOutcome::Failed(e) => format!("failed: {}", e).red(),
        };
        println!("  {:>7}  {}", pid, status);
    }
    if report.success {
        println!("{}", "✓ Done".green());
    }
}

pub fn print_restart_report(report: &RestartReport) {
    print_kill_report(&report.kill);
    println!(
        "{} new process started with pid {}",
        "✓".green(),
        report.new_pid.to_string().bold()
    );
}

/// One line per watched process, prefixed with the snapshot time
pub fn print_watch_snapshot(snapshot: &WatchSnapshot) {
    let time = format_time(snapshot.timestamp);
    if let Some(system) = &snapshot.system {
        println!(
            "[{}] {:<16} cpu {} mem {} net ↓{} ↑{}",
            time,
            "system",
            format_percent(system.cpu_percent),
            format_percent(system.memory.used_percent),
            format_kib_rate(system.network.download_kib_per_sec),
            format_kib_rate(system.network.upload_kib_per_sec)
        );
    }
    for (pid, status) in &snapshot.processes {
        match status {
            ProcessStatus::Alive(metrics) => {
                let io = metrics
                    .io
                    .map(|io| {
                        format!(
                            " io r {} w {}",
                            format_mb_rate(io.read_mb_per_sec),
                            format_mb_rate(io.write_mb_per_sec)
                        )
                    })
                    .unwrap_or_default();
                println!(
                    "[{}] {:<16} cpu {} mem {} ({}){}",
                    time,
                    format!("{} {}", pid, truncate(&metrics.name, 10)),
                    format_percent(metrics.cpu_percent),
                    format_percent(metrics.memory_percent),
                    format_size(metrics.memory_bytes),
                    io
                );
            }
            ProcessStatus::Warming => println!("[{}] {:<16} {}", time, pid, "warming up".dimmed()),
            ProcessStatus::Gone => println!("[{}] {:<16} {}", time, pid, "exited".red()),
            ProcessStatus::Zombie(msg)
            | ProcessStatus::Denied(msg)
            | ProcessStatus::Error(msg) => println!("[{}] {:<16} {}", time, pid, msg.yellow()),
        }
    }
}

pub fn print_config(config: &Config, path: Option<&Path>) {
    print_section_header("Configuration");
    if let Some(path) = path {
        println!("  File: {}", path.display().to_string().dimmed());
    }
    println!("  interval_secs: {}", config.interval_secs);
    println!("  source_timeout_ms: {}", config.source_timeout_ms);
    println!("  proc_root: {}", config.proc_root.display());
    println!("  kill_signal: {}", config.kill_signal);
    println!("  name_preference: {:?}", config.name_preference);
    for (ext, program) in &config.interpreters {
        println!("  interpreters.{}: {}", ext, program);
    }
}
