use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

use watchdogs::commands;

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .help("Print machine-readable JSON")
        .action(ArgAction::SetTrue)
        .global(true)
}

fn pid_arg() -> Arg {
    Arg::new("pid")
        .help("Process id")
        .required(true)
        .value_parser(value_parser!(u32).range(1..))
}

fn path_arg(help: &'static str) -> Arg {
    Arg::new("path")
        .help(help)
        .required(true)
        .value_parser(value_parser!(PathBuf))
}

fn cli() -> Command {
    Command::new("wd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Process telemetry and supervision for Linux hosts")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("sys")
                .about("System-wide rates and host information")
                .long_about("System-wide rates and host information\n\nRates need two samples; the first call waits one settling interval (interval_secs).")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .arg(json_arg())
                .subcommand(Command::new("cpu").about("Whole-machine CPU usage"))
                .subcommand(Command::new("cores").about("CPU usage of every core"))
                .subcommand(Command::new("mem").about("Memory usage"))
                .subcommand(Command::new("net").about("Network throughput (all devices but lo)"))
                .subcommand(Command::new("all").about("CPU, cores, memory and network together"))
                .subcommand(Command::new("info").about("Host, OS, CPU and storage information")),
        )
        .subcommand(
            Command::new("ps")
                .about("Discover processes")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .arg(json_arg())
                .subcommand(Command::new("list").about("List every process"))
                .subcommand(
                    Command::new("search")
                        .about("Find processes by name")
                        .arg(
                            Arg::new("keyword")
                                .help("Text to look for in process names")
                                .required(true),
                        )
                        .arg(
                            Arg::new("exact")
                                .short('e')
                                .long("exact")
                                .help("Match the whole name instead of a substring")
                                .action(ArgAction::SetTrue),
                        ),
                )
                .subcommand(Command::new("tree").about("Show the parent/child tree"))
                .subcommand(
                    Command::new("show")
                        .about("Rates and relationships of one process")
                        .arg(pid_arg()),
                ),
        )
        .subcommand(
            Command::new("kill")
                .about("Kill a process together with its children and process group")
                .arg(pid_arg())
                .arg(
                    Arg::new("no-children")
                        .long("no-children")
                        .help("Leave child processes alone")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no-group")
                        .long("no-group")
                        .help("Leave process-group peers alone")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("signal")
                        .short('s')
                        .long("signal")
                        .value_name("SIGNAL")
                        .help("term or kill (default from config)"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .help("Show which pids would be signaled without signaling")
                        .action(ArgAction::SetTrue),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("restart")
                .about("Kill a process tree and start a script in its place")
                .arg(pid_arg())
                .arg(path_arg("Script to start (.py)"))
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("start")
                .about("Start a script detached from this terminal")
                .arg(path_arg("Script to start (.py)")),
        )
        .subcommand(
            Command::new("watch")
                .about("Sample processes periodically until they exit")
                .arg(
                    Arg::new("pids")
                        .help("Processes to watch (system rates only if omitted)")
                        .num_args(0..)
                        .value_parser(value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECS")
                        .help("Seconds between samples (default from config)")
                        .value_parser(value_parser!(u64).range(1..)),
                )
                .arg(
                    Arg::new("count")
                        .short('n')
                        .long("count")
                        .value_name("N")
                        .help("Stop after N reports")
                        .value_parser(value_parser!(u64).range(1..)),
                )
                .arg(
                    Arg::new("no-system")
                        .long("no-system")
                        .help("Do not sample system-wide rates alongside the pids")
                        .action(ArgAction::SetTrue),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Show or change configuration")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("show")
                        .about("Print the current configuration")
                        .arg(json_arg()),
                )
                .subcommand(
                    Command::new("set")
                        .about("Set a configuration key")
                        .arg(Arg::new("key").required(true).help("Key, e.g. interval_secs or interpreters.py"))
                        .arg(Arg::new("value").required(true).help("New value")),
                )
                .subcommand(Command::new("reset").about("Restore the defaults"))
                .subcommand(Command::new("path").about("Print the configuration file path")),
        )
}

fn main() -> Result<()> {
    let matches = cli().get_matches();

    watchdogs::init_logging(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("sys", sub_matches)) => commands::sys::execute(sub_matches)?,
        Some(("ps", sub_matches)) => commands::ps::execute(sub_matches)?,
        Some(("kill", sub_matches)) => commands::kill::execute(sub_matches)?,
        Some(("restart", sub_matches)) => commands::restart::execute(sub_matches)?,
        Some(("start", sub_matches)) => commands::restart::execute_start(sub_matches)?,
        Some(("watch", sub_matches)) => commands::watch::execute(sub_matches)?,
        Some(("config", sub_matches)) => commands::config::execute(sub_matches)?,
        _ => {
            println!("Welcome to watchdogs!");
            println!("Use 'wd --help' for more information.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_parses_kill_flags() {
        let matches = cli()
            .try_get_matches_from(["wd", "kill", "42", "--no-group", "-s", "term"])
            .unwrap();
        let (_, kill) = matches.subcommand().unwrap();
        assert_eq!(kill.get_one::<u32>("pid"), Some(&42));
        assert!(kill.get_flag("no-group"));
        assert!(!kill.get_flag("no-children"));
        assert_eq!(kill.get_one::<String>("signal").map(String::as_str), Some("term"));
    }

    #[test]
    fn test_rejects_pid_zero() {
        assert!(cli().try_get_matches_from(["wd", "kill", "0"]).is_err());
    }

    #[test]
    fn test_json_flag_reaches_subcommands() {
        let matches = cli()
            .try_get_matches_from(["wd", "sys", "cpu", "--json"])
            .unwrap();
        let (_, sys) = matches.subcommand().unwrap();
        let (name, cpu) = sys.subcommand().unwrap();
        assert_eq!(name, "cpu");
        assert!(cpu.get_flag("json"));
    }
}
