// End-to-end runs of the `wd` binary with an isolated config directory

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn wd(config_home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wd"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env("HOME", config_home)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "wd failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_config_set_then_show() {
    let home = TempDir::new().unwrap();

    assert!(wd(home.path(), &["config", "set", "interval_secs", "5"]).status.success());
    assert!(wd(home.path(), &["config", "set", "interpreters.py", "python3.12"]).status.success());

    let config = stdout_json(&wd(home.path(), &["config", "show", "--json"]));
    assert_eq!(config["interval_secs"], 5);
    assert_eq!(config["interpreters"]["py"], "python3.12");
    assert_eq!(config["kill_signal"], "kill");

    let path = wd(home.path(), &["config", "path"]);
    let path = String::from_utf8_lossy(&path.stdout);
    assert!(Path::new(path.trim()).starts_with(home.path()));
    assert!(Path::new(path.trim()).exists());
}

#[test]
fn test_config_set_rejects_bad_input() {
    let home = TempDir::new().unwrap();

    let output = wd(home.path(), &["config", "set", "no_such_key", "1"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown key"));

    let output = wd(home.path(), &["config", "set", "interval_secs", "0"]);
    assert!(!output.status.success());
}

#[test]
fn test_sys_mem_reads_configured_proc_root() {
    let home = TempDir::new().unwrap();
    let proc_root = TempDir::new().unwrap();
    fs::write(
        proc_root.path().join("meminfo"),
        "MemTotal:        2000000 kB\nMemFree:          500000 kB\nMemAvailable:     500000 kB\n",
    )
    .unwrap();

    let root = proc_root.path().to_str().unwrap();
    assert!(wd(home.path(), &["config", "set", "proc_root", root]).status.success());

    let memory = stdout_json(&wd(home.path(), &["sys", "mem", "--json"]));
    assert_eq!(memory["total_kb"], 2_000_000);
    assert_eq!(memory["used_percent"], 75.0);
}

#[cfg(target_os = "linux")]
#[test]
fn test_search_and_kill_real_process() {
    use std::os::unix::process::{CommandExt, ExitStatusExt};

    let home = TempDir::new().unwrap();
    let mut child = Command::new("sleep")
        .arg("37")
        .process_group(0)
        .spawn()
        .unwrap();
    let pid = child.id();

    let found = stdout_json(&wd(home.path(), &["ps", "search", "sleep 37", "--exact", "--json"]));
    let pids: Vec<u64> = found
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry[0].as_u64().unwrap())
        .collect();
    assert!(pids.contains(&(pid as u64)));

    let dry_run = wd(home.path(), &["kill", &pid.to_string(), "--dry-run"]);
    assert!(dry_run.status.success());
    assert!(child.try_wait().unwrap().is_none());

    let report = stdout_json(&wd(home.path(), &["kill", &pid.to_string(), "-s", "term", "--json"]));
    assert_eq!(report["success"], true);
    assert_eq!(report["target"], pid);
    assert_eq!(child.wait().unwrap().signal(), Some(15));
}

#[cfg(target_os = "linux")]
#[test]
fn test_ps_show_reports_working_disk() {
    let home = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let mut child = Command::new("sleep")
        .arg("38")
        .current_dir(workdir.path())
        .spawn()
        .unwrap();

    let detail = stdout_json(&wd(home.path(), &["ps", "show", &child.id().to_string(), "--json"]));
    child.kill().unwrap();
    child.wait().unwrap();

    let cwd = fs::canonicalize(workdir.path()).unwrap();
    assert_eq!(detail["pid"], child.id());
    assert_eq!(detail["cwd"], cwd.to_str().unwrap());
    // containers may expose no mounts at all
    assert!(detail.as_object().unwrap().contains_key("disk"));
    if let Some(mount) = detail["disk"]["mount_point"].as_str() {
        assert!(cwd.starts_with(mount));
    }
}

#[test]
fn test_kill_unknown_pid_fails() {
    let home = TempDir::new().unwrap();
    let output = wd(home.path(), &["kill", "4294967290"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("4294967290"));
}
