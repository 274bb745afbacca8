// Restart: validate, kill the old tree, start the script detached

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use watchdogs::core::{Config, KillOptions, ProcFs, SnapshotSource, Supervisor};

fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

/// `.py` scripts run by `sh` so the test needs no Python
fn shell_config() -> Config {
    Config {
        interpreters: BTreeMap::from([("py".to_string(), "sh".to_string())]),
        ..Config::default()
    }
}

fn write_job(dir: &TempDir) -> std::path::PathBuf {
    let script = dir.path().join("job.py");
    fs::write(&script, "echo started\nexec sleep 30\n").unwrap();
    script
}

#[test]
fn test_restart_replaces_process() {
    let dir = TempDir::new().unwrap();
    let script = write_job(&dir);
    let procfs = Arc::new(ProcFs::new());
    let supervisor = Supervisor::new(procfs.clone(), shell_config().launcher());

    let mut victim = Command::new("sleep").arg("30").process_group(0).spawn().unwrap();
    let victim_pid = victim.id();

    let report = supervisor.restart(victim_pid, &script).unwrap();
    assert!(report.kill.success);
    assert_eq!(report.kill.closure, vec![victim_pid]);
    assert_ne!(report.new_pid, victim_pid);
    assert_eq!(victim.wait().unwrap().signal(), Some(9));

    // detached: leader of its own session and group, running from the script's directory
    let new_pid = report.new_pid;
    assert!(wait_until(|| procfs
        .identity(new_pid)
        .map(|identity| identity.group_id == new_pid)
        .unwrap_or(false)));
    let canonical_dir = fs::canonicalize(dir.path()).unwrap();
    assert_eq!(procfs.cwd(new_pid).unwrap(), canonical_dir);

    let log_path = canonical_dir.join("job.out");
    assert!(wait_until(|| fs::read_to_string(&log_path)
        .map(|log| log.contains("started"))
        .unwrap_or(false)));

    supervisor.kill(new_pid, &KillOptions::default()).unwrap();
}

#[test]
fn test_restart_rejects_script_before_killing() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("job.sh");
    fs::write(&script, "exec sleep 30\n").unwrap();
    let supervisor = Supervisor::new(Arc::new(ProcFs::new()), shell_config().launcher());

    let mut victim = Command::new("sleep").arg("30").process_group(0).spawn().unwrap();
    let victim_pid = victim.id();

    let err = supervisor.restart(victim_pid, &script).unwrap_err();
    assert!(err.to_string().contains("unsupported executable"));
    // still running
    assert!(victim.try_wait().unwrap().is_none());

    victim.kill().unwrap();
    victim.wait().unwrap();
}

#[test]
fn test_start_appends_to_existing_log() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("job.py");
    fs::write(&script, "echo run\n").unwrap();
    fs::write(dir.path().join("job.out"), "previous run\n").unwrap();
    let supervisor = Supervisor::new(Arc::new(ProcFs::new()), shell_config().launcher());

    supervisor.start(&script).unwrap();

    let log_path = dir.path().join("job.out");
    assert!(wait_until(|| fs::read_to_string(&log_path)
        .map(|log| log == "previous run\nrun\n")
        .unwrap_or(false)));
}
