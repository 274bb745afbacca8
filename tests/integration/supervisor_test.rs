// Cascading kill against real processes

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use watchdogs::core::{KillOptions, Launcher, PidOutcome, ProcFs, ProcessDirectory, Supervisor};
use watchdogs::platform::{self, Signal};

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

fn supervisor() -> Supervisor {
    Supervisor::new(Arc::new(ProcFs::new()), Launcher::default())
}

/// Gone, or left as a zombie for a parent that never reaps
fn is_dead(directory: &ProcessDirectory, pid: u32) -> bool {
    match directory.identity(pid) {
        Ok(identity) => identity.is_zombie(),
        Err(e) => e.is_no_such_process(),
    }
}

fn spawn_shell_with_child() -> Child {
    Command::new("sh")
        .args(["-c", "sleep 30 & wait"])
        .stdout(Stdio::null())
        .process_group(0)
        .spawn()
        .unwrap()
}

#[test]
fn test_kill_takes_down_children_and_group() {
    let mut shell = spawn_shell_with_child();
    let shell_pid = shell.id();
    let supervisor = supervisor();
    let directory = supervisor.directory();

    assert!(wait_until(|| !directory.children_of(shell_pid).unwrap().is_empty()));
    let sleeper = directory.children_of(shell_pid).unwrap()[0];
    assert_eq!(directory.identity(sleeper).unwrap().group_id, shell_pid);

    let report = supervisor.kill(shell_pid, &KillOptions::default()).unwrap();
    assert!(report.success);
    assert!(report.closure.contains(&shell_pid));
    assert!(report.closure.contains(&sleeper));
    assert!(!report.closure.contains(&platform::current_pid()));
    assert!(report.closure.windows(2).all(|pair| pair[0] > pair[1]));
    assert!(matches!(report.outcome(shell_pid), Some(PidOutcome::Signaled)));

    let status = shell.wait().unwrap();
    assert_eq!(status.signal(), Some(9));
    assert!(wait_until(|| is_dead(directory, sleeper)));
}

#[test]
fn test_shared_group_is_left_alone() {
    // same process group as the test runner
    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id();
    let supervisor = supervisor();

    let closure = supervisor.kill_closure(pid, &KillOptions::default()).unwrap();
    assert_eq!(closure, vec![pid]);

    let report = supervisor
        .kill(
            pid,
            &KillOptions {
                signal: Signal::Term,
                ..KillOptions::default()
            },
        )
        .unwrap();
    assert_eq!(report.signaled(), vec![pid]);
    assert_eq!(child.wait().unwrap().signal(), Some(15));
}

#[test]
fn test_unreaped_child_is_reported_as_zombie() {
    let mut child = Command::new("true").spawn().unwrap();
    let pid = child.id();
    let supervisor = supervisor();
    let directory = supervisor.directory();

    assert!(wait_until(|| directory.identity(pid).map(|i| i.is_zombie()).unwrap_or(false)));
    let report = supervisor
        .kill(
            pid,
            &KillOptions {
                children: false,
                group: false,
                signal: Signal::Kill,
            },
        )
        .unwrap();
    assert!(report.success);
    assert!(matches!(report.outcome(pid), Some(PidOutcome::Zombie(_))));

    assert!(child.wait().unwrap().success());
}

#[test]
fn test_unknown_target_is_an_error() {
    let err = supervisor()
        .kill(u32::MAX - 1, &KillOptions::default())
        .unwrap_err();
    assert!(err.is_no_such_process());
}
