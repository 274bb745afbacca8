use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use watchdogs::core::{Config, NamePreference};
use watchdogs::platform::Signal;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.interval(), Duration::from_secs(2));
    assert_eq!(config.kill_signal, Signal::Kill);
    assert_eq!(config.name_preference, NamePreference::Cmdline);
    assert_eq!(config.interpreters.get("py").map(String::as_str), Some("python3"));
}

#[test]
fn test_config_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.json");

    let mut config = Config::default();
    config.set("interval_secs", "7").unwrap();
    config.set("kill_signal", "SIGTERM").unwrap();
    config.set("name_preference", "comm").unwrap();
    config.set("interpreters.py", "/opt/venv/bin/python").unwrap();
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.interval(), Duration::from_secs(7));
}

#[test]
fn test_config_partial_file_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, r#"{ "proc_root": "/host/proc" }"#).unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.proc_root, Path::new("/host/proc"));
    assert_eq!(config.interval_secs, 2);
    assert_eq!(config.source_timeout(), Duration::from_millis(5000));
}

#[test]
fn test_config_garbage_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, "interval_secs = 3").unwrap();

    assert_eq!(Config::load_from(&path).unwrap(), Config::default());
}

#[test]
fn test_config_interpreter_feeds_launcher() {
    let temp_dir = TempDir::new().unwrap();
    let script = temp_dir.path().join("worker.PY");
    fs::write(&script, "print('hi')\n").unwrap();

    let config = Config {
        interpreters: BTreeMap::from([("py".to_string(), "pypy3".to_string())]),
        ..Config::default()
    };
    let plan = config.launcher().plan(&script).unwrap();
    assert_eq!(plan.program, "pypy3");
    assert_eq!(plan.log_path.file_name().unwrap(), "worker.out");

    // removing the override falls back to the built-in interpreter
    let mut config = config;
    config.set("interpreters.py", "").unwrap();
    let plan = config.launcher().plan(&script).unwrap();
    assert_eq!(plan.program, "python3");
}
