//! Starting replacement processes detached from the supervisor.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Result, WatchError};

/// Executable kinds the supervisor knows how to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Python,
}

impl ScriptKind {
    /// Classify a path by its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("py") => Ok(ScriptKind::Python),
            _ => Err(WatchError::UnsupportedExecutable(path.display().to_string())),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ScriptKind::Python => "py",
        }
    }

    pub fn default_interpreter(self) -> &'static str {
        match self {
            ScriptKind::Python => "python3",
        }
    }
}

/// Everything needed to start one script, resolved up front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub kind: ScriptKind,
    pub program: String,
    pub script: PathBuf,
    pub working_dir: PathBuf,
    /// Combined stdout/stderr of the new process
    pub log_path: PathBuf,
}

/// Resolves script paths into launch plans
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    interpreters: HashMap<String, String>,
}

impl Launcher {
    /// `interpreters` maps an extension (`py`) to the program that runs it.
    pub fn new(interpreters: HashMap<String, String>) -> Self {
        Self { interpreters }
    }

    /// Validate `path` and work out how to run it. Nothing is started.
    pub fn plan(&self, path: &Path) -> Result<LaunchPlan> {
        let kind = ScriptKind::from_path(path)?;
        let script = fs::canonicalize(path)
            .map_err(|e| WatchError::Spawn(format!("{}: {}", path.display(), e)))?;
        if !script.is_file() {
            return Err(WatchError::Spawn(format!("{} is not a file", script.display())));
        }

        let working_dir = script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let stem = script
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "process".to_string());
        let log_path = working_dir.join(format!("{}.out", stem));

        let program = self
            .interpreters
            .get(kind.extension())
            .cloned()
            .unwrap_or_else(|| kind.default_interpreter().to_string());

        Ok(LaunchPlan {
            kind,
            program,
            script,
            working_dir,
            log_path,
        })
    }
}

/// Starts processes from launch plans
pub trait Spawner: Send + Sync {
    /// Start the plan and return the new pid
    fn spawn(&self, plan: &LaunchPlan) -> Result<u32>;
}

/// Starts the process in a new session so it outlives the supervisor
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSpawner;

impl DetachedSpawner {
    fn open_log(path: &Path) -> Result<(File, File)> {
        let stdout = OpenOptions::new().create(true).append(true).open(path)?;
        let stderr = stdout.try_clone()?;
        Ok((stdout, stderr))
    }
}

impl Spawner for DetachedSpawner {
    fn spawn(&self, plan: &LaunchPlan) -> Result<u32> {
        let (stdout, stderr) = Self::open_log(&plan.log_path)?;

        let mut command = Command::new(&plan.program);
        command
            .arg(&plan.script)
            .current_dir(&plan.working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // setsid is async-signal-safe
            unsafe {
                command.pre_exec(crate::platform::detach_session);
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| WatchError::Spawn(format!("{} {}: {}", plan.program, plan.script.display(), e)))?;
        let pid = child.id();
        log::info!(
            "started {} as pid {} (output: {})",
            plan.script.display(),
            pid,
            plan.log_path.display()
        );

        // reap it if it exits while we are still around
        std::thread::Builder::new()
            .name(format!("reap-{}", pid))
            .spawn(move || {
                let _ = child.wait();
            })?;

        Ok(pid)
    }
}
