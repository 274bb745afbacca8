use std::fmt;
use std::io;
use thiserror::Error;

/// Formats the optional `(pid=.., name=.., ppid=..)` detail suffix shared by
/// the per-process conditions.
struct ProcessDetails<'a> {
    pid: u32,
    name: Option<&'a str>,
    ppid: Option<u32>,
}

impl fmt::Display for ProcessDetails<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(pid={}", self.pid)?;
        if let Some(name) = self.name {
            write!(f, ", name={}", name)?;
        }
        if let Some(ppid) = self.ppid {
            write!(f, ", ppid={}", ppid)?;
        }
        write!(f, ")")
    }
}

fn details(pid: &u32, name: &Option<String>) -> String {
    zombie_details(pid, name, &None)
}

fn zombie_details(pid: &u32, name: &Option<String>, ppid: &Option<u32>) -> String {
    ProcessDetails {
        pid: *pid,
        name: name.as_deref(),
        ppid: *ppid,
    }
    .to_string()
}

/// Error type for the watchdogs crate
///
/// The first three variants form the closed per-process taxonomy that every
/// snapshot read is classified into. The rate tracker adds its numeric edge
/// conditions; the remaining variants cover the outer layers.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("process no longer exists {}", details(.pid, .name))]
    NoSuchProcess { pid: u32, name: Option<String> },

    #[error("process still exists but it's a zombie {}", zombie_details(.pid, .name, .ppid))]
    ZombieProcess {
        pid: u32,
        name: Option<String>,
        ppid: Option<u32>,
    },

    #[error("access denied {}", details(.pid, .name))]
    AccessDenied { pid: u32, name: Option<String> },

    #[error("insufficient interval for {entity}: counter denominator did not advance")]
    InsufficientInterval { entity: String },

    #[error("counter reset for {entity} persisted after re-bootstrap")]
    CounterReset { entity: String },

    #[error("no sample in progress for {entity}")]
    NotBootstrapped { entity: String },

    #[error("malformed data from {source_name}: {detail}")]
    Malformed { source_name: String, detail: String },

    #[error("read of {what} did not complete within {timeout_ms}ms")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("unsupported executable: {0}")]
    UnsupportedExecutable(String),

    #[error("failed to start process: {0}")]
    Spawn(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for the watchdogs crate
pub type Result<T> = std::result::Result<T, WatchError>;

impl WatchError {
    pub fn no_such_process(pid: u32) -> Self {
        WatchError::NoSuchProcess { pid, name: None }
    }

    pub fn zombie(pid: u32, name: Option<String>, ppid: Option<u32>) -> Self {
        WatchError::ZombieProcess { pid, name, ppid }
    }

    pub fn access_denied(pid: u32) -> Self {
        WatchError::AccessDenied { pid, name: None }
    }

    pub fn malformed<S: Into<String>, D: Into<String>>(source: S, detail: D) -> Self {
        WatchError::Malformed {
            source_name: source.into(),
            detail: detail.into(),
        }
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        WatchError::Config(msg.into())
    }

    /// Attach a process name to a per-process condition that lacks one.
    pub fn with_name<S: Into<String>>(self, process_name: S) -> Self {
        match self {
            WatchError::NoSuchProcess { pid, name: None } => WatchError::NoSuchProcess {
                pid,
                name: Some(process_name.into()),
            },
            WatchError::ZombieProcess {
                pid,
                name: None,
                ppid,
            } => WatchError::ZombieProcess {
                pid,
                name: Some(process_name.into()),
                ppid,
            },
            WatchError::AccessDenied { pid, name: None } => WatchError::AccessDenied {
                pid,
                name: Some(process_name.into()),
            },
            other => other,
        }
    }

    /// The pid a per-process condition refers to.
    pub fn pid(&self) -> Option<u32> {
        match self {
            WatchError::NoSuchProcess { pid, .. }
            | WatchError::ZombieProcess { pid, .. }
            | WatchError::AccessDenied { pid, .. } => Some(*pid),
            _ => None,
        }
    }

    /// Per-process conditions are recoverable at the granularity of one pid:
    /// bulk operations skip them and keep going.
    pub fn is_per_process(&self) -> bool {
        self.pid().is_some()
    }

    pub fn is_no_such_process(&self) -> bool {
        matches!(self, WatchError::NoSuchProcess { .. })
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self, WatchError::ZombieProcess { .. })
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, WatchError::AccessDenied { .. })
    }

    /// Classify a low-level failure from a pid-bound read.
    ///
    /// Zombie detection needs a fresh look at the process state, so it is
    /// layered on top of this by the snapshot source.
    pub fn from_pid_io(pid: u32, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => WatchError::no_such_process(pid),
            io::ErrorKind::PermissionDenied => WatchError::access_denied(pid),
            // a truncated or garbled read means the process is on its way out
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                WatchError::no_such_process(pid)
            }
            _ => match err.raw_os_error() {
                #[cfg(unix)]
                Some(libc::ESRCH) => WatchError::no_such_process(pid),
                #[cfg(unix)]
                Some(libc::EPERM | libc::EACCES) => WatchError::access_denied(pid),
                _ => WatchError::Io(err),
            },
        }
    }
}
