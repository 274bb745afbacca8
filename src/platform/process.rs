//! Thin wrappers over the libc process calls the supervisor needs.
//!
//! Everything here returns `io::Error` with the raw errno preserved, so the
//! caller can classify ESRCH / EPERM into the process taxonomy.

use std::io;

use serde::{Deserialize, Serialize};

/// Termination signal sent by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Term,
    #[default]
    Kill,
}

impl Signal {
    #[cfg(unix)]
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().trim_start_matches("sig") {
            "term" | "15" => Some(Signal::Term),
            "kill" | "9" => Some(Signal::Kill),
            _ => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Term => write!(f, "SIGTERM"),
            Signal::Kill => write!(f, "SIGKILL"),
        }
    }
}

#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // pid 0 and negative pids address whole groups; never let that through
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to signal a process group",
        ));
    }

    let rc = unsafe { libc::kill(pid, signal.as_raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, _signal: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "signals are only supported on unix",
    ))
}

pub fn current_pid() -> u32 {
    std::process::id()
}

/// Process group of the calling process
#[cfg(unix)]
pub fn current_pgid() -> u32 {
    unsafe { libc::getpgrp() as u32 }
}

#[cfg(not(unix))]
pub fn current_pgid() -> u32 {
    current_pid()
}

/// Detach the calling process into a new session. Meant for `pre_exec`.
#[cfg(unix)]
pub fn detach_session() -> io::Result<()> {
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Memory page size in bytes, used to convert `rss` pages
#[cfg(unix)]
pub fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        DEFAULT_PAGE_SIZE
    }
}

#[cfg(not(unix))]
pub fn page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

const DEFAULT_PAGE_SIZE: u64 = 4096;

#[cfg(unix)]
pub fn is_elevated() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}
