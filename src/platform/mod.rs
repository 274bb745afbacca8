// Platform-specific code module

pub mod process;

// Re-exports for cleaner imports
#[cfg(unix)]
pub use process::detach_session;
pub use process::{current_pgid, current_pid, is_elevated, page_size, send_signal, Signal};
