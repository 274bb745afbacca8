// Watchdogs Library - Public API

// Re-export error types
pub mod error;
pub use error::{Result, WatchError};

// Module declarations
pub mod commands;
pub mod core;
pub mod platform;
pub mod ui;

// Re-export commonly used types
pub use core::config::Config;

/// Initialize logging. `RUST_LOG` wins; otherwise warnings only, or debug
/// output with `verbose`.
pub fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        });
    }
    // a second call (tests) keeps the first logger
    let _ = builder.try_init();
}
