// UI and formatting module

pub mod formatters;
pub mod system_formatters;

// Re-export commonly used items for cleaner imports
pub use formatters::{format_kib_rate, format_mb_rate, format_percent, format_size, format_time};
