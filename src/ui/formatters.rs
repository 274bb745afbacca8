use chrono::{DateTime, Local, Utc};
use colored::*;

/// Format byte count in human-readable format (B, KB, MB, GB)
pub fn format_size(size: u64) -> String {
    if size < 1024 {
        format!("{}B", size)
    } else if size < 1024 * 1024 {
        format!("{:.1}KB", size as f64 / 1024.0)
    } else if size < 1024 * 1024 * 1024 {
        format!("{:.1}MB", size as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", size as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Same as `format_size`, for figures reported in kB (`/proc/meminfo`)
pub fn format_kb(kb: u64) -> String {
    format_size(kb.saturating_mul(1024))
}

/// Percentage colored by load: green below 50, yellow below 80, red above
pub fn format_percent(percent: f64) -> ColoredString {
    let text = format!("{:5.1}%", percent);
    if percent >= 80.0 {
        text.red()
    } else if percent >= 50.0 {
        text.yellow()
    } else {
        text.green()
    }
}

/// Network speed, KiB/s scaled up to MiB/s when large
pub fn format_kib_rate(kib_per_sec: f64) -> String {
    if kib_per_sec >= 1024.0 {
        format!("{:.2} MiB/s", kib_per_sec / 1024.0)
    } else {
        format!("{:.2} KiB/s", kib_per_sec)
    }
}

pub fn format_mb_rate(mb_per_sec: f64) -> String {
    format!("{:.2} MB/s", mb_per_sec)
}

/// Uptime as `3d 04:05:06`
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// Format timestamp in local time (HH:MM:SS)
pub fn format_time(time: DateTime<Utc>) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%H:%M:%S").to_string()
}

/// Process state letter with a readable label
pub fn describe_state(state: char) -> &'static str {
    match state {
        'R' => "running",
        'S' => "sleeping",
        'D' => "disk sleep",
        'Z' => "zombie",
        'T' => "stopped",
        't' => "tracing stop",
        'X' | 'x' => "dead",
        'I' => "idle",
        'K' => "wakekill",
        'W' => "waking",
        'P' => "parked",
        _ => "unknown",
    }
}

/// Cut `text` to `width` characters, marking the cut with `…`
pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
