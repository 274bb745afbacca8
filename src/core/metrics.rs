use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// System-wide rates from one sampling round
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub timestamp: i64, // Unix timestamp
    pub cpu_percent: f64,
    pub per_core_percent: BTreeMap<String, f64>,
    pub memory: MemoryMetrics,
    pub network: NetSpeed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total_kb: u64,
    pub free_kb: u64,
    pub available_kb: u64,
    pub used_percent: f64,
}

/// Aggregate network throughput, KiB/s
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetSpeed {
    pub download_kib_per_sec: f64,
    pub upload_kib_per_sec: f64,
}

/// Per-process I/O throughput, MB/s (decimal)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IoRate {
    pub read_mb_per_sec: f64,
    pub write_mb_per_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub pid: u32,
    pub name: String,
    pub state: char,
    pub parent_pid: u32,
    pub group_id: u32,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_percent: f64,
    /// None when the process' I/O counters are not readable (zombie or
    /// another user's process).
    pub io: Option<IoRate>,
}
