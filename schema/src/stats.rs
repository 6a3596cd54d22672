//! Resource sample types for processes and the host

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One resource sample of a managed process
///
/// Every field except `id`, `pid`, and `timestamp` is best-effort: anything
/// the OS cannot provide is zero.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProcessStats {
    /// Identifier of the managed process
    pub id: String,
    /// OS pid the sample was taken from
    pub pid: u32,
    /// CPU percentage
    pub cpu: f64,
    /// Resident set size in bytes
    pub memory: u64,
    /// Share of host memory in percent
    pub memory_percent: f64,
    /// Thread count
    pub num_threads: u32,
    /// Open file descriptor count
    pub num_fds: u32,
    /// Cumulative bytes read
    pub read_bytes: u64,
    /// Cumulative bytes written
    pub write_bytes: u64,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
}

impl ProcessStats {
    /// A sample with only identity and timestamp populated, used when the
    /// pid is dead or inaccessible
    pub fn empty(id: impl Into<String>, pid: u32) -> Self {
        Self {
            id: id.into(),
            pid,
            cpu: 0.0,
            memory: 0,
            memory_percent: 0.0,
            num_threads: 0,
            num_fds: 0,
            read_bytes: 0,
            write_bytes: 0,
            timestamp: Utc::now(),
        }
    }
}

/// One sample of host-wide resource usage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SystemStats {
    /// Host CPU percentage
    pub cpu_percent: f64,
    /// Total physical memory in bytes
    pub memory_total: u64,
    /// Used physical memory in bytes
    pub memory_used: u64,
    /// Used memory in percent
    pub memory_percent: f64,
    /// Total size of the root filesystem in bytes
    pub disk_total: u64,
    /// Used bytes on the root filesystem
    pub disk_used: u64,
    /// Used disk in percent
    pub disk_percent: f64,
    /// 1, 5 and 15 minute load averages
    pub load_average: [f64; 3],
    /// Host uptime in seconds
    pub uptime: u64,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
}

impl Default for SystemStats {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_total: 0,
            memory_used: 0,
            memory_percent: 0.0,
            disk_total: 0,
            disk_used: 0,
            disk_percent: 0.0,
            load_average: [0.0; 3],
            uptime: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Daemon-level summary returned by `GET /system`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DaemonInfo {
    /// Supervisor version
    pub version: String,
    /// Supervisor uptime in seconds
    pub uptime: i64,
    /// When the supervisor started
    pub started_at: DateTime<Utc>,
    /// Number of managed processes
    pub process_count: usize,
    /// Number of processes currently running
    pub running_count: usize,
    /// Fresh host sample
    pub system_stats: SystemStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_has_identity_only() {
        let s = ProcessStats::empty("abcd1234", 42);
        assert_eq!(s.id, "abcd1234");
        assert_eq!(s.pid, 42);
        assert_eq!(s.cpu, 0.0);
        assert_eq!(s.memory, 0);
        assert_eq!(s.num_fds, 0);
    }

    #[test]
    fn system_stats_round_trip() {
        let s = SystemStats {
            cpu_percent: 12.5,
            memory_total: 16 << 30,
            memory_used: 4 << 30,
            memory_percent: 25.0,
            load_average: [0.5, 0.7, 0.9],
            uptime: 3600,
            ..SystemStats::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: SystemStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
        assert!(json.contains("\"load_average\":[0.5,0.7,0.9]"));
    }
}
