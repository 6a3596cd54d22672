//! Resource probing for processes and the host
//!
//! Both probes sit behind narrow traits so tests can inject deterministic
//! samplers and so the only OS-specific read path stays in one place. A
//! probe never fails: fields the OS cannot provide are left at zero, and a
//! dead or inaccessible pid yields a sample with only identity and
//! timestamp populated.

use chrono::Utc;
use schema::{ProcessStats, SystemStats};
use std::path::Path;
use std::sync::Mutex;
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};

/// Per-pid resource sampler
pub trait ResourceProbe: Send + Sync {
    /// Sample the given OS pid on behalf of managed process `id`
    fn sample(&self, id: &str, pid: u32) -> ProcessStats;
}

/// Host-wide resource sampler consumed by the stats collector
pub trait HostProbe: Send + Sync {
    /// Take one host sample
    fn sample(&self) -> SystemStats;
}

/// [`ResourceProbe`] backed by `sysinfo` plus `/proc` for descriptor counts
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    /// Create a probe with an empty system snapshot
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&self, id: &str, pid: u32) -> ProcessStats {
        let mut stats = ProcessStats::empty(id, pid);

        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]));
        system.refresh_memory();

        if let Some(proc_info) = system.process(sys_pid) {
            stats.cpu = f64::from(proc_info.cpu_usage());
            stats.memory = proc_info.memory();
            let total = system.total_memory();
            if total > 0 {
                stats.memory_percent = stats.memory as f64 * 100.0 / total as f64;
            }
            let disk = proc_info.disk_usage();
            stats.read_bytes = disk.total_read_bytes;
            stats.write_bytes = disk.total_written_bytes;
            #[cfg(target_os = "linux")]
            if let Some(tasks) = proc_info.tasks() {
                stats.num_threads = tasks.len() as u32;
            }
        }

        #[cfg(target_os = "linux")]
        {
            stats.num_fds = count_fds(pid);
        }

        stats
    }
}

/// Count entries in `/proc/<pid>/fd`; zero when the pid is gone or the
/// directory is unreadable
#[cfg(target_os = "linux")]
fn count_fds(pid: u32) -> u32 {
    match std::fs::read_dir(format!("/proc/{pid}/fd")) {
        Ok(entries) => entries.count() as u32,
        Err(_) => 0,
    }
}

/// [`HostProbe`] backed by `sysinfo`
pub struct SysinfoHostProbe {
    system: Mutex<System>,
}

impl SysinfoHostProbe {
    /// Create a probe with an empty system snapshot
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoHostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe for SysinfoHostProbe {
    fn sample(&self) -> SystemStats {
        let mut stats = SystemStats {
            timestamp: Utc::now(),
            ..SystemStats::default()
        };

        {
            let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_cpu_usage();
            system.refresh_memory();

            stats.cpu_percent = f64::from(system.global_cpu_usage());
            stats.memory_total = system.total_memory();
            stats.memory_used = system.used_memory();
            if stats.memory_total > 0 {
                stats.memory_percent =
                    stats.memory_used as f64 * 100.0 / stats.memory_total as f64;
            }
        }

        let disks = Disks::new_with_refreshed_list();
        for disk in disks.list() {
            if disk.mount_point() == Path::new("/") {
                stats.disk_total = disk.total_space();
                stats.disk_used = disk.total_space().saturating_sub(disk.available_space());
                if stats.disk_total > 0 {
                    stats.disk_percent =
                        stats.disk_used as f64 * 100.0 / stats.disk_total as f64;
                }
                break;
            }
        }

        let load = System::load_average();
        stats.load_average = [load.one, load.five, load.fifteen];
        stats.uptime = System::uptime();

        stats
    }
}

/// Deterministic [`ResourceProbe`] for tests: echoes a canned sample with
/// the requested identity
#[derive(Debug, Clone, Default)]
pub struct FixedProbe {
    /// CPU percentage every sample reports
    pub cpu: f64,
    /// RSS every sample reports
    pub memory: u64,
}

impl ResourceProbe for FixedProbe {
    fn sample(&self, id: &str, pid: u32) -> ProcessStats {
        ProcessStats {
            cpu: self.cpu,
            memory: self.memory,
            ..ProcessStats::empty(id, pid)
        }
    }
}

/// Deterministic [`HostProbe`] for tests
#[derive(Debug, Clone, Default)]
pub struct FixedHostProbe {
    /// CPU percentage every sample reports
    pub cpu_percent: f64,
}

impl HostProbe for FixedHostProbe {
    fn sample(&self) -> SystemStats {
        SystemStats {
            cpu_percent: self.cpu_percent,
            timestamp: Utc::now(),
            ..SystemStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_pid_yields_identity_only() {
        let probe = SysinfoProbe::new();
        // pid 0 never belongs to a user process
        let stats = probe.sample("abcd1234", 0);
        assert_eq!(stats.id, "abcd1234");
        assert_eq!(stats.pid, 0);
        assert_eq!(stats.cpu, 0.0);
        assert_eq!(stats.memory, 0);
    }

    #[test]
    fn own_pid_is_sampled() {
        let probe = SysinfoProbe::new();
        let pid = std::process::id();
        let stats = probe.sample("self", pid);
        assert_eq!(stats.pid, pid);
        // we definitely occupy memory and hold open descriptors
        assert!(stats.memory > 0);
        #[cfg(target_os = "linux")]
        assert!(stats.num_fds > 0);
    }

    #[test]
    fn host_sample_has_memory_and_uptime() {
        let probe = SysinfoHostProbe::new();
        let stats = probe.sample();
        assert!(stats.memory_total > 0);
        assert!(stats.memory_used > 0);
        assert!(stats.uptime > 0);
    }

    #[test]
    fn fixed_probe_is_deterministic() {
        let probe = FixedProbe {
            cpu: 12.5,
            memory: 4096,
        };
        let a = probe.sample("x", 1);
        let b = probe.sample("x", 1);
        assert_eq!(a.cpu, b.cpu);
        assert_eq!(a.memory, 4096);
    }
}
