//! Per-process lifecycle state machine
//!
//! One [`ManagedProcess`] exists for every supervised child. It owns the
//! child's process group, its output logger, and a bounded ring of resource
//! samples. Three tasks run while a child is live: a stdout reader, a
//! stderr reader, and the reaper that waits for the exit and decides
//! whether to restart.
//!
//! Locking: a single read-write lock guards the runtime record. Nothing
//! holds it across a blocking syscall or an await; in particular the reaper
//! releases it before the restart backoff sleep.

use crate::logger::ProcessLogger;
use crate::probe::ResourceProbe;
use crate::process::unix;
use crate::ring::SampleRing;
use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use schema::{LogKind, ProcessDefinition, ProcessInfo, ProcessStats, ProcessStatus};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tracing::{info, warn};

/// Grace period between SIGTERM and SIGKILL on stop
pub const STOP_GRACE: Duration = Duration::from_secs(5);
/// Backoff before an automatic restart
const RESTART_DELAY: Duration = Duration::from_secs(1);
/// Restart polls for the prior child to be reaped at this cadence
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_POLL_ATTEMPTS: u32 = 10;

/// Ephemeral per-session state, guarded by the process lock
#[derive(Debug)]
struct Runtime {
    status: ProcessStatus,
    /// Valid only while status is Running or Stopping
    pid: u32,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    restart_count: u32,
}

/// One supervised child: definition, runtime state machine, output capture,
/// and resource history
pub struct ManagedProcess {
    definition: ProcessDefinition,
    created_at: DateTime<Utc>,
    runtime: RwLock<Runtime>,
    logger: Arc<ProcessLogger>,
    samples: Mutex<SampleRing<ProcessStats>>,
    probe: Arc<dyn ResourceProbe>,
}

impl ManagedProcess {
    /// Create a managed process in the `Stopped` state.
    ///
    /// Opens the per-process log directory; the child is not started.
    pub fn new(
        definition: ProcessDefinition,
        log_root: impl AsRef<Path>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self> {
        let logger = ProcessLogger::new(&definition.id, &definition.name, log_root)?;

        Ok(Self {
            definition,
            created_at: Utc::now(),
            runtime: RwLock::new(Runtime {
                status: ProcessStatus::Stopped,
                pid: 0,
                started_at: None,
                stopped_at: None,
                restart_count: 0,
            }),
            logger: Arc::new(logger),
            samples: Mutex::new(SampleRing::default()),
            probe,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Runtime> {
        self.runtime.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Runtime> {
        self.runtime.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifier assigned at creation
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// Human-chosen name
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The durable definition
    pub fn definition(&self) -> &ProcessDefinition {
        &self.definition
    }

    /// Current lifecycle status
    pub fn status(&self) -> ProcessStatus {
        self.read().status
    }

    /// Whether this process wants to be started on supervisor boot
    pub fn should_auto_start(&self) -> bool {
        self.definition.auto_start
    }

    /// Start the child.
    ///
    /// Rejected with `InvalidState` while a child is live or being spawned.
    /// Spawn and credential failures transition to `Errored` and surface
    /// the underlying error. On success the stdout/stderr readers and the
    /// reaper are spawned and the status is `Running`.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut rt = self.write();
            match rt.status {
                ProcessStatus::Running
                | ProcessStatus::Starting
                | ProcessStatus::Stopping => {
                    return Err(CoreError::InvalidState(format!(
                        "process {} is already running",
                        self.definition.name
                    )));
                }
                _ => {}
            }
            rt.status = ProcessStatus::Starting;
        }

        let mut child = match unix::spawn_child(&self.definition) {
            Ok(child) => child,
            Err(e) => {
                self.write().status = ProcessStatus::Errored;
                return Err(e);
            }
        };

        let Some(pid) = child.id() else {
            self.write().status = ProcessStatus::Errored;
            return Err(CoreError::OsResource(
                "spawned child did not report a pid".to_string(),
            ));
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        {
            let mut rt = self.write();
            rt.pid = pid;
            rt.status = ProcessStatus::Running;
            rt.started_at = Some(Utc::now());
            rt.stopped_at = None;
        }

        info!("started process '{}' (pid {})", self.definition.name, pid);

        if let Some(stream) = stdout {
            tokio::spawn(forward_lines(
                Arc::clone(&self.logger),
                stream,
                LogKind::Stdout,
            ));
        }
        if let Some(stream) = stderr {
            tokio::spawn(forward_lines(
                Arc::clone(&self.logger),
                stream,
                LogKind::Stderr,
            ));
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.reap(child).await });

        Ok(())
    }

    /// Request graceful termination.
    ///
    /// Requires status `Running`. Sets `Stopping` before the signal goes out
    /// (the reaper reads the status to tell a user stop from a crash), sends
    /// SIGTERM to the process group, schedules the SIGKILL escalation, and
    /// returns immediately. The reaper finalizes the state.
    pub fn stop(self: &Arc<Self>) -> Result<()> {
        let pid = {
            let mut rt = self.write();
            if rt.status != ProcessStatus::Running {
                return Err(CoreError::InvalidState(format!(
                    "process {} is not running",
                    self.definition.name
                )));
            }
            rt.status = ProcessStatus::Stopping;
            rt.pid
        };

        info!("stopping process '{}' (pid {})", self.definition.name, pid);
        let sent = unix::signal_group(pid, Signal::SIGTERM);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE).await;
            if this.read().status == ProcessStatus::Stopping {
                warn!(
                    "process '{}' still stopping after {:?}, sending SIGKILL to group {}",
                    this.definition.name, STOP_GRACE, pid
                );
                let _ = unix::signal_group(pid, Signal::SIGKILL);
            }
        });

        sent
    }

    /// Stop (when running) and start again.
    ///
    /// A restart issued while an automatic restart is already in flight is
    /// a no-op success. After a stop, the prior child is polled for up to
    /// five seconds; if it still has not been reaped the start proceeds
    /// anyway, matching the supervisor's historical behavior.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        match self.read().status {
            ProcessStatus::Restarting => return Ok(()),
            ProcessStatus::Running => {}
            _ => return self.start(),
        }

        self.stop()?;
        for _ in 0..STOP_POLL_ATTEMPTS {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
            if self.read().status == ProcessStatus::Stopped {
                break;
            }
        }
        self.start()
    }

    /// Wait for the child to exit, record the exit, and decide on restart.
    async fn reap(self: Arc<Self>, mut child: Child) {
        let status = child.wait().await;

        match &status {
            Ok(exit) if !exit.success() => {
                self.logger.log(
                    LogKind::Stderr,
                    &format!("Process exited with error: {exit}"),
                );
            }
            Err(e) => {
                self.logger
                    .log(LogKind::Stderr, &format!("Process wait failed: {e}"));
            }
            _ => {}
        }

        let restart = {
            let mut rt = self.write();
            rt.pid = 0;
            rt.stopped_at = Some(Utc::now());

            // Status still Running means nobody asked for this exit: stop()
            // moves to Stopping before the signal is ever sent.
            let unsolicited = rt.status == ProcessStatus::Running;
            if self.definition.auto_restart
                && unsolicited
                && rt.restart_count < self.definition.max_restarts
            {
                rt.restart_count += 1;
                rt.status = ProcessStatus::Restarting;
                true
            } else {
                rt.status = ProcessStatus::Stopped;
                false
            }
        };

        if restart {
            info!(
                "process '{}' exited, restarting ({}/{})",
                self.definition.name,
                self.read().restart_count,
                self.definition.max_restarts
            );
            // Lock is released; the backoff and re-start re-enter it.
            tokio::time::sleep(RESTART_DELAY).await;
            if let Err(e) = self.start() {
                warn!(
                    "automatic restart of '{}' failed: {}",
                    self.definition.name, e
                );
            }
        }
    }

    /// Read-side projection: definition plus runtime state, with uptime
    /// while running and opportunistic probe fields while a pid is live
    pub fn info(&self) -> ProcessInfo {
        let (status, pid, started_at, stopped_at, restart_count) = {
            let rt = self.read();
            (
                rt.status,
                rt.pid,
                rt.started_at,
                rt.stopped_at,
                rt.restart_count,
            )
        };

        let def = &self.definition;
        let mut info = ProcessInfo {
            id: def.id.clone(),
            name: def.name.clone(),
            status,
            pid: (pid > 0).then_some(pid),
            command: def.command.clone(),
            args: def.args.clone(),
            work_dir: def.work_dir.clone(),
            env: def.env.clone(),
            auto_start: def.auto_start,
            auto_restart: def.auto_restart,
            max_restarts: def.max_restarts,
            restart_count,
            user: def.user.clone(),
            group: def.group.clone(),
            created_at: self.created_at,
            started_at,
            stopped_at,
            uptime: None,
            cpu: None,
            memory: None,
            memory_percent: None,
        };

        if status == ProcessStatus::Running {
            if let Some(started) = started_at {
                info.uptime = Some((Utc::now() - started).num_seconds());
            }
        }

        if pid > 0 {
            let sample = self.probe.sample(&def.id, pid);
            info.cpu = Some(sample.cpu);
            info.memory = Some(sample.memory);
            info.memory_percent = Some(sample.memory_percent);
        }

        info
    }

    /// Fresh resource sample; `None` unless the child is running
    pub fn stats(&self) -> Option<ProcessStats> {
        let pid = {
            let rt = self.read();
            if rt.status != ProcessStatus::Running || rt.pid == 0 {
                return None;
            }
            rt.pid
        };
        Some(self.probe.sample(&self.definition.id, pid))
    }

    /// Take a sample and append it to the history ring (stats collector
    /// entry point)
    pub fn collect_stats(&self) {
        if let Some(sample) = self.stats() {
            self.samples
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(sample);
        }
    }

    /// The newest `limit` historical samples, oldest first (all when zero)
    pub fn stats_history(&self, limit: usize) -> Vec<ProcessStats> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tail(limit)
    }

    /// Tail the requested log file
    pub fn logs(&self, lines: usize, kind: LogKind) -> Result<Vec<String>> {
        self.logger.tail(kind, lines)
    }

    /// Rotate this process's log files past `max_mb` megabytes
    pub fn rotate_logs(&self, max_mb: u64) -> Result<()> {
        self.logger.rotate(max_mb)
    }

    /// Release the output logger. Idempotent; late reader or reaper writes
    /// become no-ops.
    pub fn close(&self) {
        self.logger.close();
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("id", &self.definition.id)
            .field("name", &self.definition.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Forward lines from a child pipe into the logger until EOF
async fn forward_lines<R>(logger: Arc<ProcessLogger>, stream: R, kind: LogKind)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => logger.log(kind, &line),
            Ok(None) => break,
            Err(_) => break,
        }
    }
}
