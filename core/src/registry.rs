//! Supervisor registry: the id/name → managed process map
//!
//! The registry enforces name uniqueness, serializes mutations under one
//! exclusive lock, persists the definition set to `processes.json` on every
//! mutation, and restores it on construction. Lookups take the shared lock
//! and delegate to the managed process after releasing it.
//!
//! Lock order is registry before process: registry code may take a process
//! lock, never the reverse.

use crate::probe::ResourceProbe;
use crate::process::ManagedProcess;
use crate::{CoreError, Result};
use schema::{LogKind, ProcessDefinition, ProcessInfo, ProcessStats, ProcessStatus, StartRequest};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// File under the data directory holding the persisted definitions
pub const STATE_FILE: &str = "processes.json";

/// Top-level container owning every managed process
pub struct Registry {
    processes: RwLock<HashMap<String, Arc<ManagedProcess>>>,
    data_dir: PathBuf,
    log_dir: PathBuf,
    probe: Arc<dyn ResourceProbe>,
}

impl Registry {
    /// Build a registry and restore persisted definitions from disk.
    ///
    /// Both directories are created if missing. A missing state file yields
    /// an empty registry; a malformed one is a [`CoreError::Persistence`]
    /// and fails boot. Restored processes are not started here.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&log_dir)?;

        let registry = Self {
            processes: RwLock::new(HashMap::new()),
            data_dir,
            log_dir,
            probe,
        };
        registry.restore()?;
        Ok(registry)
    }

    fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    fn restore(&self) -> Result<()> {
        let path = self.state_path();
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(CoreError::Persistence(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let definitions: Vec<ProcessDefinition> = serde_json::from_str(&data).map_err(|e| {
            CoreError::Persistence(format!("failed to parse {}: {}", path.display(), e))
        })?;

        let mut map = self.lock_write();
        for def in definitions {
            let name = def.name.clone();
            match ManagedProcess::new(def, &self.log_dir, Arc::clone(&self.probe)) {
                Ok(proc) => {
                    map.insert(proc.id().to_string(), Arc::new(proc));
                }
                Err(e) => {
                    warn!("failed to restore process '{}': {}", name, e);
                }
            }
        }
        info!("restored {} process definition(s)", map.len());
        Ok(())
    }

    fn lock_read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ManagedProcess>>> {
        self.processes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ManagedProcess>>> {
        self.processes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `id_or_name`: exact id match first, then name match
    fn resolve(
        map: &HashMap<String, Arc<ManagedProcess>>,
        id_or_name: &str,
    ) -> Option<Arc<ManagedProcess>> {
        if let Some(proc) = map.get(id_or_name) {
            return Some(Arc::clone(proc));
        }
        map.values()
            .find(|p| p.name() == id_or_name)
            .map(Arc::clone)
    }

    fn lookup(&self, id_or_name: &str) -> Result<Arc<ManagedProcess>> {
        Self::resolve(&self.lock_read(), id_or_name)
            .ok_or_else(|| CoreError::NotFound(id_or_name.to_string()))
    }

    /// Create a managed process from a start request and start it.
    ///
    /// Fails with `NameConflict` when the name is taken. When the start
    /// fails the entry is not inserted and nothing is persisted. A persist
    /// failure after a successful start is logged and swallowed; the
    /// in-memory registry remains authoritative.
    pub fn create(&self, request: StartRequest) -> Result<ProcessInfo> {
        let mut map = self.lock_write();

        if map.values().any(|p| p.name() == request.name) {
            return Err(CoreError::NameConflict(request.name));
        }

        let id = short_id();
        let definition = ProcessDefinition::from_request(id, request);
        let proc = Arc::new(ManagedProcess::new(
            definition,
            &self.log_dir,
            Arc::clone(&self.probe),
        )?);

        if let Err(e) = proc.start() {
            proc.close();
            return Err(e);
        }

        map.insert(proc.id().to_string(), Arc::clone(&proc));
        if let Err(e) = self.persist(&map) {
            warn!("failed to persist process definitions: {}", e);
        }

        Ok(proc.info())
    }

    /// Insert a definition without starting it (configuration bootstrap
    /// seeding). Returns false when the name is already taken.
    pub fn adopt(&self, definition: ProcessDefinition) -> Result<bool> {
        let mut map = self.lock_write();
        if map.values().any(|p| p.name() == definition.name) {
            return Ok(false);
        }

        let proc = Arc::new(ManagedProcess::new(
            definition,
            &self.log_dir,
            Arc::clone(&self.probe),
        )?);
        map.insert(proc.id().to_string(), proc);
        if let Err(e) = self.persist(&map) {
            warn!("failed to persist process definitions: {}", e);
        }
        Ok(true)
    }

    /// Stop a process by id or name
    pub fn stop(&self, id_or_name: &str) -> Result<()> {
        let proc = self.lookup(id_or_name)?;
        proc.stop()
    }

    /// Restart a process by id or name
    pub async fn restart(&self, id_or_name: &str) -> Result<()> {
        let proc = self.lookup(id_or_name)?;
        proc.restart().await
    }

    /// Delete a process: stop it when running, release its logger, remove
    /// it from the map, and persist. Does not wait for the reaper; the
    /// process lock discipline finalizes the exit independently.
    pub fn delete(&self, id_or_name: &str) -> Result<()> {
        let mut map = self.lock_write();
        let proc = Self::resolve(&map, id_or_name)
            .ok_or_else(|| CoreError::NotFound(id_or_name.to_string()))?;

        if proc.status() == ProcessStatus::Running {
            proc.stop()?;
        }
        proc.close();
        map.remove(proc.id());

        self.persist(&map)
            .map_err(|e| CoreError::Persistence(format!("failed to persist after delete: {e}")))
    }

    /// Info view for one process
    pub fn get(&self, id_or_name: &str) -> Option<ProcessInfo> {
        Self::resolve(&self.lock_read(), id_or_name).map(|p| p.info())
    }

    /// Info views for every process
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<_> = self.lock_read().values().map(|p| p.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Fresh sample for one process; `None` when unknown or not running
    pub fn stats(&self, id_or_name: &str) -> Option<ProcessStats> {
        Self::resolve(&self.lock_read(), id_or_name).and_then(|p| p.stats())
    }

    /// Sample history for one process; `None` when unknown
    pub fn stats_history(&self, id_or_name: &str, limit: usize) -> Option<Vec<ProcessStats>> {
        Self::resolve(&self.lock_read(), id_or_name).map(|p| p.stats_history(limit))
    }

    /// Tail one process's logs
    pub fn logs(&self, id_or_name: &str, lines: usize, kind: LogKind) -> Result<Vec<String>> {
        let proc = self.lookup(id_or_name)?;
        proc.logs(lines, kind)
    }

    /// One stats-collector tick: append a ring sample for every running
    /// process. Holds only the shared lock; per-process work proceeds under
    /// the per-process locks.
    pub fn sample_all(&self) {
        for proc in self.lock_read().values() {
            if proc.status() == ProcessStatus::Running {
                proc.collect_stats();
            }
        }
    }

    /// Start every stopped process flagged auto-start. Failures are logged,
    /// not fatal.
    pub fn start_auto_start_all(&self) {
        let to_start: Vec<_> = self
            .lock_read()
            .values()
            .filter(|p| p.should_auto_start() && p.status() == ProcessStatus::Stopped)
            .map(Arc::clone)
            .collect();

        for proc in to_start {
            if let Err(e) = proc.start() {
                warn!("failed to auto-start process '{}': {}", proc.name(), e);
            }
        }
    }

    /// Best-effort stop of every running process (shutdown path)
    pub fn stop_all(&self) {
        for proc in self.lock_read().values() {
            if proc.status() == ProcessStatus::Running {
                if let Err(e) = proc.stop() {
                    warn!("failed to stop process '{}': {}", proc.name(), e);
                }
            }
        }
    }

    /// Rotate every process's logs past `max_mb` megabytes; failures are
    /// logged and skipped
    pub fn rotate_all(&self, max_mb: u64) {
        for proc in self.lock_read().values() {
            if let Err(e) = proc.rotate_logs(max_mb) {
                warn!("failed to rotate logs for '{}': {}", proc.name(), e);
            }
        }
    }

    /// Number of managed processes
    pub fn count(&self) -> usize {
        self.lock_read().len()
    }

    /// Number of processes currently running
    pub fn running_count(&self) -> usize {
        self.lock_read()
            .values()
            .filter(|p| p.status() == ProcessStatus::Running)
            .count()
    }

    /// Write the full definition list to `processes.json` via
    /// write-to-temp plus rename, called with the map lock held
    fn persist(&self, map: &HashMap<String, Arc<ManagedProcess>>) -> Result<()> {
        let mut definitions: Vec<&ProcessDefinition> =
            map.values().map(|p| p.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));

        let json = serde_json::to_vec_pretty(&definitions)?;
        let path = self.state_path();
        let tmp = path.with_extension("json.tmp");

        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&json)?;
            file.flush()?;
            let _ = file.sync_all();
        }
        std::fs::rename(&tmp, &path)?;

        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("count", &self.count())
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

/// Assign a fresh opaque identifier (8 hex characters)
fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
