//! Daemon bootstrap: wire the registry, stats collector, and control plane
//!
//! Boot order: load configuration, restore the registry from disk, seed any
//! bootstrap definitions from the config file, reserve the Unix socket,
//! start auto-start processes, start the stats collector, then serve the
//! HTTP control plane until SIGINT or SIGTERM. Shutdown runs the reverse:
//! collector, control plane, then a best-effort stop of every child.

use crate::http::ApiServer;
use crate::{DaemonError, Result};
use gemstone_core::config::{self, Config};
use gemstone_core::probe::{SysinfoHostProbe, SysinfoProbe};
use gemstone_core::stats::DEFAULT_INTERVAL;
use gemstone_core::{Registry, StatsCollector};
use std::os::unix::fs::PermissionsExt as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cadence of the size-triggered log rotation sweep
const ROTATE_INTERVAL: Duration = Duration::from_secs(60);

/// The assembled gemstone daemon
pub struct Daemon {
    config: Config,
    registry: Arc<Registry>,
    collector: Arc<StatsCollector>,
    api: Arc<ApiServer>,
    socket_path: PathBuf,
}

impl Daemon {
    /// Load configuration and construct every component.
    ///
    /// Aborts on a malformed config file or an unreadable state file; the
    /// supervisor never starts from state it cannot trust.
    pub fn new() -> Result<Self> {
        let config = Config::load(config::config_path())?;

        let registry = Arc::new(Registry::new(
            config::data_dir(),
            config.log_dir(),
            Arc::new(SysinfoProbe::new()),
        )?);

        // Seed bootstrap definitions from the config file; existing names win.
        for definition in config.processes.clone() {
            let name = definition.name.clone();
            match registry.adopt(definition) {
                Ok(true) => debug!("seeded process '{}' from config", name),
                Ok(false) => debug!("process '{}' already known, config entry ignored", name),
                Err(e) => warn!("failed to seed process '{}': {}", name, e),
            }
        }

        let collector = Arc::new(StatsCollector::new(
            &registry,
            Arc::new(SysinfoHostProbe::new()),
            DEFAULT_INTERVAL,
        ));

        let api = Arc::new(ApiServer::new(
            config.api.clone(),
            Arc::clone(&registry),
            Arc::clone(&collector),
        ));

        Ok(Self {
            config,
            registry,
            collector,
            api,
            socket_path: config::socket_path(),
        })
    }

    /// Run until SIGINT/SIGTERM, then shut down gracefully
    pub async fn run(&self) -> Result<()> {
        self.reserve_socket()?;

        self.registry.start_auto_start_all();
        self.collector.start();
        self.spawn_rotation_sweep();

        let api_task: Option<JoinHandle<Result<()>>> = if self.config.api.enabled {
            let api = Arc::clone(&self.api);
            Some(tokio::spawn(async move { api.serve().await }))
        } else {
            warn!("API disabled by configuration; only signals control this daemon");
            None
        };

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let api_wait = async {
            match api_task {
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(DaemonError::Server(format!("API server task failed: {e}"))),
                },
                None => std::future::pending().await,
            }
        };
        tokio::pin!(api_wait);

        let outcome = tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                Ok(())
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                Ok(())
            }
            result = &mut api_wait => match result {
                Ok(()) => Err(DaemonError::Server("API server exited unexpectedly".to_string())),
                Err(e) => Err(e),
            },
        };

        self.shutdown();
        outcome
    }

    /// Stop the collector, drain the control plane, stop every child, and
    /// remove the reserved socket
    pub fn shutdown(&self) {
        self.collector.stop();
        self.api.stop();
        self.registry.stop_all();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove socket {}: {}", self.socket_path.display(), e);
            }
        }
        info!("shutdown complete");
    }

    /// Bind the reserved local IPC socket and drain its connections.
    ///
    /// The socket's presence marks a live supervisor; its protocol is
    /// unspecified, so accepted connections are simply dropped.
    fn reserve_socket(&self) -> Result<()> {
        if let Some(dir) = self.socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!("removed stale socket {}", self.socket_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DaemonError::Io(e)),
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| DaemonError::Server(format!("failed to bind socket: {e}")))?;

        // World-accessible so non-root clients can reach a root-owned daemon
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o666))
            .map_err(|e| DaemonError::Server(format!("failed to set socket permissions: {e}")))?;
        info!("reserved socket {}", self.socket_path.display());

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    // content unspecified: accept and drop
                    Ok((_stream, _addr)) => {}
                    Err(e) => {
                        debug!("socket accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    fn spawn_rotation_sweep(&self) {
        let registry = Arc::clone(&self.registry);
        let max_mb = self.config.logging.max_size;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ROTATE_INTERVAL);
            ticker.tick().await; // skip the immediate tick
            loop {
                ticker.tick().await;
                registry.rotate_all(max_mb);
            }
        });
    }

    /// Handle to the process registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("socket_path", &self.socket_path)
            .field("processes", &self.registry.count())
            .finish_non_exhaustive()
    }
}
