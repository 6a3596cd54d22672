//! Periodic statistics collection
//!
//! The collector drives two things on every tick: one host-wide sample into
//! its own ring, and a `sample_all` sweep over the registry so that every
//! running process appends to its per-process ring. The first tick fires
//! immediately after start, then every interval.
//!
//! The collector holds only a weak reference to the registry: it exists to
//! invoke it, not to keep it alive. When the registry is gone the ticker
//! stops itself.

use crate::probe::HostProbe;
use crate::registry::Registry;
use crate::ring::SampleRing;
use schema::SystemStats;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Default tick interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Periodic sampler for host and per-process statistics
pub struct StatsCollector {
    registry: Weak<Registry>,
    host: Arc<dyn HostProbe>,
    history: Mutex<SampleRing<SystemStats>>,
    interval: Duration,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl StatsCollector {
    /// Create a collector bound to `registry`, sampling the host through
    /// `host` every `interval`
    pub fn new(registry: &Arc<Registry>, host: Arc<dyn HostProbe>, interval: Duration) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            host,
            history: Mutex::new(SampleRing::default()),
            interval,
            shutdown: Mutex::new(None),
        }
    }

    /// Start the ticker. Idempotent: a second start while running is a
    /// no-op. The first tick fires immediately.
    pub fn start(self: &Arc<Self>) {
        {
            let mut guard = self
                .shutdown
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if guard.is_some() {
                debug!("stats collector already running");
                return;
            }
            let (tx, rx) = oneshot::channel();
            *guard = Some(tx);
            drop(guard);

            info!("starting stats collector (interval {:?})", self.interval);
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run(rx).await });
        }
    }

    /// Signal the ticker to terminate before its next tick. Idempotent; an
    /// in-flight tick completes.
    pub fn stop(&self) {
        if let Some(tx) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
    }

    /// Whether the ticker is currently running
    pub fn is_running(&self) -> bool {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn run(self: Arc<Self>, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.tick() {
                        break;
                    }
                }
                _ = &mut shutdown => break,
            }
        }
        *self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        debug!("stats collector stopped");
    }

    /// One collection pass; returns false once the registry is gone
    fn tick(&self) -> bool {
        let sample = self.host.sample();
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);

        match self.registry.upgrade() {
            Some(registry) => {
                registry.sample_all();
                true
            }
            None => {
                debug!("registry dropped, stats collector exiting");
                false
            }
        }
    }

    /// Take a fresh host sample (not appended to the history)
    pub fn current(&self) -> SystemStats {
        self.host.sample()
    }

    /// The newest `limit` host samples, oldest first (all when zero)
    pub fn history(&self, limit: usize) -> Vec<SystemStats> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tail(limit)
    }
}

impl std::fmt::Debug for StatsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsCollector")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{FixedHostProbe, FixedProbe};
    use tempfile::tempdir;

    fn make_registry(root: &std::path::Path) -> Arc<Registry> {
        Arc::new(
            Registry::new(
                root.join("data"),
                root.join("log"),
                Arc::new(FixedProbe::default()),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn initial_tick_fires_immediately() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());
        let collector = Arc::new(StatsCollector::new(
            &registry,
            Arc::new(FixedHostProbe { cpu_percent: 7.0 }),
            Duration::from_secs(60),
        ));

        collector.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let history = collector.history(0);
        assert_eq!(history.len(), 1, "one immediate tick, none since");
        assert_eq!(history[0].cpu_percent, 7.0);

        collector.stop();
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());
        let collector = Arc::new(StatsCollector::new(
            &registry,
            Arc::new(FixedHostProbe::default()),
            Duration::from_secs(60),
        ));

        collector.start();
        collector.start();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // a second running ticker would have produced a second sample
        assert_eq!(collector.history(0).len(), 1);
        collector.stop();
    }

    #[tokio::test]
    async fn stop_halts_ticking_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());
        let collector = Arc::new(StatsCollector::new(
            &registry,
            Arc::new(FixedHostProbe::default()),
            Duration::from_millis(50),
        ));

        collector.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        collector.stop();
        collector.stop();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let frozen = collector.history(0).len();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(collector.history(0).len(), frozen);
        assert!(!collector.is_running());
    }

    #[tokio::test]
    async fn ticker_exits_when_registry_drops() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());
        let collector = Arc::new(StatsCollector::new(
            &registry,
            Arc::new(FixedHostProbe::default()),
            Duration::from_millis(30),
        ));

        collector.start();
        drop(registry);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(!collector.is_running());
    }

    #[tokio::test]
    async fn restart_after_stop_works() {
        let dir = tempdir().unwrap();
        let registry = make_registry(dir.path());
        let collector = Arc::new(StatsCollector::new(
            &registry,
            Arc::new(FixedHostProbe::default()),
            Duration::from_secs(60),
        ));

        collector.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        collector.stop();
        tokio::time::sleep(Duration::from_millis(80)).await;

        collector.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(collector.history(0).len(), 2);
        collector.stop();
    }
}
