//! Core engine for the Gemstone supervisor
//!
//! This crate contains the supervisor engine proper: the registry of
//! managed processes, the per-process lifecycle state machine, output
//! capture, resource probing, and the periodic stats collector. The daemon
//! and CLI crates build on top of it.

pub mod config;
pub mod error;
pub mod logger;
pub mod probe;
pub mod process;
pub mod registry;
pub mod ring;
pub mod stats;

// Re-export schema types for convenience
pub use schema::*;

pub use error::{CoreError, Result};
pub use process::ManagedProcess;
pub use registry::Registry;
pub use stats::StatsCollector;

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for a binary
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::Config(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
