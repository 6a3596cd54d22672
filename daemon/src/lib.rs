//! Daemon library for the Gemstone supervisor
//!
//! Hosts the boot sequencer ([`bootstrap::Daemon`]) and the HTTP
//! control-plane adapter ([`http::ApiServer`]). The engine itself lives in
//! `gemstone-core`; this crate only wires it to the outside world.

pub mod bootstrap;
pub mod error;
pub mod http;

pub use bootstrap::Daemon;
pub use error::{DaemonError, Result};
pub use http::ApiServer;
