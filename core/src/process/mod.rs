//! Managed process lifecycle
//!
//! [`unix`] holds the OS-specific spawn and signalling primitives;
//! [`managed`] builds the per-process state machine on top of them.

#[cfg(unix)]
pub mod unix;

pub mod managed;

pub use managed::ManagedProcess;
