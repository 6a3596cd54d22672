//! Process definition and runtime view types for the Gemstone supervisor
//!
//! A [`StartRequest`] is what a client submits; the registry assigns an id
//! and turns it into a durable [`ProcessDefinition`]. A [`ProcessInfo`] is
//! the read-side projection of one managed process: the definition plus its
//! current runtime state and, when the process is live, a few opportunistic
//! resource fields.
//!
//! ## Lifecycle
//!
//! A managed process moves through the following states:
//! - `Stopped`: not running (newly created or after a clean exit)
//! - `Starting`: child is being spawned
//! - `Running`: child is alive
//! - `Stopping`: SIGTERM sent, waiting for the child to be reaped
//! - `Restarting`: unsolicited exit observed, restart scheduled
//! - `Errored`: spawn or credential failure; requires an explicit start

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current status of a managed process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Process is not running
    Stopped,
    /// Child is being spawned
    Starting,
    /// Child is alive
    Running,
    /// Graceful termination in progress
    Stopping,
    /// Automatic restart scheduled after an unsolicited exit
    Restarting,
    /// Spawn or credential failure; refuses automatic transitions
    Errored,
}

impl ProcessStatus {
    /// Whether a live OS process is expected to exist
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    /// Whether the process is between stable states
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Stopping | ProcessStatus::Restarting
        )
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Restarting => "restarting",
            ProcessStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Request to create and start a new managed process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StartRequest {
    /// Human-chosen name, unique across the registry
    pub name: String,
    /// Command to execute
    pub command: String,
    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    /// Environment variables merged over the supervisor's own
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Start this process when the supervisor boots
    #[serde(default)]
    pub auto_start: bool,
    /// Restart this process after an unsolicited exit
    #[serde(default)]
    pub auto_restart: bool,
    /// Upper bound on automatic restarts within a supervisor session
    #[serde(default)]
    pub max_restarts: u32,
    /// Run the child as this user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Run the child with this group (requires `user`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Durable definition of a managed process, persisted in `processes.json`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProcessDefinition {
    /// Opaque identifier assigned at creation
    pub id: String,
    /// Human-chosen name, unique across the registry
    pub name: String,
    /// Command to execute
    pub command: String,
    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    /// Environment variables merged over the supervisor's own
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Start this process when the supervisor boots
    #[serde(default)]
    pub auto_start: bool,
    /// Restart this process after an unsolicited exit
    #[serde(default)]
    pub auto_restart: bool,
    /// Upper bound on automatic restarts within a supervisor session
    #[serde(default)]
    pub max_restarts: u32,
    /// Run the child as this user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Run the child with this group (requires `user`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl ProcessDefinition {
    /// Build a definition from a start request and a freshly assigned id
    pub fn from_request(id: impl Into<String>, req: StartRequest) -> Self {
        Self {
            id: id.into(),
            name: req.name,
            command: req.command,
            args: req.args,
            work_dir: req.work_dir,
            env: req.env,
            auto_start: req.auto_start,
            auto_restart: req.auto_restart,
            max_restarts: req.max_restarts,
            user: req.user,
            group: req.group,
        }
    }
}

/// Read-side projection of one managed process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProcessInfo {
    /// Opaque identifier
    pub id: String,
    /// Human-chosen name
    pub name: String,
    /// Current status
    pub status: ProcessStatus,
    /// OS pid, present while the child is live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Command to execute
    pub command: String,
    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    /// Environment variables merged over the supervisor's own
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Start on supervisor boot
    pub auto_start: bool,
    /// Restart after unsolicited exits
    pub auto_restart: bool,
    /// Upper bound on automatic restarts
    pub max_restarts: u32,
    /// Automatic restarts performed this session
    pub restart_count: u32,
    /// Child runs as this user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Child runs with this group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// When the definition was created
    pub created_at: DateTime<Utc>,
    /// Last transition into Running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Last observed exit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Seconds since `started_at`, present while Running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<i64>,
    /// CPU percentage, present when a live pid could be probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    /// Resident set size in bytes, present when a live pid could be probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    /// Share of host memory, present when a live pid could be probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
}

/// Which log file a read targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// The child's stdout stream
    Stdout,
    /// The child's stderr stream
    Stderr,
    /// Both streams interleaved with `[OUT]`/`[ERR]` tags
    Combined,
}

impl LogKind {
    /// File name for this stream under the per-process log directory
    pub fn file_name(&self) -> &'static str {
        match self {
            LogKind::Stdout => "stdout.log",
            LogKind::Stderr => "stderr.log",
            LogKind::Combined => "combined.log",
        }
    }

    /// Parse the `type` query parameter; anything unrecognized means combined
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("stdout") => LogKind::Stdout,
            Some("stderr") => LogKind::Stderr,
            _ => LogKind::Combined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ProcessStatus::Restarting).unwrap();
        assert_eq!(json, "\"restarting\"");
        let back: ProcessStatus = serde_json::from_str("\"errored\"").unwrap();
        assert_eq!(back, ProcessStatus::Errored);
    }

    #[test]
    fn definition_round_trip() {
        let def = ProcessDefinition::from_request(
            "a1b2c3d4",
            StartRequest {
                name: "web".into(),
                command: "/usr/bin/python3".into(),
                args: vec!["-m".into(), "http.server".into()],
                work_dir: Some("/srv/web".into()),
                env: [("PORT".to_string(), "8000".to_string())].into(),
                auto_start: true,
                auto_restart: true,
                max_restarts: 5,
                user: None,
                group: None,
            },
        );

        let json = serde_json::to_string_pretty(&def).unwrap();
        let back: ProcessDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
        // wire names stay snake_case
        assert!(json.contains("\"auto_restart\": true"));
        assert!(json.contains("\"max_restarts\": 5"));
        assert!(!json.contains("user"));
    }

    #[test]
    fn start_request_defaults() {
        let req: StartRequest =
            serde_json::from_str(r#"{"name":"echo","command":"/bin/echo"}"#).unwrap();
        assert!(req.args.is_empty());
        assert!(req.env.is_empty());
        assert!(!req.auto_start);
        assert!(!req.auto_restart);
        assert_eq!(req.max_restarts, 0);
    }

    #[test]
    fn log_kind_from_query() {
        assert_eq!(LogKind::from_query(Some("stdout")), LogKind::Stdout);
        assert_eq!(LogKind::from_query(Some("stderr")), LogKind::Stderr);
        assert_eq!(LogKind::from_query(Some("bogus")), LogKind::Combined);
        assert_eq!(LogKind::from_query(None), LogKind::Combined);
    }
}
