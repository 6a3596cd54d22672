//! CLI library for the Gemstone supervisor
//!
//! A thin HTTP client over the daemon's `/api/v1` control plane plus the
//! formatting helpers the `gem` binary uses.

pub mod error;

pub use error::{CliError, Result};

use hyper::client::HttpConnector;
use hyper::header::AUTHORIZATION;
use hyper::{Body, Method, Request};
use schema::{ApiResponse, ProcessInfo, ProcessStats, StartRequest};

/// HTTP client for the daemon control plane
pub struct Client {
    base: String,
    auth_token: Option<String>,
    http: hyper::Client<HttpConnector>,
}

impl Client {
    /// Create a client for `host:port` with an optional bearer token
    pub fn new(host: &str, port: u16, auth_token: Option<String>) -> Self {
        Self {
            base: format!("http://{host}:{port}/api/v1"),
            auth_token,
            http: hyper::Client::new(),
        }
    }

    async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<ApiResponse> {
        let uri = format!("{}{}", self.base, path);
        let mut builder = Request::builder().method(method).uri(&uri);
        if let Some(token) = &self.auth_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .map_err(|e| CliError::InvalidArgument(e.to_string()))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| CliError::ConnectionFailed(format!("{uri}: {e}")))?;

        let bytes = hyper::body::to_bytes(response.into_body()).await?;
        let envelope: ApiResponse = serde_json::from_slice(&bytes)
            .map_err(|e| CliError::DaemonError(format!("unreadable response: {e}")))?;

        if envelope.success {
            Ok(envelope)
        } else {
            Err(CliError::DaemonError(
                envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request(Method::GET, path, None).await
    }

    /// Check daemon liveness
    pub async fn health(&self) -> Result<()> {
        self.get("/health").await?;
        Ok(())
    }

    /// Daemon summary plus a fresh host sample
    pub async fn system(&self) -> Result<serde_json::Value> {
        let resp = self.get("/system").await?;
        resp.data
            .ok_or_else(|| CliError::DaemonError("empty response".to_string()))
    }

    /// All managed processes
    pub async fn list(&self) -> Result<Vec<ProcessInfo>> {
        let resp = self.get("/processes").await?;
        let data = resp
            .data
            .ok_or_else(|| CliError::DaemonError("empty response".to_string()))?;
        serde_json::from_value(data)
            .map_err(|e| CliError::DaemonError(format!("unreadable process list: {e}")))
    }

    /// One managed process
    pub async fn get_process(&self, target: &str) -> Result<ProcessInfo> {
        let resp = self.get(&format!("/processes/{target}")).await?;
        let data = resp
            .data
            .ok_or_else(|| CliError::DaemonError("empty response".to_string()))?;
        serde_json::from_value(data)
            .map_err(|e| CliError::DaemonError(format!("unreadable process info: {e}")))
    }

    /// Create and start a process
    pub async fn start(&self, request: &StartRequest) -> Result<ProcessInfo> {
        let body = serde_json::to_vec(request)
            .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
        let resp = self.request(Method::POST, "/processes", Some(body)).await?;
        let data = resp
            .data
            .ok_or_else(|| CliError::DaemonError("empty response".to_string()))?;
        serde_json::from_value(data)
            .map_err(|e| CliError::DaemonError(format!("unreadable process info: {e}")))
    }

    /// Stop a process
    pub async fn stop(&self, target: &str) -> Result<String> {
        let resp = self
            .request(Method::POST, &format!("/processes/{target}/stop"), None)
            .await?;
        Ok(resp.message.unwrap_or_else(|| "stopped".to_string()))
    }

    /// Restart a process
    pub async fn restart(&self, target: &str) -> Result<String> {
        let resp = self
            .request(Method::POST, &format!("/processes/{target}/restart"), None)
            .await?;
        Ok(resp.message.unwrap_or_else(|| "restarted".to_string()))
    }

    /// Delete a process
    pub async fn delete(&self, target: &str) -> Result<String> {
        let resp = self
            .request(Method::DELETE, &format!("/processes/{target}"), None)
            .await?;
        Ok(resp.message.unwrap_or_else(|| "deleted".to_string()))
    }

    /// Fresh resource samples for every running process.
    ///
    /// Lists the registry first, then fetches stats per running entry; a
    /// process that stops between the two calls is silently skipped.
    pub async fn all_stats(&self) -> Result<Vec<ProcessStats>> {
        let processes = self.list().await?;

        let mut stats = Vec::new();
        for process in processes {
            if !process.status.is_running() {
                continue;
            }
            let resp = match self.get(&format!("/processes/{}/stats", process.id)).await {
                Ok(resp) => resp,
                Err(_) => continue,
            };
            let Some(data) = resp.data else {
                continue;
            };
            if let Ok(sample) = serde_json::from_value(data) {
                stats.push(sample);
            }
        }
        Ok(stats)
    }

    /// Tail a process's logs
    pub async fn logs(&self, target: &str, lines: usize, kind: Option<&str>) -> Result<Vec<String>> {
        let mut path = format!("/processes/{target}/logs?lines={lines}");
        if let Some(kind) = kind {
            path.push_str(&format!("&type={kind}"));
        }
        let resp = self.get(&path).await?;
        let data = resp
            .data
            .ok_or_else(|| CliError::DaemonError("empty response".to_string()))?;
        serde_json::from_value(data)
            .map_err(|e| CliError::DaemonError(format!("unreadable logs: {e}")))
    }
}

/// Render a process list as an aligned table
pub fn format_process_table(processes: &[ProcessInfo]) -> String {
    let mut out = format!(
        "{:<10} {:<20} {:<12} {:>8} {:>10} {:>9}\n",
        "ID", "NAME", "STATUS", "PID", "UPTIME", "RESTARTS"
    );
    for p in processes {
        out.push_str(&format!(
            "{:<10} {:<20} {:<12} {:>8} {:>10} {:>9}\n",
            p.id,
            p.name,
            p.status.to_string(),
            p.pid.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
            p.uptime
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            p.restart_count,
        ));
    }
    out
}

/// Render per-process resource samples as an aligned table
pub fn format_stats_table(stats: &[ProcessStats]) -> String {
    let mut out = format!(
        "{:<10} {:>8} {:>7} {:>9} {:>8} {:>6} {:>9} {:>9}\n",
        "ID", "PID", "CPU", "MEMORY", "THREADS", "FDS", "READ", "WRITE"
    );
    for s in stats {
        out.push_str(&format!(
            "{:<10} {:>8} {:>6.1}% {:>9} {:>8} {:>6} {:>9} {:>9}\n",
            s.id,
            s.pid,
            s.cpu,
            format_bytes(s.memory),
            s.num_threads,
            s.num_fds,
            format_bytes(s.read_bytes),
            format_bytes(s.write_bytes),
        ));
    }
    out
}

/// Render a byte count as `512B`, `1.5K`, `20.0M`, or `3.1G`
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}

/// Render a second count as `3d4h`, `2h5m`, `4m2s`, or `12s`
pub fn format_duration(seconds: i64) -> String {
    let (days, rem) = (seconds / 86_400, seconds % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, secs) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{days}d{hours}h")
    } else if hours > 0 {
        format!("{hours}h{minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::ProcessStatus;

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1536), "1.5K");
        assert_eq!(format_bytes(20 * 1024 * 1024), "20.0M");
        assert_eq!(format_bytes(3_328_599_655), "3.1G");
    }

    #[test]
    fn stats_table_lists_running_samples() {
        let sample = ProcessStats {
            cpu: 12.3,
            memory: 2048,
            num_threads: 4,
            num_fds: 16,
            ..ProcessStats::empty("aabbccdd", 4242)
        };
        let table = format_stats_table(&[sample]);
        let mut lines = table.lines();
        let header = lines.next().unwrap();
        assert!(header.contains("THREADS"));
        let row = lines.next().unwrap();
        assert!(row.contains("aabbccdd"));
        assert!(row.contains("4242"));
        assert!(row.contains("12.3%"));
        assert!(row.contains("2.0K"));
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(12), "12s");
        assert_eq!(format_duration(242), "4m2s");
        assert_eq!(format_duration(7500), "2h5m");
        assert_eq!(format_duration(273_600), "3d4h");
    }

    #[test]
    fn table_includes_placeholders_for_stopped() {
        let info = ProcessInfo {
            id: "aabbccdd".into(),
            name: "web".into(),
            status: ProcessStatus::Stopped,
            pid: None,
            command: "/bin/true".into(),
            args: vec![],
            work_dir: None,
            env: Default::default(),
            auto_start: false,
            auto_restart: false,
            max_restarts: 0,
            restart_count: 0,
            user: None,
            group: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            stopped_at: None,
            uptime: None,
            cpu: None,
            memory: None,
            memory_percent: None,
        };
        let table = format_process_table(&[info]);
        assert!(table.contains("aabbccdd"));
        assert!(table.contains("stopped"));
        assert!(table.lines().nth(1).unwrap().contains('-'));
    }
}
