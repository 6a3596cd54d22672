//! Per-process output capture
//!
//! Each managed process owns one [`ProcessLogger`] writing three append-only
//! files under `<log_root>/<name>-<id>/`: `stdout.log`, `stderr.log`, and
//! `combined.log` (both streams interleaved with `[OUT]`/`[ERR]` tags).
//! Every line is prefixed with a millisecond timestamp taken at the call
//! site.
//!
//! Write errors are swallowed: capturing a child's output must never bring
//! down the supervisor. Rotation errors are surfaced to the caller.

use crate::{CoreError, Result};
use chrono::Local;
use schema::LogKind;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Timestamp format used for log-line prefixes and rotated file suffixes
const LINE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.3f";
const ROTATE_TIMESTAMP: &str = "%Y%m%d-%H%M%S";

struct LogFiles {
    stdout: File,
    stderr: File,
    combined: File,
}

/// Append-only log sink for one managed process
#[derive(Debug)]
pub struct ProcessLogger {
    dir: PathBuf,
    files: Mutex<Option<LogFiles>>,
}

impl std::fmt::Debug for LogFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFiles").finish_non_exhaustive()
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl ProcessLogger {
    /// Create the per-process log directory and open all three files
    pub fn new(id: &str, name: &str, log_root: impl AsRef<Path>) -> Result<Self> {
        let dir = log_root.as_ref().join(format!("{name}-{id}"));
        std::fs::create_dir_all(&dir)?;

        let files = LogFiles {
            stdout: open_append(&dir.join(LogKind::Stdout.file_name()))?,
            stderr: open_append(&dir.join(LogKind::Stderr.file_name()))?,
            combined: open_append(&dir.join(LogKind::Combined.file_name()))?,
        };

        Ok(Self {
            dir,
            files: Mutex::new(Some(files)),
        })
    }

    /// Directory holding this process's log files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one line to the per-stream file and the combined file.
    ///
    /// `kind` must be `Stdout` or `Stderr`; a `Combined` kind is ignored
    /// since that file only ever receives tagged copies. Errors are
    /// swallowed, and writes after `close()` are no-ops.
    pub fn log(&self, kind: LogKind, line: &str) {
        let timestamp = Local::now().format(LINE_TIMESTAMP);

        let mut guard = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let Some(files) = guard.as_mut() else {
            return;
        };

        let (stream, tag) = match kind {
            LogKind::Stdout => (&mut files.stdout, "[OUT]"),
            LogKind::Stderr => (&mut files.stderr, "[ERR]"),
            LogKind::Combined => return,
        };

        let _ = writeln!(stream, "[{timestamp}] {line}");
        let _ = writeln!(files.combined, "[{timestamp}] {tag} {line}");
    }

    /// Return the last `n` lines of the requested file, or all lines if
    /// fewer exist. A missing file yields an empty vector, not an error.
    pub fn tail(&self, kind: LogKind, n: usize) -> Result<Vec<String>> {
        let path = self.dir.join(kind.file_name());
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::Io(e)),
        };

        // A writer may be mid-line; lines() simply yields the partial tail.
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            match line {
                Ok(l) => lines.push(l),
                Err(_) => break,
            }
        }

        if n > 0 && n < lines.len() {
            lines.drain(..lines.len() - n);
        }
        Ok(lines)
    }

    /// Rotate any of the three files whose on-disk size exceeds
    /// `max_mb * 2^20` bytes: rename the current file to
    /// `<name>.<YYYYMMDD-HHMMSS>` and reopen a fresh one.
    pub fn rotate(&self, max_mb: u64) -> Result<()> {
        let max_size = max_mb * 1024 * 1024;

        let mut guard = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let Some(files) = guard.as_mut() else {
            return Ok(());
        };

        for kind in [LogKind::Stdout, LogKind::Stderr, LogKind::Combined] {
            let path = self.dir.join(kind.file_name());
            let size = match std::fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };
            if size <= max_size {
                continue;
            }

            let rotated = self.dir.join(format!(
                "{}.{}",
                kind.file_name(),
                Local::now().format(ROTATE_TIMESTAMP)
            ));
            std::fs::rename(&path, &rotated)?;
            debug!("rotated {} to {}", path.display(), rotated.display());

            let fresh = open_append(&path)?;
            match kind {
                LogKind::Stdout => files.stdout = fresh,
                LogKind::Stderr => files.stderr = fresh,
                LogKind::Combined => files.combined = fresh,
            }
        }

        Ok(())
    }

    /// Flush and release all file handles. Idempotent.
    pub fn close(&self) {
        let mut guard = self.files.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut files) = guard.take() {
            let _ = files.stdout.flush();
            let _ = files.stderr.flush();
            let _ = files.combined.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_logger(root: &Path) -> ProcessLogger {
        ProcessLogger::new("abcd1234", "svc", root).expect("logger should open")
    }

    #[test]
    fn writes_land_in_stream_and_combined() {
        let dir = tempdir().unwrap();
        let logger = make_logger(dir.path());

        logger.log(LogKind::Stdout, "hello out");
        logger.log(LogKind::Stderr, "hello err");

        let out = logger.tail(LogKind::Stdout, 0).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].ends_with("hello out"));
        assert!(out[0].starts_with('['));

        let combined = logger.tail(LogKind::Combined, 0).unwrap();
        assert_eq!(combined.len(), 2);
        assert!(combined.iter().any(|l| l.contains("[OUT] hello out")));
        assert!(combined.iter().any(|l| l.contains("[ERR] hello err")));
    }

    #[test]
    fn tail_limits_and_missing_file() {
        let dir = tempdir().unwrap();
        let logger = make_logger(dir.path());

        for i in 0..10 {
            logger.log(LogKind::Stdout, &format!("line {i}"));
        }

        let last3 = logger.tail(LogKind::Stdout, 3).unwrap();
        assert_eq!(last3.len(), 3);
        assert!(last3[2].ends_with("line 9"));

        // stderr.log exists but is empty; a removed file is also fine
        std::fs::remove_file(logger.dir().join("stderr.log")).unwrap();
        assert!(logger.tail(LogKind::Stderr, 5).unwrap().is_empty());
    }

    #[test]
    fn rotate_moves_oversized_files_once() {
        let dir = tempdir().unwrap();
        let logger = make_logger(dir.path());

        for i in 0..100 {
            logger.log(LogKind::Stdout, &format!("payload line {i}"));
        }
        let before = logger.tail(LogKind::Stdout, 0).unwrap();

        // max of zero MB: everything non-empty rotates
        logger.rotate(0).unwrap();

        let rotated: Vec<_> = std::fs::read_dir(logger.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("stdout.log."))
            .collect();
        assert_eq!(rotated.len(), 1, "exactly one rotated sibling");

        // active file is fresh and writable
        assert!(logger.tail(LogKind::Stdout, 0).unwrap().is_empty());
        logger.log(LogKind::Stdout, "after rotation");
        let after = logger.tail(LogKind::Stdout, 0).unwrap();
        assert_eq!(after.len(), 1);

        // pre-rotation content survives in the rotated sibling
        let rotated_content =
            std::fs::read_to_string(logger.dir().join(&rotated[0])).unwrap();
        assert_eq!(rotated_content.lines().count(), before.len());
    }

    #[test]
    fn close_is_idempotent_and_silences_writes() {
        let dir = tempdir().unwrap();
        let logger = make_logger(dir.path());

        logger.log(LogKind::Stdout, "before close");
        logger.close();
        logger.close();
        logger.log(LogKind::Stdout, "after close");

        let out = logger.tail(LogKind::Stdout, 0).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].ends_with("before close"));
    }

    #[test]
    fn rotate_after_close_is_a_no_op() {
        let dir = tempdir().unwrap();
        let logger = make_logger(dir.path());
        logger.log(LogKind::Stdout, "x");
        logger.close();
        assert!(logger.rotate(0).is_ok());
    }
}
