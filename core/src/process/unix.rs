//! Unix child management: spawn into a fresh process group, signal the group
//!
//! Every child is placed in its own process group via `setpgid(0, 0)` in the
//! pre-exec hook, so that one signal to the negative pid reaches the child
//! and any descendants it did not detach. Signals are only ever sent to the
//! group; no code path signals an individual pid.

// Process group setup requires libc calls in the pre-exec hook
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use schema::ProcessDefinition;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Spawn the child described by `definition` in its own process group.
///
/// Arguments, environment (merged over the supervisor's own), and working
/// directory come from the definition. Stdout and stderr are piped for the
/// reader tasks. When `user` is set, the child's credentials are switched
/// before exec; a failed user or group lookup is a [`CoreError::Credential`].
pub fn spawn_child(definition: &ProcessDefinition) -> Result<Child> {
    debug!(
        "spawning process '{}': {} {:?}",
        definition.name, definition.command, definition.args
    );

    let mut command = Command::new(&definition.command);
    command
        .args(&definition.args)
        .envs(&definition.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(dir) = &definition.work_dir {
        command.current_dir(dir);
    }

    if let Some(user) = &definition.user {
        let (uid, gid) = resolve_credentials(user, definition.group.as_deref())?;
        command.uid(uid).gid(gid);
    }

    // The reaper owns the wait; the escalation path handles stragglers.
    command.kill_on_drop(false);

    // Safety: setpgid is async-signal-safe and appropriate for pre_exec.
    unsafe {
        command.pre_exec(|| {
            if libc::setpgid(0, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    command.spawn().map_err(|e| {
        CoreError::OsResource(format!("failed to spawn '{}': {}", definition.command, e))
    })
}

/// Resolve a user (and optional group) name to a uid/gid pair
fn resolve_credentials(user: &str, group: Option<&str>) -> Result<(u32, u32)> {
    let account = nix::unistd::User::from_name(user)
        .map_err(|e| CoreError::Credential(format!("failed to look up user {user}: {e}")))?
        .ok_or_else(|| CoreError::Credential(format!("unknown user {user}")))?;

    let gid = match group {
        Some(name) => nix::unistd::Group::from_name(name)
            .map_err(|e| CoreError::Credential(format!("failed to look up group {name}: {e}")))?
            .ok_or_else(|| CoreError::Credential(format!("unknown group {name}")))?
            .gid,
        None => account.gid,
    };

    Ok((account.uid.as_raw(), gid.as_raw()))
}

/// Send `signal` to the process group led by `pid`.
///
/// `ESRCH` and `EPERM` are treated as success: both mean the group is
/// already gone (or was never ours to begin with), which is exactly the
/// state a termination path wants.
pub fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    let pgid = Pid::from_raw(pid as i32);
    debug!("sending {} to process group {}", signal, pgid);

    match killpg(pgid, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            debug!("process group {} already exited", pgid);
            Ok(())
        }
        Err(nix::errno::Errno::EPERM) => {
            debug!("no permission to signal process group {} (likely already exited)", pgid);
            Ok(())
        }
        Err(e) => Err(CoreError::OsResource(format!(
            "failed to send {signal} to process group {pgid}: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::StartRequest;

    fn definition(command: &str, args: &[&str]) -> ProcessDefinition {
        ProcessDefinition::from_request(
            "testtest",
            StartRequest {
                name: "test".into(),
                command: command.into(),
                args: args.iter().map(|s| s.to_string()).collect(),
                work_dir: None,
                env: Default::default(),
                auto_start: false,
                auto_restart: false,
                max_restarts: 0,
                user: None,
                group: None,
            },
        )
    }

    #[tokio::test]
    async fn spawn_places_child_in_own_group() {
        let mut child = spawn_child(&definition("/bin/sh", &["-c", "sleep 5"]))
            .expect("spawn should succeed");
        let pid = child.id().expect("child should have a pid");

        let pgid = nix::unistd::getpgid(Some(Pid::from_raw(pid as i32)))
            .expect("child pgid should be readable");
        assert_eq!(pgid.as_raw(), pid as i32, "child leads its own group");

        signal_group(pid, Signal::SIGKILL).unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_is_os_resource_error() {
        let err = spawn_child(&definition("/nonexistent/command-xyz", &[])).unwrap_err();
        assert!(matches!(err, CoreError::OsResource(_)));
    }

    #[tokio::test]
    async fn spawn_merges_environment_and_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let mut def = definition("/bin/sh", &["-c", "echo \"$MARKER:$(pwd)\""]);
        def.env.insert("MARKER".into(), "present".into());
        def.work_dir = Some(dir.path().to_string_lossy().into_owned());

        let mut child = spawn_child(&def).unwrap();
        let stdout = child.stdout.take().unwrap();
        child.wait().await.unwrap();

        use tokio::io::AsyncReadExt as _;
        let mut out = String::new();
        let mut reader = tokio::io::BufReader::new(stdout);
        reader.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("present:"), "got: {out}");
        assert!(out.trim_end().ends_with(dir.path().to_string_lossy().as_ref()));
    }

    #[test]
    fn unknown_user_is_a_credential_error() {
        let err = resolve_credentials("no-such-user-xyz", None).unwrap_err();
        assert!(matches!(err, CoreError::Credential(_)));
    }

    #[test]
    fn signalling_a_dead_group_succeeds() {
        // pid far above any live process on a test machine
        assert!(signal_group(3_999_999, Signal::SIGTERM).is_ok());
    }
}
