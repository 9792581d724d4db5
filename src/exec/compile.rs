//! Captured (non-interactive) process execution used for compile steps.
//! Output is collected in full before the caller decides anything.
//!
//! The compiler leads its own process group. Drivers like g++ fork the real
//! work (cc1plus, as, ld), so stopping a compile means signalling the group,
//! not just the direct child.

use crate::config::types::{CommandLine, Result, SandboxError};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Result of a captured invocation
#[derive(Debug)]
pub struct CompileOutput {
    /// stdout followed by stderr, lossily decoded
    pub diagnostics: String,
    pub status: ExitStatus,
    pub elapsed: Duration,
}

impl CompileOutput {
    /// Any non-whitespace output counts as a diagnostic, warnings included.
    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.trim().is_empty()
    }
}

/// SIGKILLs the compiler's process group when dropped.
///
/// Held across the wait, so a timeout, a cancelled run (the future is
/// dropped) and a normal return all leave nothing behind.
struct GroupReaper {
    pgid: Option<Pid>,
}

impl Drop for GroupReaper {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            // ESRCH just means the group is already gone
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }
}

/// Run `cmd` to completion with a cleared environment and bounded wall time.
///
/// The child's whole process group is killed when the timeout fires or when
/// the returned future is dropped, which is how cancelling a run during
/// compile stops the compiler.
pub async fn run_captured(
    cmd: &CommandLine,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<CompileOutput> {
    let started = Instant::now();
    let child = Command::new(&cmd.program)
        .args(&cmd.args)
        .env_clear()
        .envs(env)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SandboxError::Spawn(format!("{}: {}", cmd.program.display(), e)))?;

    let _reaper = GroupReaper {
        pgid: child.id().map(|pid| Pid::from_raw(pid as i32)),
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(SandboxError::Compile(format!(
                "compiler did not finish within {} ms",
                timeout.as_millis()
            )))
        }
    };

    let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
    diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CompileOutput {
        diagnostics,
        status: output.status,
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("/bin/sh").arg("-c").arg(script)
    }

    fn path_env() -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        env
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_captured(
            &sh("echo out; echo err >&2"),
            dir.path(),
            &path_env(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(out.status.success());
        assert!(out.diagnostics.contains("out"));
        assert!(out.diagnostics.contains("err"));
        assert!(out.has_diagnostics());
    }

    #[tokio::test]
    async fn test_whitespace_only_output_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_captured(
            &sh("printf '\\n  \\n'"),
            dir.path(),
            &path_env(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(!out.has_diagnostics());
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = path_env();
        env.insert("ONLY_ME".to_string(), "1".to_string());
        let out = run_captured(&sh("env"), dir.path(), &env, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.diagnostics.contains("ONLY_ME=1"));
        assert!(!out.diagnostics.contains("CARGO"));
    }

    #[tokio::test]
    async fn test_runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let out = run_captured(
            &sh("cat marker.txt"),
            dir.path(),
            &path_env(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(out.diagnostics, "here");
    }

    #[tokio::test]
    async fn test_timeout_is_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_captured(
            &sh("sleep 5"),
            dir.path(),
            &path_env(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SandboxError::Compile(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_captured(
            &CommandLine::new("/nonexistent/compiler"),
            dir.path(),
            &path_env(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn(_)));
    }

    /// Alive and not a zombie waiting to be reaped by init
    fn is_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn wait_until_gone(pid: i32) -> bool {
        for _ in 0..100 {
            if !is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn read_pid(path: &Path) -> i32 {
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(path) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no pid written to {}", path.display());
    }

    #[tokio::test]
    async fn test_timeout_kills_forked_compiler_stages() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_captured(
            &sh("sleep 30 & echo $! > stage.pid; wait"),
            dir.path(),
            &path_env(),
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SandboxError::Compile(_)));

        let stage = read_pid(&dir.path().join("stage.pid")).await;
        assert!(wait_until_gone(stage).await, "forked stage {} survived", stage);
    }

    #[tokio::test]
    async fn test_dropping_the_compile_kills_forked_stages() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = sh("sleep 30 & echo $! > stage.pid; wait");
        let env = path_env();
        let compile = run_captured(
            &cmd,
            dir.path(),
            &env,
            Duration::from_secs(30),
        );
        // Outer timeout drops the compile future, as a cancelled run does
        let cancelled = tokio::time::timeout(Duration::from_millis(300), compile).await;
        assert!(cancelled.is_err());

        let stage = read_pid(&dir.path().join("stage.pid")).await;
        assert!(wait_until_gone(stage).await, "forked stage {} survived", stage);
    }
}
