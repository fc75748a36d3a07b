//! Sanitized subprocess runner.
//!
//! Every external command goes through [`SafeRunner`]:
//! - only whitelisted binaries run
//! - arguments with shell metacharacters are rejected
//! - absolute paths must live under the safe root
//! - the environment is reduced to `PATH`, `LANG` and `LC_ALL`
//! - each output stream is capped, and the child is killed on timeout

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::ExecError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-stream output cap (10 MiB).
pub const MAX_STREAM_BYTES: usize = 10 * 1024 * 1024;

pub const ENV_ALLOWLIST: [&str; 3] = ["PATH", "LANG", "LC_ALL"];

const METACHARACTERS: [&str; 7] = ["|", "&", ";", ">", "<", "$(", "`"];

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Whether either stream hit the cap.
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs whitelisted binaries with sanitized arguments.
#[derive(Debug, Clone)]
pub struct SafeRunner {
    allowed: Vec<String>,
    safe_root: PathBuf,
    timeout: Duration,
    max_output: usize,
    working_dir: Option<PathBuf>,
}

impl SafeRunner {
    pub fn new(safe_root: impl Into<PathBuf>, allowed: &[&str]) -> Self {
        SafeRunner {
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
            safe_root: safe_root.into(),
            timeout: DEFAULT_TIMEOUT,
            max_output: MAX_STREAM_BYTES,
            working_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_cap(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn safe_root(&self) -> &Path {
        &self.safe_root
    }

    fn inside_root(&self, path: &Path) -> bool {
        !path.components().any(|c| c == Component::ParentDir) && path.starts_with(&self.safe_root)
    }

    /// Validate a command line without running it.
    pub fn check(&self, program: &str, args: &[String]) -> Result<(), ExecError> {
        // STEP 1: binary
        let program_path = Path::new(program);
        let name = program_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !self.allowed.iter().any(|a| *a == name) {
            return Err(ExecError::BinaryNotAllowed(program.to_string()));
        }
        if program_path.is_absolute() && !self.inside_root(program_path) {
            return Err(ExecError::PathOutsideRoot(program.to_string()));
        }

        // STEP 2: arguments
        for arg in args {
            if METACHARACTERS.iter().any(|m| arg.contains(m)) {
                return Err(ExecError::UnsafeArgument(arg.clone()));
            }
            let value = arg.split_once('=').map(|(_, v)| v).unwrap_or(arg);
            for candidate in [arg.as_str(), value] {
                let path = Path::new(candidate);
                if path.is_absolute() && !self.inside_root(path) {
                    return Err(ExecError::PathOutsideRoot(candidate.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Run a command and capture its output. A non-zero exit is not an error here.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
        self.check(program, args)?;
        let cmd = program.to_string();
        log::debug!("[Exec] Running {} {:?}", program, args);

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in ENV_ALLOWLIST {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| ExecError::Spawn {
            cmd: cmd.clone(),
            reason: e.to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ExecError::Spawn {
            cmd: cmd.clone(),
            reason: "stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ExecError::Spawn {
            cmd: cmd.clone(),
            reason: "stderr was not captured".to_string(),
        })?;
        let stdout_task = tokio::spawn(read_capped(stdout, self.max_output));
        let stderr_task = tokio::spawn(read_capped(stderr, self.max_output));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(ExecError::Spawn {
                    cmd,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    log::warn!("[Exec] Failed to kill {}: {}", cmd, e);
                }
                stdout_task.abort();
                stderr_task.abort();
                log::warn!("[Exec] {} timed out after {:?}", cmd, self.timeout);
                return Err(ExecError::Timeout {
                    cmd,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let (stdout, stdout_cut) = stdout_task.await.ok().and_then(|r| r.ok()).unwrap_or_default();
        let (stderr, stderr_cut) = stderr_task.await.ok().and_then(|r| r.ok()).unwrap_or_default();
        if stdout_cut || stderr_cut {
            log::warn!("[Exec] Output of {} truncated at {} bytes", cmd, self.max_output);
        }
        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout,
            stderr,
            truncated: stdout_cut || stderr_cut,
        })
    }

    /// Like [`run`](Self::run) but a non-zero exit becomes an error.
    pub async fn run_checked(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
        let output = self.run(program, args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ExecError::NonZeroExit {
                cmd: program.to_string(),
                code: output.status,
            })
        }
    }
}

/// Read a stream to the end, keeping at most `cap` bytes.
///
/// The stream is drained past the cap so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(buf.len());
        if room < n {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rejects_metacharacters() {
        let runner = SafeRunner::new("/tmp", &["echo"]);
        for bad in ["a; rm -rf x", "a | b", "$(id)", "`id`", "a && b", "> out", "< in"] {
            let err = runner.check("echo", &args(&[bad])).unwrap_err();
            assert!(matches!(err, ExecError::UnsafeArgument(_)), "{}", bad);
        }
        assert!(runner.check("echo", &args(&["plain", "--flag=value"])).is_ok());
    }

    #[test]
    fn test_rejects_unlisted_binary() {
        let runner = SafeRunner::new("/tmp", &["echo"]);
        let err = runner.check("curl", &[]).unwrap_err();
        assert_eq!(err, ExecError::BinaryNotAllowed("curl".to_string()));
    }

    #[test]
    fn test_rejects_paths_outside_root() {
        let dir = tempdir().unwrap();
        let runner = SafeRunner::new(dir.path(), &["cat"]);
        let inside = dir.path().join("report.json").display().to_string();
        assert!(runner.check("cat", &[inside]).is_ok());

        let err = runner.check("cat", &args(&["/etc/passwd"])).unwrap_err();
        assert!(matches!(err, ExecError::PathOutsideRoot(_)));
        let escape = format!("--out={}/../x", dir.path().display());
        assert!(matches!(
            runner.check("cat", &[escape]).unwrap_err(),
            ExecError::PathOutsideRoot(_)
        ));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_maps_to_124() {
        let runner = SafeRunner::new("/tmp", &["sleep"]).with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = runner.run("sleep", &args(&["5"])).await.unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert_eq!(err.exit_code(), 124);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let runner = SafeRunner::new("/tmp", &["seq"]).with_output_cap(1024);
        let output = runner.run("seq", &args(&["1", "100000"])).await.unwrap();
        assert!(output.success());
        assert!(output.truncated);
        assert_eq!(output.stdout.len(), 1024);
    }

    #[tokio::test]
    async fn test_environment_is_minimized() {
        std::env::set_var("EFI_FORGE_SECRET", "1");
        let runner = SafeRunner::new("/tmp", &["env"]);
        let output = runner.run("env", &[]).await.unwrap();
        for line in output.stdout_str().lines() {
            let key = line.split('=').next().unwrap_or_default();
            assert!(ENV_ALLOWLIST.contains(&key), "unexpected variable {}", key);
        }
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let runner = SafeRunner::new("/tmp", &["false"]);
        let output = runner.run("false", &[]).await.unwrap();
        assert_eq!(output.status, 1);
        let err = runner.run_checked("false", &[]).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
