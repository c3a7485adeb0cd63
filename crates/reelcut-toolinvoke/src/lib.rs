#![forbid(unsafe_code)]

//! Subprocess invocation envelope for the external encode/decode/mux tools
//! the Stage Runner shells out to: argv, optional stdin, working
//! directory, a hard timeout, and a bounded stderr tail. A timed-out process
//! is given `grace_period` to wind down after its stdin is closed before
//! being killed outright.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;

const STDERR_TAIL_CAP: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, #[source] source: std::io::Error },
    #[error("failed to write stdin to {program}: {source}")]
    StdinWrite { program: String, #[source] source: std::io::Error },
    #[error("failed to wait on {program}: {source}")]
    Wait { program: String, #[source] source: std::io::Error },
}

/// Result of a completed (possibly timed-out) invocation. `exit_code` is
/// `None` when the process was killed rather than exiting on its own.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub exit_code: Option<i32>,
    pub stderr_tail: String,
    pub wall_time: Duration,
    pub timed_out: bool,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Builder for a single external-tool call. One Stage Runner call site
/// builds one of these rather than threading a long positional argument
/// list through: a small config struct scales better than an ad hoc
/// parameter list as call sites grow.
pub struct ToolInvocation {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Duration,
    grace_period: Duration,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            cwd: None,
            env: Vec::new(),
            timeout,
            grace_period: Duration::from_secs(5),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Spawns the process, feeds it `stdin` if any, pumps its stderr into a
    /// ring buffer capped at 8 KiB, and waits up to `timeout`. On timeout,
    /// closes stdin (asking well-behaved tools to wind down) and waits
    /// `grace_period` before sending a hard kill.
    pub async fn invoke(self) -> Result<ToolOutcome, ToolError> {
        let started = Instant::now();
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| ToolError::Spawn { program: self.program.clone(), source })?;

        if let Some(data) = self.stdin {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(&data)
                    .await
                    .map_err(|source| ToolError::StdinWrite { program: self.program.clone(), source })?;
            }
        }
        // Dropping `child.stdin` here (it is `None` after `.take()` above, or
        // was never piped) closes the write end, signalling EOF to the tool.

        let stderr = child.stderr.take().expect("stderr was piped");
        let tail = tokio::spawn(pump_stderr(stderr));

        let (exit_code, timed_out) = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(|source| ToolError::Wait { program: self.program.clone(), source })?;
                (status.code(), false)
            }
            Err(_) => {
                tracing::warn!(program = %self.program, timeout_secs = self.timeout.as_secs(), "tool timed out, requesting graceful shutdown");
                match tokio::time::timeout(self.grace_period, child.wait()).await {
                    Ok(status) => {
                        let status = status.map_err(|source| ToolError::Wait { program: self.program.clone(), source })?;
                        (status.code(), true)
                    }
                    Err(_) => {
                        tracing::warn!(program = %self.program, "grace period elapsed, killing");
                        let _ = child.kill().await;
                        let status = child.wait().await.map_err(|source| ToolError::Wait { program: self.program.clone(), source })?;
                        (status.code(), true)
                    }
                }
            }
        };

        let stderr_tail = tail.await.unwrap_or_default();

        Ok(ToolOutcome {
            exit_code,
            stderr_tail,
            wall_time: started.elapsed(),
            timed_out,
        })
    }
}

async fn pump_stderr(mut stderr: tokio::process::ChildStderr) -> String {
    let mut ring: VecDeque<u8> = VecDeque::with_capacity(STDERR_TAIL_CAP);
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                ring.extend(&chunk[..n]);
                while ring.len() > STDERR_TAIL_CAP {
                    ring.pop_front();
                }
            }
            Err(_) => break,
        }
    }
    let bytes: Vec<u8> = ring.into_iter().collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_reports_exit_zero() {
        let outcome = ToolInvocation::new("true", Duration::from_secs(5)).invoke().await.unwrap();
        assert!(outcome.success());
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_success() {
        let outcome = ToolInvocation::new("false", Duration::from_secs(5)).invoke().await.unwrap();
        assert_eq!(outcome.exit_code, Some(1));
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn stderr_tail_is_captured() {
        let outcome = ToolInvocation::new("sh", Duration::from_secs(5))
            .args(["-c", "echo hello 1>&2"])
            .invoke()
            .await
            .unwrap();
        assert!(outcome.stderr_tail.contains("hello"));
    }

    #[tokio::test]
    async fn timeout_kills_and_marks_timed_out() {
        let outcome = ToolInvocation::new("sleep", Duration::from_millis(50))
            .args(["5"])
            .grace_period(Duration::from_millis(50))
            .invoke()
            .await
            .unwrap();
        assert!(outcome.timed_out);
    }
}
