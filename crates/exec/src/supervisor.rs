// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-group subprocess supervision.
//!
//! Children are spawned as leaders of their own process group so that
//! signalling the group also terminates descendants. Timeouts and
//! cancellation escalate SIGTERM → grace period → SIGKILL. Pipe ends
//! are owned by tokio handles, so every exit path closes them.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Grace period between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Cap on captured output per stream; bounds memory for runaway children.
pub const MAX_OUTPUT_BYTES: usize = 8 * 1024 * 1024;

/// Errors from supervised execution.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{description} timed out after {}s", timeout.as_secs())]
    Timeout { description: String, timeout: Duration },

    #[error("{description} cancelled")]
    Cancelled { description: String },

    #[error("{description} I/O error: {source}")]
    Io {
        description: String,
        #[source]
        source: std::io::Error,
    },
}

/// What to run and how long to let it.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub working_dir: PathBuf,
    /// Written to the child's stdin, then the pipe is closed.
    pub stdin_input: Option<String>,
    /// Label used in errors and logs, e.g. `"tool call"`.
    pub description: String,
}

impl RunSpec {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
        working_dir: &Path,
    ) -> Self {
        let program = program.into();
        Self {
            description: program.clone(),
            program,
            args,
            timeout,
            working_dir: working_dir.to_path_buf(),
            stdin_input: None,
        }
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin_input = Some(input.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Combined output and exit disposition of a completed child.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Stdout followed by stderr, lossy UTF-8, each capped.
    pub combined_output: String,
    pub exit_ok: bool,
}

/// Run a command under supervision.
///
/// Returns `Ok` for any child that exits on its own (non-zero exit is
/// `exit_ok = false`, not an error). Timeout and cancellation are hard
/// failures after the group has been torn down.
pub async fn run(spec: RunSpec, cancel: &CancellationToken) -> Result<RunOutput, SupervisorError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(if spec.stdin_input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
        program: spec.program.clone(),
        source,
    })?;
    let pid = child.id();

    // Prompt delivery runs concurrently with output draining. Awaiting the
    // write before reading can deadlock once both pipes fill.
    if let Some(input) = spec.stdin_input.clone() {
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(input.as_bytes()).await;
                // drop closes the pipe; child sees EOF
            });
        }
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(drain_capped(stdout));
    let stderr_task = tokio::spawn(drain_capped(stderr));

    // The wait future is dropped before any teardown path touches the
    // child again, so the exclusive borrow never overlaps.
    enum WaitOutcome {
        Exited(std::io::Result<std::process::ExitStatus>),
        Cancelled,
    }
    let waited = tokio::time::timeout(spec.timeout, async {
        tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        }
    })
    .await;

    let status = match waited {
        Ok(WaitOutcome::Exited(status)) => status.map_err(|source| SupervisorError::Io {
            description: spec.description.clone(),
            source,
        })?,
        Ok(WaitOutcome::Cancelled) => {
            terminate_group(pid, &mut child).await;
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            tracing::info!(description = %spec.description, "subprocess cancelled");
            return Err(SupervisorError::Cancelled { description: spec.description.clone() });
        }
        Err(_elapsed) => {
            terminate_group(pid, &mut child).await;
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            tracing::warn!(description = %spec.description, timeout_s = spec.timeout.as_secs(), "subprocess timed out");
            return Err(SupervisorError::Timeout {
                description: spec.description.clone(),
                timeout: spec.timeout,
            });
        }
    };

    let stdout_buf = stdout_task.await.unwrap_or_default();
    let stderr_buf = stderr_task.await.unwrap_or_default();

    let mut combined = String::from_utf8_lossy(&stdout_buf).into_owned();
    if !stderr_buf.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&String::from_utf8_lossy(&stderr_buf));
    }

    Ok(RunOutput { combined_output: combined, exit_ok: status.success() })
}

/// Read a pipe to EOF, capping the buffer.
async fn drain_capped(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<u8> {
    let Some(pipe) = pipe else {
        return Vec::new();
    };
    let mut buf = Vec::with_capacity(64 * 1024);
    let mut capped = pipe.take(MAX_OUTPUT_BYTES as u64);
    if let Err(e) = capped.read_to_end(&mut buf).await {
        tracing::warn!(error = %e, "pipe read error");
    }
    // Keep draining past the cap so the child never blocks on a full pipe.
    let mut sink = capped.into_inner();
    let mut scratch = [0u8; 8192];
    loop {
        match sink.read(&mut scratch).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    buf
}

/// SIGTERM the group, wait out the grace period, then SIGKILL and reap.
async fn terminate_group(pid: Option<u32>, child: &mut Child) {
    let group = pid.map(|p| Pid::from_raw(p as i32));
    if let Some(group) = group {
        let _ = killpg(group, Signal::SIGTERM);
    }
    let graceful = tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok();
    if !graceful {
        if let Some(group) = group {
            let _ = killpg(group, Signal::SIGKILL);
        }
        let _ = child.wait().await;
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
