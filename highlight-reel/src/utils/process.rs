//! Subprocess execution with captured output.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Output from a command execution.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub duration: Duration,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    /// Last few stderr lines, for error messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let start = self.stderr.len().saturating_sub(lines);
        self.stderr[start..].join("\n")
    }
}

fn collect_lines<R>(stream: R, name: &'static str) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        let mut out = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if name == "stderr" && line.to_lowercase().contains("error") {
                warn!("{}: {}", name, line);
            } else {
                debug!("{}: {}", name, line);
            }
            out.push(line);
        }
        out
    })
}

/// Run a command to completion, capturing stdout and stderr line by line.
///
/// The child is killed if `timeout` elapses or the returned future is dropped.
pub async fn run_command_with_logs(command: &mut Command, timeout: Duration) -> Result<CommandOutput> {
    let start = Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let mut child = command
        .spawn()
        .map_err(|e| Error::Other(format!("Failed to spawn {program}: {e}")))?;

    let stdout = child.stdout.take().map(|s| collect_lines(s, "stdout"));
    let stderr = child.stderr.take().map(|s| collect_lines(s, "stderr"));

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.map_err(|e| Error::Other(format!("Failed to wait for {program}: {e}")))?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "Failed to kill timed out process");
            }
            return Err(Error::timeout(program, timeout));
        }
    };

    let stdout = match stdout {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let stderr = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(CommandOutput {
        status,
        duration: start.elapsed(),
        stdout,
        stderr,
    })
}
