//! Child process helpers for the external tools (ffmpeg, yt-dlp).

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DashError, Result};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Create a `tokio::process::Command` that never opens a console window on Windows.
pub fn tool_command(program: impl AsRef<OsStr>) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Exit status plus the last lines the tool wrote to stderr.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stderr_tail: Vec<String>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Last non-empty stderr line, or the exit code when the tool was silent.
    pub fn failure_reason(&self) -> String {
        self.stderr_tail
            .iter()
            .rev()
            .find(|l| !l.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| match self.status.code() {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_string(),
            })
    }
}

/// Run a tool to completion, streaming its stderr into the log.
///
/// The child is killed when `token` is cancelled, which yields
/// [`DashError::Cancelled`].
pub async fn run_tool(
    program: &str,
    mut cmd: Command,
    token: &CancellationToken,
) -> Result<ToolOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| DashError::ToolSpawn {
        program: program.to_string(),
        source,
    })?;

    let stderr = child.stderr.take();
    let tool = program.to_string();
    let reader = tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(tool = %tool, "{}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
        tail
    });

    let status = tokio::select! {
        _ = token.cancelled() => {
            debug!(tool = program, "Cancellation requested, killing process");
            let _ = child.kill().await;
            return Err(DashError::Cancelled);
        }
        status = child.wait() => status?,
    };

    let stderr_tail = reader.await.map(Vec::from).unwrap_or_default();

    if let Some(code) = status.code()
        && code != 0
    {
        warn!(tool = program, code, "Process exited with non-zero code");
    }

    Ok(ToolOutput {
        status,
        stderr_tail,
    })
}
