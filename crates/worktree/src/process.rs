//! Subprocesses with a deadline.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use pipeline::ports::TreeError;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

pub(crate) struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stderr, or stdout when stderr is empty, trimmed.
    pub fn diagnostics(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.trim().to_string()
    }
}

/// Runs `cmd` to completion. A process still running at `timeout` is killed
/// and reported as [`TreeError::Timeout`].
pub(crate) fn run(mut cmd: Command, label: &str, timeout: Duration) -> Result<CommandOutput, TreeError> {
    let command_error = |message: String| TreeError::Command {
        command: label.to_string(),
        message,
    };

    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    debug!(command = label, "spawning");
    let mut child = cmd.spawn().map_err(|e| command_error(format!("could not start: {e}")))?;

    let stdout = child.stdout.take().ok_or_else(|| command_error("stdout was not piped".into()))?;
    let stderr = child.stderr.take().ok_or_else(|| command_error("stderr was not piped".into()))?;
    let stdout_handle = thread::spawn(move || read_all(stdout));
    let stderr_handle = thread::spawn(move || read_all(stderr));

    let status = match child
        .wait_timeout(timeout)
        .map_err(|e| command_error(format!("wait failed: {e}")))?
    {
        Some(status) => status,
        None => {
            warn!(command = label, timeout_secs = timeout.as_secs(), "command timed out, killing");
            let _ = child.kill();
            let _ = child.wait();
            return Err(TreeError::Timeout {
                command: label.to_string(),
                seconds: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    debug!(command = label, exit_code = ?status.code(), "command finished");
    Ok(CommandOutput { status, stdout, stderr })
}

fn read_all(mut stream: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}
