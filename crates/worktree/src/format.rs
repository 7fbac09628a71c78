//! External formatter commands, keyed by file extension.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::Command;
use std::time::Duration;

use pipeline::ports::Formatter;
use pipeline::RepoPath;
use tracing::debug;

use crate::process;

/// Runs the configured command on a scratch copy of the content and returns
/// what the command left in the file.
pub struct CommandFormatter {
    commands: BTreeMap<String, Vec<String>>,
    timeout: Duration,
}

impl CommandFormatter {
    pub fn new(commands: BTreeMap<String, Vec<String>>, timeout: Duration) -> Self {
        Self { commands, timeout }
    }
}

impl Formatter for CommandFormatter {
    fn format(&self, path: &RepoPath, content: &str) -> Result<Option<String>, String> {
        let Some((_, ext)) = path.as_str().rsplit_once('.') else {
            return Ok(None);
        };
        let Some((program, args)) = self.commands.get(ext).and_then(|argv| argv.split_first()) else {
            return Ok(None);
        };

        let suffix = format!(".{ext}");
        let mut scratch = tempfile::Builder::new()
            .prefix("taskwright-fmt-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| format!("could not create scratch file for {path}: {e}"))?;
        scratch
            .write_all(content.as_bytes())
            .and_then(|()| scratch.flush())
            .map_err(|e| format!("could not write scratch file for {path}: {e}"))?;

        let mut cmd = Command::new(program);
        cmd.args(args).arg(scratch.path());
        let output = process::run(cmd, program, self.timeout).map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(format!(
                "`{program}` exited with {} on {path}: {}",
                output.status,
                output.diagnostics()
            ));
        }

        let formatted = std::fs::read_to_string(scratch.path())
            .map_err(|e| format!("could not read formatted {path}: {e}"))?;
        debug!(path = %path, formatter = program.as_str(), changed = formatted != content, "formatted");
        Ok(Some(formatted))
    }
}
