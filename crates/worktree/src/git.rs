//! `CodeRepository` over the `git` command line.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use pipeline::ports::{CodeRepository, TreeError};
use pipeline::{BranchName, CommitSha};
use tracing::{info, instrument};

use crate::process::{self, CommandOutput};

const GIT_TIMEOUT: Duration = Duration::from_secs(120);
const REMOTE: &str = "origin";
const FALLBACK_NAME: &str = "taskwright[bot]";
const FALLBACK_EMAIL: &str = "taskwright[bot]@users.noreply.github.com";

pub struct GitRepository {
    root: PathBuf,
    timeout: Duration,
}

impl GitRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: GIT_TIMEOUT,
        }
    }

    fn git(&self, args: &[&str]) -> Result<CommandOutput, TreeError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.root).args(args);
        let label = format!("git {}", args.join(" "));
        process::run(cmd, &label, self.timeout)
    }

    /// Runs git and fails on a non-zero exit.
    fn git_ok(&self, args: &[&str]) -> Result<String, TreeError> {
        let output = self.git(args)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(TreeError::Command {
                command: format!("git {}", args.join(" ")),
                message: output.diagnostics(),
            })
        }
    }

    /// Runs git and reports only whether it exited zero.
    fn git_probe(&self, args: &[&str]) -> Result<bool, TreeError> {
        Ok(self.git(args)?.success())
    }

    fn has_remote(&self) -> Result<bool, TreeError> {
        let remotes = self.git_ok(&["remote"])?;
        Ok(remotes.lines().any(|r| r.trim() == REMOTE))
    }

    fn remote_has_branch(&self, branch: &str) -> Result<bool, TreeError> {
        self.git_probe(&["ls-remote", "--exit-code", "--heads", REMOTE, branch])
    }

    /// `-c` overrides for a runner without a configured committer.
    fn identity_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.git_ok(&["config", "--get", "user.name"]).unwrap_or_default().trim().is_empty() {
            args.extend(["-c".to_string(), format!("user.name={FALLBACK_NAME}")]);
        }
        if self.git_ok(&["config", "--get", "user.email"]).unwrap_or_default().trim().is_empty() {
            args.extend(["-c".to_string(), format!("user.email={FALLBACK_EMAIL}")]);
        }
        args
    }
}

impl CodeRepository for GitRepository {
    #[instrument(skip(self), fields(branch = %branch, base = %base))]
    fn prepare_branch(&self, branch: &BranchName, base: &BranchName) -> Result<(), TreeError> {
        let local_ref = format!("refs/heads/{branch}");
        if self.git_probe(&["rev-parse", "--verify", "--quiet", &local_ref])? {
            self.git_ok(&["checkout", branch.as_str()])?;
            return Ok(());
        }

        if self.has_remote()? {
            if self.remote_has_branch(branch.as_str())? {
                self.git_ok(&["fetch", REMOTE, branch.as_str()])?;
                let upstream = format!("{REMOTE}/{branch}");
                self.git_ok(&["checkout", "-b", branch.as_str(), "--track", &upstream])?;
                info!("checked out existing remote branch");
                return Ok(());
            }
            self.git_ok(&["fetch", REMOTE, base.as_str()])?;
            let start = format!("{REMOTE}/{base}");
            self.git_ok(&["checkout", "-b", branch.as_str(), &start])?;
        } else {
            self.git_ok(&["checkout", "-b", branch.as_str(), base.as_str()])?;
        }
        info!("created branch");
        Ok(())
    }

    fn commit_all(&self, message: &str) -> Result<Option<CommitSha>, TreeError> {
        self.git_ok(&["add", "--all"])?;
        if self.git_ok(&["status", "--porcelain"])?.trim().is_empty() {
            return Ok(None);
        }
        let identity = self.identity_args();
        let mut args: Vec<&str> = identity.iter().map(String::as_str).collect();
        args.extend(["commit", "--quiet", "-m", message]);
        self.git_ok(&args)?;

        let sha = self.git_ok(&["rev-parse", "HEAD"])?;
        let sha = CommitSha::new(sha.trim()).ok_or_else(|| TreeError::Command {
            command: "git rev-parse HEAD".into(),
            message: "empty output".into(),
        })?;
        info!(sha = %sha, "committed");
        Ok(Some(sha))
    }

    fn push(&self, branch: &BranchName) -> Result<(), TreeError> {
        self.git_ok(&["push", "--set-upstream", REMOTE, branch.as_str()])?;
        info!(branch = %branch, "pushed");
        Ok(())
    }
}
