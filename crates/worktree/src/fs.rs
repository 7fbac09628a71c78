//! Working tree backed by a directory on disk.

use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use pipeline::apply::FileChange;
use pipeline::ports::{TreeError, WorkingTree};
use pipeline::RepoPath;
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

/// Directories never listed as part of the tree.
const SKIPPED_DIRS: &[&str] = &[".git"];

pub struct FsWorkingTree {
    root: PathBuf,
}

impl FsWorkingTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `path`. Absolute paths and `..` are rejected so
    /// no change can land outside the root.
    fn resolve(&self, path: &RepoPath) -> Result<PathBuf, TreeError> {
        let relative = Path::new(path.as_str());
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(io_error(path.as_str(), "path leaves the working tree"));
        }
        Ok(self.root.join(relative))
    }

    fn walk(&self, dir: &Path, out: &mut Vec<RepoPath>) -> Result<(), TreeError> {
        let entries = std::fs::read_dir(dir).map_err(|e| io_error(&dir.display().to_string(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir.display().to_string(), e))?;
            let file_type = entry.file_type().map_err(|e| io_error(&entry.path().display().to_string(), e))?;
            let name = entry.file_name();
            if file_type.is_dir() {
                if SKIPPED_DIRS.iter().any(|s| name == *s) {
                    continue;
                }
                self.walk(&entry.path(), out)?;
            } else if file_type.is_file() {
                let path = entry.path();
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let text = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if let Some(repo_path) = RepoPath::new(text) {
                    out.push(repo_path);
                }
            }
        }
        Ok(())
    }
}

/// A change written to a scratch file beside its target, not yet renamed.
struct Staged {
    target: PathBuf,
    display: String,
    scratch: Option<NamedTempFile>,
}

/// What a target held before the rename, for rollback.
struct Replaced {
    target: PathBuf,
    display: String,
    original: Option<Vec<u8>>,
}

impl WorkingTree for FsWorkingTree {
    fn read_file(&self, path: &RepoPath) -> Result<Option<String>, TreeError> {
        let full = self.resolve(path)?;
        match std::fs::read_to_string(&full) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path.as_str(), e)),
        }
    }

    fn list_files(&self) -> Result<Vec<RepoPath>, TreeError> {
        let mut files = Vec::new();
        self.walk(&self.root, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn commit(&self, changes: &[FileChange]) -> Result<(), TreeError> {
        // Stage everything first; a failure here leaves the tree untouched.
        let mut staged = Vec::with_capacity(changes.len());
        for change in changes {
            let target = self.resolve(&change.path)?;
            let display = change.path.as_str().to_string();
            let scratch = match &change.content {
                Some(content) => Some(stage(&target, &display, content)?),
                None => None,
            };
            staged.push(Staged {
                target,
                display,
                scratch,
            });
        }

        let mut replaced: Vec<Replaced> = Vec::with_capacity(staged.len());
        for item in staged {
            let original = match std::fs::read(&item.target) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => {
                    rollback(&replaced)?;
                    return Err(io_error(&item.display, e));
                }
            };
            let result = match item.scratch {
                Some(scratch) => scratch.persist(&item.target).map(|_| ()).map_err(|e| e.error),
                None if original.is_some() => std::fs::remove_file(&item.target),
                None => Ok(()),
            };
            if let Err(e) = result {
                warn!(path = %item.display, error = %e, "replacing file failed, rolling back");
                rollback(&replaced)?;
                return Err(io_error(&item.display, e));
            }
            replaced.push(Replaced {
                target: item.target,
                display: item.display,
                original,
            });
        }

        debug!(files = replaced.len(), "working tree updated");
        Ok(())
    }
}

fn stage(target: &Path, display: &str, content: &str) -> Result<NamedTempFile, TreeError> {
    let parent = target.parent().ok_or_else(|| io_error(display, "path has no parent directory"))?;
    std::fs::create_dir_all(parent).map_err(|e| io_error(display, e))?;
    let mut scratch = tempfile::Builder::new()
        .prefix(".taskwright-")
        .tempfile_in(parent)
        .map_err(|e| io_error(display, e))?;
    scratch.write_all(content.as_bytes()).map_err(|e| io_error(display, e))?;
    scratch.as_file().sync_all().map_err(|e| io_error(display, e))?;
    Ok(scratch)
}

/// Restores every replaced file, newest first.
fn rollback(replaced: &[Replaced]) -> Result<(), TreeError> {
    for item in replaced.iter().rev() {
        let restored = match &item.original {
            Some(bytes) => std::fs::write(&item.target, bytes),
            None => std::fs::remove_file(&item.target).or_else(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(e)
                }
            }),
        };
        if let Err(e) = restored {
            error!(path = %item.display, error = %e, "rollback failed");
            return Err(TreeError::Rollback {
                path: item.display.clone(),
                message: e.to_string(),
            });
        }
    }
    Ok(())
}

fn io_error(path: &str, message: impl std::fmt::Display) -> TreeError {
    TreeError::Io {
        path: path.to_string(),
        message: message.to_string(),
    }
}
