//! Taskwright local adapters.
//!
//! | Type | Port |
//! |------|------|
//! | [`FsWorkingTree`] | [`WorkingTree`](pipeline::ports::WorkingTree) |
//! | [`TreeSitterValidator`] | [`SourceValidator`](pipeline::ports::SourceValidator) |
//! | [`CommandFormatter`] | [`Formatter`](pipeline::ports::Formatter) |
//! | [`GitRepository`] | [`CodeRepository`](pipeline::ports::CodeRepository) |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Everything here is synchronous: the filesystem, the
//! `git` CLI, and formatter subprocesses. Every subprocess runs under a
//! deadline and is killed when it expires.

mod format;
mod fs;
mod git;
mod process;
mod validate;

pub use format::CommandFormatter;
pub use fs::FsWorkingTree;
pub use git::GitRepository;
pub use validate::TreeSitterValidator;
