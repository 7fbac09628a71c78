//! Taskwright agent nodes, LLM gateway, and event dispatch.
//!
//! This crate provides the four agent nodes (Analyzer, Developer, Reviewer,
//! Progress), the LLM gateway that bounds every model call with a timeout and
//! a single retry, prompt rendering, the executor for workflow intents, and
//! the [`PipelineExecutor`] that routes a [`pipeline::TriggerEvent`] to its
//! node.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Nodes sequence calls between business logic in the
//! [`pipeline`] crate and infrastructure traits (GitHub, LLM, working tree).
//! They contain no domain rules of their own.
//!
//! | Trigger | Node |
//! |---------|------|
//! | `bot:analyze` added to an issue | [`analyzer::Analyzer`] |
//! | `bot:implement` added to a task issue | [`developer::Developer`] |
//! | pull request opened or updated | [`reviewer::Reviewer`] |
//! | pull request closed or merged, parent issue closed | [`progress::Progress`] |

pub mod analyzer;
pub mod context;
pub mod developer;
pub mod executor;
pub mod gateway;
pub mod intents;
pub mod ledger_store;
pub mod progress;
pub mod prompts;
pub mod refacing;
pub mod reviewer;

pub use context::NodeContext;
pub use executor::{NodeOutcome, PipelineExecutor};
pub use gateway::LlmGateway;
