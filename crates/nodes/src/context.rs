//! Everything a node needs to handle one event.

use std::sync::Arc;

use pipeline::config::Settings;
use pipeline::ports::{
    CodeRepository, Formatter, IssueTracker, ProjectBoard, PullRequestManager, SourceValidator, WorkingTree,
};
use pipeline::workflow::WorkflowMachine;
use pipeline::PipelineRunId;

use crate::gateway::LlmGateway;
use crate::intents::IntentExecutor;
use crate::ledger_store::LedgerStore;
use crate::prompts::PromptEngine;

/// Adapters and settings shared by every node.
///
/// Built once at process start by the composition root. Holds no state that
/// survives an event: every handler re-reads what it needs.
#[derive(Clone)]
pub struct NodeContext {
    pub settings: Arc<Settings>,
    pub tracker: Arc<dyn IssueTracker>,
    pub pulls: Arc<dyn PullRequestManager>,
    pub board: Option<Arc<dyn ProjectBoard>>,
    pub llm: LlmGateway,
    pub tree: Arc<dyn WorkingTree>,
    pub repo: Arc<dyn CodeRepository>,
    pub validator: Arc<dyn SourceValidator>,
    pub formatter: Arc<dyn Formatter>,
    pub prompts: Arc<PromptEngine>,
    pub run_id: PipelineRunId,
}

impl NodeContext {
    pub fn ledgers(&self) -> LedgerStore {
        LedgerStore::new(self.tracker.clone())
    }

    pub fn intents(&self) -> IntentExecutor {
        let board = match (&self.board, &self.settings.project) {
            (Some(board), Some(project)) => Some((board.clone(), project.clone())),
            _ => None,
        };
        IntentExecutor::new(self.tracker.clone(), board)
    }

    pub fn machine(&self) -> WorkflowMachine {
        WorkflowMachine::new(&self.settings.workflow)
    }
}
