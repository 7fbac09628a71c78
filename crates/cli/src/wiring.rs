//! Builds the adapters behind every port from settings and environment.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use github::{GitHubClient, GitHubProjectBoard};
use nodes::prompts::PromptEngine;
use nodes::{LlmGateway, NodeContext};
use pipeline::config::Settings;
use pipeline::ports::{ProjectBoard, TrackerError};
use pipeline::{PipelineRunId, RepositoryId, TaskwrightError};
use tracing::{info, warn};
use worktree::{CommandFormatter, FsWorkingTree, GitRepository, TreeSitterValidator};

const TOKEN_VARS: [&str; 2] = ["GITHUB_TOKEN", "GH_TOKEN"];
const REPOSITORY_VAR: &str = "GITHUB_REPOSITORY";

pub fn repository_token(env: impl Fn(&str) -> Option<String>) -> Option<String> {
    TOKEN_VARS
        .iter()
        .find_map(|name| env(name).filter(|v| !v.trim().is_empty()))
}

pub fn repository_id(env: impl Fn(&str) -> Option<String>) -> Result<RepositoryId, TaskwrightError> {
    env(REPOSITORY_VAR)
        .and_then(RepositoryId::new)
        .filter(|r| r.owner_and_name().is_some())
        .ok_or_else(|| TaskwrightError::ConfigurationError {
            message: format!("{REPOSITORY_VAR} must be set to owner/repo"),
        })
}

/// Everything the agent commands need. Fails with a configuration error
/// naming the missing variable.
pub fn build_context(settings: Settings, root: &Path) -> Result<NodeContext, TaskwrightError> {
    let env = |name: &str| std::env::var(name).ok();
    let token = repository_token(env).ok_or(TaskwrightError::Tracker(TrackerError::MissingToken))?;
    let repository = repository_id(env)?;
    let client = GitHubClient::new(token, &repository)?;
    let provider = llm::select_provider(&settings.llm)?;

    let board: Option<Arc<dyn ProjectBoard>> = match &settings.project {
        Some(project) => Some(Arc::new(GitHubProjectBoard::new(client.clone(), project))),
        None => {
            warn!("no [project] section, project status mirroring disabled");
            None
        }
    };

    let formatter = CommandFormatter::new(
        settings.reface.formatters.clone(),
        Duration::from_secs(settings.reface.format_timeout_secs),
    );
    let client = Arc::new(client);
    let run_id = PipelineRunId::new_random();
    info!(repository = %repository, provider = provider.name(), run_id = %run_id, "adapters ready");

    Ok(NodeContext {
        llm: LlmGateway::new(provider, &settings.llm),
        settings: Arc::new(settings),
        tracker: client.clone(),
        pulls: client,
        board,
        tree: Arc::new(FsWorkingTree::new(root)),
        repo: Arc::new(GitRepository::new(root)),
        validator: Arc::new(TreeSitterValidator::new()),
        formatter: Arc::new(formatter),
        prompts: Arc::new(PromptEngine::new()),
        run_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
    }

    #[test]
    fn github_token_wins_over_gh_token() {
        let env = env_with(&[("GH_TOKEN", "b"), ("GITHUB_TOKEN", "a")]);
        assert_eq!(repository_token(env).as_deref(), Some("a"));
        let env = env_with(&[("GITHUB_TOKEN", " "), ("GH_TOKEN", "b")]);
        assert_eq!(repository_token(env).as_deref(), Some("b"));
        assert_eq!(repository_token(env_with(&[])), None);
    }

    #[test]
    fn repository_must_be_owner_slash_name() {
        let ok = repository_id(env_with(&[("GITHUB_REPOSITORY", "acme/widgets")])).expect("valid");
        assert_eq!(ok.as_str(), "acme/widgets");
        assert!(matches!(
            repository_id(env_with(&[("GITHUB_REPOSITORY", "widgets")])),
            Err(TaskwrightError::ConfigurationError { .. })
        ));
        assert!(repository_id(env_with(&[])).is_err());
    }
}
