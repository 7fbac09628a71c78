//! `PullRequestManager` over the REST pulls endpoints.

use async_trait::async_trait;
use pipeline::ports::{NewPullRequest, PullRequest, PullRequestManager, TrackerError};
use pipeline::workflow::PullRequestState;
use pipeline::{BranchName, CommitSha, PullRequestId};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::client::{GitHubClient, DIFF_MEDIA_TYPE};
use crate::issues::{labels, LabelDto};

#[derive(Deserialize)]
struct PullDto {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    #[serde(default)]
    merged: bool,
    merged_at: Option<String>,
    head: RefDto,
    base: RefDto,
    #[serde(default)]
    labels: Vec<LabelDto>,
}

#[derive(Deserialize)]
struct RefDto {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Deserialize)]
struct Created {
    number: u64,
}

impl PullDto {
    fn into_pull_request(self) -> Result<PullRequest, TrackerError> {
        let number = self.number;
        let invalid = |reason: &str| TrackerError::InvalidResponse {
            operation: format!("read pull request #{number}"),
            reason: reason.to_string(),
        };
        // The list endpoint omits `merged`; `merged_at` is always present.
        let state = match self.state.as_str() {
            "open" => PullRequestState::Open,
            _ if self.merged || self.merged_at.is_some() => PullRequestState::Merged,
            _ => PullRequestState::Closed,
        };
        let head_branch = BranchName::new(self.head.name.clone()).ok_or_else(|| invalid("empty head ref"))?;
        let head_sha = CommitSha::new(self.head.sha.clone()).ok_or_else(|| invalid("empty head sha"))?;
        let base_branch = BranchName::new(self.base.name.clone()).ok_or_else(|| invalid("empty base ref"))?;
        Ok(PullRequest {
            number: PullRequestId::new(number),
            title: self.title,
            body: self.body.unwrap_or_default(),
            state,
            head_branch,
            head_sha,
            base_branch,
            labels: labels(self.labels),
        })
    }
}

#[async_trait]
impl PullRequestManager for GitHubClient {
    async fn get_pull_request(&self, number: PullRequestId) -> Result<PullRequest, TrackerError> {
        let n = number.as_u64().to_string();
        let dto: PullDto = self
            .get(&format!("get pull request {number}"), self.repo_url(&["pulls", &n]))
            .await?;
        dto.into_pull_request()
    }

    async fn get_diff(&self, number: PullRequestId) -> Result<String, TrackerError> {
        let n = number.as_u64().to_string();
        self.send_raw(
            &format!("get diff of {number}"),
            Method::GET,
            self.repo_url(&["pulls", &n]),
            DIFF_MEDIA_TYPE,
            None,
        )
        .await
    }

    async fn find_open_for_branch(&self, head: &BranchName) -> Result<Option<PullRequest>, TrackerError> {
        let mut url = self.repo_url(&["pulls"]);
        url.query_pairs_mut()
            .append_pair("state", "open")
            .append_pair("head", &format!("{}:{}", self.owner(), head));
        let dtos: Vec<PullDto> = self.get(&format!("find pull request for {head}"), url).await?;
        dtos.into_iter().next().map(PullDto::into_pull_request).transpose()
    }

    #[instrument(skip(self, pr), fields(head = %pr.head, base = %pr.base))]
    async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<PullRequestId, TrackerError> {
        let body = json!({
            "title": pr.title,
            "body": pr.body,
            "head": pr.head.as_str(),
            "base": pr.base.as_str(),
        });
        let created: Created = self
            .send_json("create pull request", Method::POST, self.repo_url(&["pulls"]), Some(&body))
            .await?;
        info!(number = created.number, "pull request opened");
        Ok(PullRequestId::new(created.number))
    }
}
