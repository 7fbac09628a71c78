//! `IssueTracker` over the REST issues and comments endpoints.

use async_trait::async_trait;
use pipeline::ports::{Issue, IssueComment, IssueState, IssueTracker, NewIssue, TrackerError};
use pipeline::LabelName;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::client::GitHubClient;

const PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
pub(crate) struct IssueDto {
    pub number: u64,
    #[serde(default)]
    pub node_id: String,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<LabelDto>,
    pub state: String,
}

#[derive(Deserialize)]
pub(crate) struct LabelDto {
    pub name: String,
}

#[derive(Deserialize)]
struct CommentDto {
    id: u64,
    body: Option<String>,
}

#[derive(Deserialize)]
struct Created {
    number: u64,
}

#[derive(Deserialize)]
struct CreatedComment {
    id: u64,
}

impl IssueDto {
    pub(crate) fn into_issue(self) -> Issue {
        Issue {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            labels: labels(self.labels),
            state: if self.state == "closed" {
                IssueState::Closed
            } else {
                IssueState::Open
            },
        }
    }
}

pub(crate) fn labels(dtos: Vec<LabelDto>) -> Vec<LabelName> {
    dtos.into_iter().filter_map(|l| LabelName::new(l.name)).collect()
}

impl GitHubClient {
    pub(crate) async fn issue_dto(&self, number: u64) -> Result<IssueDto, TrackerError> {
        let number_s = number.to_string();
        self.get(&format!("get issue #{number}"), self.repo_url(&["issues", &number_s]))
            .await
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn get_issue(&self, number: u64) -> Result<Issue, TrackerError> {
        Ok(self.issue_dto(number).await?.into_issue())
    }

    #[instrument(skip(self, issue), fields(title = %issue.title))]
    async fn create_issue(&self, issue: &NewIssue) -> Result<u64, TrackerError> {
        let body = json!({ "title": issue.title, "body": issue.body, "labels": issue.labels });
        let created: Created = self
            .send_json("create issue", Method::POST, self.repo_url(&["issues"]), Some(&body))
            .await?;
        debug!(number = created.number, "issue created");
        Ok(created.number)
    }

    async fn add_label(&self, number: u64, label: &str) -> Result<(), TrackerError> {
        let number_s = number.to_string();
        let body = json!({ "labels": [label] });
        let _: serde_json::Value = self
            .send_json(
                &format!("add label '{label}' to #{number}"),
                Method::POST,
                self.repo_url(&["issues", &number_s, "labels"]),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<(), TrackerError> {
        let number_s = number.to_string();
        let operation = format!("remove label '{label}' from #{number}");
        let url = self.repo_url(&["issues", &number_s, "labels", label]);
        match self.send_json::<serde_json::Value>(&operation, Method::DELETE, url, None).await {
            Ok(_) | Err(TrackerError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<IssueComment>, TrackerError> {
        let number_s = number.to_string();
        let operation = format!("list comments of #{number}");
        let mut comments = Vec::new();
        for page in 1.. {
            let mut url = self.repo_url(&["issues", &number_s, "comments"]);
            url.query_pairs_mut()
                .append_pair("per_page", &PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());
            let batch: Vec<CommentDto> = self.get(&operation, url).await?;
            let len = batch.len();
            comments.extend(batch.into_iter().map(|c| IssueComment {
                id: c.id,
                body: c.body.unwrap_or_default(),
            }));
            if len < PAGE_SIZE {
                break;
            }
        }
        Ok(comments)
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<u64, TrackerError> {
        let number_s = number.to_string();
        let payload = json!({ "body": body });
        let created: CreatedComment = self
            .send_json(
                &format!("comment on #{number}"),
                Method::POST,
                self.repo_url(&["issues", &number_s, "comments"]),
                Some(&payload),
            )
            .await?;
        Ok(created.id)
    }

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<(), TrackerError> {
        let id_s = comment_id.to_string();
        let payload = json!({ "body": body });
        let _: serde_json::Value = self
            .send_json(
                &format!("update comment {comment_id}"),
                Method::PATCH,
                self.repo_url(&["issues", "comments", &id_s]),
                Some(&payload),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_payload_maps_to_domain_issue() {
        let dto: IssueDto = serde_json::from_str(
            r#"{
                "number": 12,
                "node_id": "I_kwDO",
                "title": "Add calculator",
                "body": null,
                "labels": [{"name": "bot:analyze", "color": "ededed"}, {"name": ""}],
                "state": "closed"
            }"#,
        )
        .expect("decode");
        let issue = dto.into_issue();
        assert_eq!(issue.number, 12);
        assert_eq!(issue.body, "");
        assert_eq!(issue.state, IssueState::Closed);
        assert!(issue.has_label("bot:analyze"));
        assert_eq!(issue.labels.len(), 1);
    }
}
