//! Project board status mirroring over GraphQL (Projects v2).

use async_trait::async_trait;
use pipeline::config::ProjectSettings;
use pipeline::ports::{ProjectBoard, TrackerError};
use pipeline::{ProjectId, StatusFieldId, StatusOptionId};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::client::GitHubClient;

/// Adding an issue that is already on the board returns the existing item.
const ADD_ITEM: &str = r#"
mutation($project: ID!, $content: ID!) {
  addProjectV2ItemById(input: {projectId: $project, contentId: $content}) {
    item { id }
  }
}"#;

const SET_STATUS: &str = r#"
mutation($project: ID!, $item: ID!, $field: ID!, $option: String!) {
  updateProjectV2ItemFieldValue(input: {
    projectId: $project,
    itemId: $item,
    fieldId: $field,
    value: {singleSelectOptionId: $option}
  }) {
    projectV2Item { id }
  }
}"#;

pub struct GitHubProjectBoard {
    client: GitHubClient,
    project_id: ProjectId,
    status_field_id: StatusFieldId,
}

impl GitHubProjectBoard {
    pub fn new(client: GitHubClient, settings: &ProjectSettings) -> Self {
        Self {
            client,
            project_id: settings.project_id.clone(),
            status_field_id: settings.status_field_id.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddItemData {
    add_project_v2_item_by_id: AddItemPayload,
}

#[derive(Deserialize)]
struct AddItemPayload {
    item: ItemRef,
}

#[derive(Deserialize)]
struct ItemRef {
    id: String,
}

#[async_trait]
impl ProjectBoard for GitHubProjectBoard {
    async fn set_status(&self, number: u64, option: &StatusOptionId) -> Result<(), TrackerError> {
        let issue = self.client.issue_dto(number).await?;
        if issue.node_id.is_empty() {
            return Err(TrackerError::InvalidResponse {
                operation: format!("get issue #{number}"),
                reason: "issue has no node id".into(),
            });
        }

        let added: AddItemData = self
            .client
            .graphql(
                &format!("add #{number} to project"),
                ADD_ITEM,
                json!({ "project": self.project_id.as_str(), "content": issue.node_id }),
            )
            .await?;
        let item = added.add_project_v2_item_by_id.item.id;

        let _: serde_json::Value = self
            .client
            .graphql(
                &format!("set project status of #{number}"),
                SET_STATUS,
                json!({
                    "project": self.project_id.as_str(),
                    "item": item,
                    "field": self.status_field_id.as_str(),
                    "option": option.as_str(),
                }),
            )
            .await?;
        debug!(number, option = %option, "project status mirrored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_item_payload_decodes() {
        let data: AddItemData =
            serde_json::from_str(r#"{"addProjectV2ItemById": {"item": {"id": "PVTI_lADO"}}}"#).expect("decode");
        assert_eq!(data.add_project_v2_item_by_id.item.id, "PVTI_lADO");
    }
}
