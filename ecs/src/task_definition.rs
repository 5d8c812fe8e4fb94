//! Task-definition operations.
//!
//! Revision allocation is the canonical transactional flow: the read of the
//! family's highest revision and the insert of the next one commit
//! together, so revisions are a contiguous, never-reused sequence.

use chrono::Utc;
use stevedore_model::{TaskDefinition, TaskDefinitionStatus};
use stevedore_store::{FamilyFilter, PageRequest, TaskDefinitionFilter};

use crate::api::*;
use crate::core::Ecs;
use crate::error::{EcsError, Result};

impl Ecs {
    pub async fn register_task_definition(
        &self,
        request: RegisterTaskDefinitionRequest,
    ) -> Result<TaskDefinitionResponse> {
        let family = request
            .family
            .as_deref()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| EcsError::InvalidParameter("family is required".into()))?
            .to_string();
        if request.container_definitions.is_empty() {
            return Err(EcsError::InvalidParameter(
                "containerDefinitions is required".into(),
            ));
        }
        for container in &request.container_definitions {
            if container.name.is_empty() || container.image.is_empty() {
                return Err(EcsError::InvalidParameter(
                    "container definitions need a name and an image".into(),
                ));
            }
        }

        let mut tx = self.storage.begin().await?;
        let revision = tx.max_revision(&family).await? + 1;
        let now = Utc::now();
        let task_definition = TaskDefinition {
            task_definition_arn: self.identity.task_definition_arn(&family, revision),
            family: family.clone(),
            revision,
            status: TaskDefinitionStatus::Active,
            container_definitions: request.container_definitions,
            network_mode: request.network_mode.unwrap_or_default(),
            cpu: request.cpu,
            memory: request.memory,
            volumes: request.volumes,
            placement_constraints: request.placement_constraints,
            requires_compatibilities: request.requires_compatibilities,
            execution_role_arn: request.execution_role_arn,
            task_role_arn: request.task_role_arn,
            tags: request.tags.clone(),
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        tx.insert_task_definition(&task_definition).await?;
        tx.commit().await?;

        tracing::info!(family = %family, revision, "registered task definition");
        Ok(TaskDefinitionResponse {
            tags: request.tags,
            task_definition,
        })
    }

    /// Marks INACTIVE and keeps the revision; running tasks keep their
    /// reference, new latest-active lookups skip it.
    pub async fn deregister_task_definition(
        &self,
        request: DeregisterTaskDefinitionRequest,
    ) -> Result<TaskDefinitionResponse> {
        let mut task_definition = self
            .resolve_task_definition(&request.task_definition)
            .await?;
        if task_definition.status == TaskDefinitionStatus::Active {
            task_definition.status = TaskDefinitionStatus::Inactive;
            task_definition = self
                .storage
                .task_definitions()
                .update(&task_definition)
                .await?;
        }
        Ok(TaskDefinitionResponse {
            tags: task_definition.tags.clone(),
            task_definition,
        })
    }

    pub async fn describe_task_definition(
        &self,
        request: DescribeTaskDefinitionRequest,
    ) -> Result<TaskDefinitionResponse> {
        let task_definition = self
            .resolve_task_definition(&request.task_definition)
            .await?;
        Ok(TaskDefinitionResponse {
            tags: task_definition.tags.clone(),
            task_definition,
        })
    }

    pub async fn list_task_definitions(
        &self,
        request: ListTaskDefinitionsRequest,
    ) -> Result<ListTaskDefinitionsResponse> {
        let filter = TaskDefinitionFilter {
            family_prefix: request.family_prefix,
            status: request.status,
        };
        let page = self
            .storage
            .task_definitions()
            .list(
                &filter,
                &PageRequest {
                    max_results: request.max_results,
                    next_token: request.next_token,
                },
            )
            .await?;
        Ok(ListTaskDefinitionsResponse {
            task_definition_arns: page
                .items
                .into_iter()
                .map(|td| td.task_definition_arn)
                .collect(),
            next_token: page.next_token,
        })
    }

    pub async fn list_task_definition_families(
        &self,
        request: ListTaskDefinitionFamiliesRequest,
    ) -> Result<ListTaskDefinitionFamiliesResponse> {
        let status = match request.status.as_deref() {
            None | Some("ALL") => None,
            Some("ACTIVE") => Some(TaskDefinitionStatus::Active),
            Some("INACTIVE") => Some(TaskDefinitionStatus::Inactive),
            Some(other) => {
                return Err(EcsError::InvalidParameter(format!(
                    "unknown status {}",
                    other
                )));
            }
        };
        let filter = FamilyFilter {
            family_prefix: request.family_prefix,
            status,
        };
        let page = self
            .storage
            .task_definitions()
            .list_families(
                &filter,
                &PageRequest {
                    max_results: request.max_results,
                    next_token: request.next_token,
                },
            )
            .await?;
        Ok(ListTaskDefinitionFamiliesResponse {
            families: page.items,
            next_token: page.next_token,
        })
    }
}
