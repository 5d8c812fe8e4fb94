//! Resource tagging, backed by the tag blobs on each entity.

use stevedore_model::{Tag, arn};

use crate::api::*;
use crate::core::Ecs;
use crate::error::{EcsError, Result};

impl Ecs {
    pub async fn tag_resource(&self, request: TagResourceRequest) -> Result<EmptyResponse> {
        self.edit_tags(&request.resource_arn, |tags| {
            for tag in &request.tags {
                tags.retain(|t| t.key != tag.key);
                tags.push(tag.clone());
            }
        })
        .await?;
        Ok(EmptyResponse {})
    }

    pub async fn untag_resource(&self, request: UntagResourceRequest) -> Result<EmptyResponse> {
        self.edit_tags(&request.resource_arn, |tags| {
            tags.retain(|t| !request.tag_keys.contains(&t.key));
        })
        .await?;
        Ok(EmptyResponse {})
    }

    pub async fn list_tags_for_resource(
        &self,
        request: ListTagsForResourceRequest,
    ) -> Result<ListTagsForResourceResponse> {
        let tags = match arn::resource_of(&request.resource_arn)
            .map_err(|e| EcsError::InvalidParameter(e.to_string()))?
        {
            ("cluster", name) => {
                self.storage
                    .clusters()
                    .get(name)
                    .await?
                    .ok_or(EcsError::ClusterNotFound)?
                    .tags
            }
            ("service", path) => self.service_by_path(path).await?.tags,
            ("task-definition", _) => {
                self.resolve_task_definition(&request.resource_arn)
                    .await?
                    .tags
            }
            (other, _) => {
                return Err(EcsError::InvalidParameter(format!(
                    "tagging is not supported for {} resources",
                    other
                )));
            }
        };
        Ok(ListTagsForResourceResponse { tags })
    }

    async fn edit_tags(&self, resource_arn: &str, edit: impl FnOnce(&mut Vec<Tag>)) -> Result<()> {
        match arn::resource_of(resource_arn)
            .map_err(|e| EcsError::InvalidParameter(e.to_string()))?
        {
            ("cluster", name) => {
                let mut cluster = self
                    .storage
                    .clusters()
                    .get(name)
                    .await?
                    .ok_or(EcsError::ClusterNotFound)?;
                edit(&mut cluster.tags);
                self.storage.clusters().update(&cluster).await?;
            }
            ("service", path) => {
                let mut service = self.service_by_path(path).await?;
                edit(&mut service.tags);
                self.storage.services().update(&service).await?;
            }
            ("task-definition", _) => {
                let mut task_definition = self.resolve_task_definition(resource_arn).await?;
                edit(&mut task_definition.tags);
                self.storage
                    .task_definitions()
                    .update(&task_definition)
                    .await?;
            }
            (other, _) => {
                return Err(EcsError::InvalidParameter(format!(
                    "tagging is not supported for {} resources",
                    other
                )));
            }
        }
        Ok(())
    }

    /// Service ARNs use the long `service/<cluster>/<name>` path.
    async fn service_by_path(&self, path: &str) -> Result<stevedore_model::Service> {
        let (cluster_name, service_name) = path
            .split_once('/')
            .ok_or_else(|| EcsError::InvalidParameter("malformed service ARN".into()))?;
        let cluster = self.require_cluster(Some(cluster_name)).await?;
        self.storage
            .services()
            .get(&cluster.cluster_arn, service_name)
            .await?
            .ok_or_else(|| EcsError::NotFound(format!("service {} not found", service_name)))
    }
}
