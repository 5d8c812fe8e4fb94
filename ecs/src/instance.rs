//! Container-instance and attribute operations (simulated nodes).

use chrono::Utc;
use stevedore_model::{Attribute, ContainerInstance, TaskStatus, arn};
use stevedore_store::{AttributeFilter, ContainerInstanceFilter, PageRequest};

use crate::api::*;
use crate::core::Ecs;
use crate::error::{EcsError, Result};

const INSTANCE_STATUSES: [&str; 3] = ["ACTIVE", "DRAINING", "INACTIVE"];

impl Ecs {
    pub async fn register_container_instance(
        &self,
        request: RegisterContainerInstanceRequest,
    ) -> Result<ContainerInstanceResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let id = arn::random_task_id();
        let now = Utc::now();
        let instance = ContainerInstance {
            container_instance_arn: self
                .identity
                .container_instance_arn(&cluster.cluster_name, &id),
            cluster_arn: cluster.cluster_arn.clone(),
            ec2_instance_id: request
                .instance_identity_document
                .as_deref()
                .and_then(instance_id_from_document),
            status: "ACTIVE".to_string(),
            agent_connected: true,
            running_tasks_count: 0,
            pending_tasks_count: 0,
            attributes: request.attributes.clone(),
            registered_resources: request.total_resources,
            version_info: request.version_info,
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.storage.container_instances().create(&instance).await?;

        if !request.attributes.is_empty() {
            let attributes: Vec<Attribute> = request
                .attributes
                .iter()
                .map(|a| Attribute {
                    target_type: Some("container-instance".into()),
                    target_id: Some(id.clone()),
                    ..a.clone()
                })
                .collect();
            self.storage
                .attributes()
                .put(&cluster.cluster_arn, &attributes)
                .await?;
        }
        Ok(ContainerInstanceResponse {
            container_instance: instance,
        })
    }

    pub async fn deregister_container_instance(
        &self,
        request: DeregisterContainerInstanceRequest,
    ) -> Result<ContainerInstanceResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let id = arn::container_instance_id(&request.container_instance);
        let mut instance = self
            .storage
            .container_instances()
            .get(&cluster.cluster_arn, id)
            .await?
            .ok_or_else(|| {
                EcsError::NotFound(format!("container instance {} not found", id))
            })?;

        let instance_counts = self.with_instance_counts(instance.clone()).await?;
        if instance_counts.running_tasks_count > 0 && !request.force {
            return Err(EcsError::FailedPrecondition(
                "container instance has running tasks; use force".into(),
            ));
        }
        self.storage
            .container_instances()
            .delete(&cluster.cluster_arn, id)
            .await?;
        instance.status = "INACTIVE".to_string();
        Ok(ContainerInstanceResponse {
            container_instance: instance,
        })
    }

    pub async fn describe_container_instances(
        &self,
        request: DescribeContainerInstancesRequest,
    ) -> Result<DescribeContainerInstancesResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let mut container_instances = Vec::new();
        let mut failures = Vec::new();
        for identifier in &request.container_instances {
            let id = arn::container_instance_id(identifier);
            match self
                .storage
                .container_instances()
                .get(&cluster.cluster_arn, id)
                .await?
            {
                Some(instance) => {
                    container_instances.push(self.with_instance_counts(instance).await?)
                }
                None => failures.push(Failure::missing(
                    self.identity
                        .container_instance_arn(&cluster.cluster_name, id),
                )),
            }
        }
        Ok(DescribeContainerInstancesResponse {
            container_instances,
            failures,
        })
    }

    pub async fn list_container_instances(
        &self,
        request: ListContainerInstancesRequest,
    ) -> Result<ListContainerInstancesResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let filter = ContainerInstanceFilter {
            cluster_arn: cluster.cluster_arn.clone(),
            status: request.status,
        };
        let page = self
            .storage
            .container_instances()
            .list(
                &filter,
                &PageRequest {
                    max_results: request.max_results,
                    next_token: request.next_token,
                },
            )
            .await?;
        Ok(ListContainerInstancesResponse {
            container_instance_arns: page
                .items
                .into_iter()
                .map(|ci| ci.container_instance_arn)
                .collect(),
            next_token: page.next_token,
        })
    }

    pub async fn update_container_instances_state(
        &self,
        request: UpdateContainerInstancesStateRequest,
    ) -> Result<DescribeContainerInstancesResponse> {
        if !INSTANCE_STATUSES.contains(&request.status.as_str()) {
            return Err(EcsError::InvalidParameter(format!(
                "invalid container instance status {}",
                request.status
            )));
        }
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let mut container_instances = Vec::new();
        let mut failures = Vec::new();
        for identifier in &request.container_instances {
            let id = arn::container_instance_id(identifier);
            match self
                .storage
                .container_instances()
                .get(&cluster.cluster_arn, id)
                .await?
            {
                Some(instance) => {
                    let mut next = instance.clone();
                    next.status = request.status.clone();
                    match self.storage.container_instances().update(&next).await {
                        Ok(persisted) => container_instances.push(persisted),
                        Err(e) => failures.push(Failure {
                            arn: instance.container_instance_arn.clone(),
                            reason: "UPDATE_FAILED".into(),
                            detail: Some(e.to_string()),
                        }),
                    }
                }
                None => failures.push(Failure::missing(
                    self.identity
                        .container_instance_arn(&cluster.cluster_name, id),
                )),
            }
        }
        Ok(DescribeContainerInstancesResponse {
            container_instances,
            failures,
        })
    }

    pub async fn put_attributes(&self, request: PutAttributesRequest) -> Result<AttributesResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        for attribute in &request.attributes {
            if attribute.name.is_empty() {
                return Err(EcsError::InvalidParameter(
                    "attribute name is required".into(),
                ));
            }
        }
        let attributes: Vec<Attribute> = request
            .attributes
            .iter()
            .map(|a| Attribute {
                target_type: a
                    .target_type
                    .clone()
                    .or_else(|| Some("container-instance".into())),
                ..a.clone()
            })
            .collect();
        self.storage
            .attributes()
            .put(&cluster.cluster_arn, &attributes)
            .await?;
        Ok(AttributesResponse { attributes })
    }

    pub async fn delete_attributes(
        &self,
        request: DeleteAttributesRequest,
    ) -> Result<AttributesResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        self.storage
            .attributes()
            .delete(&cluster.cluster_arn, &request.attributes)
            .await?;
        Ok(AttributesResponse {
            attributes: request.attributes,
        })
    }

    pub async fn list_attributes(
        &self,
        request: ListAttributesRequest,
    ) -> Result<ListAttributesResponse> {
        if request.target_type.is_empty() {
            return Err(EcsError::InvalidParameter("targetType is required".into()));
        }
        let cluster_arn = match request.cluster.as_deref() {
            Some(identifier) => Some(self.require_cluster(Some(identifier)).await?.cluster_arn),
            None => None,
        };
        let filter = AttributeFilter {
            cluster_arn,
            target_type: request.target_type,
            attribute_name: request.attribute_name,
            attribute_value: request.attribute_value,
        };
        let page = self
            .storage
            .attributes()
            .list(
                &filter,
                &PageRequest {
                    max_results: request.max_results,
                    next_token: request.next_token,
                },
            )
            .await?;
        Ok(ListAttributesResponse {
            attributes: page.items,
            next_token: page.next_token,
        })
    }

    async fn with_instance_counts(
        &self,
        mut instance: ContainerInstance,
    ) -> Result<ContainerInstance> {
        let tasks = self.storage.tasks().list_all().await?;
        let mut running = 0;
        let mut pending = 0;
        for task in tasks.iter().filter(|t| {
            t.container_instance_arn.as_deref() == Some(instance.container_instance_arn.as_str())
        }) {
            match task.last_status {
                TaskStatus::Running => running += 1,
                TaskStatus::Provisioning | TaskStatus::Pending => pending += 1,
                _ => {}
            }
        }
        instance.running_tasks_count = running;
        instance.pending_tasks_count = pending;
        Ok(instance)
    }
}

/// The identity document is opaque JSON from the agent; only the EC2
/// instance id is worth extracting.
fn instance_id_from_document(document: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(document)
        .ok()?
        .get("instanceId")?
        .as_str()
        .map(String::from)
}
