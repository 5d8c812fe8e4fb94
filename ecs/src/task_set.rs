//! Task-set operations (EXTERNAL deployment controller).

use chrono::Utc;
use stevedore_model::{
    DeploymentControllerType, Scale, ScaleUnit, Service, StabilityStatus, TaskSet, TaskSetStatus,
    arn,
};
use stevedore_store::StoreError;
use uuid::Uuid;

use crate::api::*;
use crate::core::Ecs;
use crate::error::{EcsError, Result};

const UPDATE_RETRIES: usize = 3;

impl Ecs {
    pub async fn create_task_set(&self, request: CreateTaskSetRequest) -> Result<TaskSetResponse> {
        let cluster = self.require_cluster(Some(&request.cluster)).await?;
        let service = self
            .require_external_service(&cluster.cluster_arn, &request.service)
            .await?;
        let task_definition = self
            .resolve_task_definition(&request.task_definition)
            .await?;

        let scale = request.scale.unwrap_or(Scale {
            value: 100.0,
            unit: ScaleUnit::Percent,
        });
        let id = format!("ecs-svc-{}", Uuid::new_v4().simple());
        let now = Utc::now();
        let task_set = TaskSet {
            task_set_arn: self.identity.task_set_arn(
                &cluster.cluster_name,
                &service.service_name,
                &id,
            ),
            id: id.clone(),
            service_arn: service.service_arn.clone(),
            cluster_arn: cluster.cluster_arn.clone(),
            external_id: request.external_id,
            task_definition: task_definition.task_definition_arn.clone(),
            computed_desired_count: scale.computed_desired_count(service.desired_count),
            scale,
            status: TaskSetStatus::Active,
            stability_status: StabilityStatus::Stabilizing,
            primary: false,
            running_count: 0,
            pending_count: 0,
            launch_type: request.launch_type.unwrap_or_default(),
            load_balancers: request.load_balancers,
            service_registries: request.service_registries,
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let mut tx = self.storage.begin().await?;
        tx.insert_task_set(&task_set).await?;
        tx.commit().await?;

        if let Err(e) = self
            .coordinator
            .apply_task_set(&task_set, &service, &task_definition)
            .await
        {
            tracing::error!(error = %e, task_set = %task_set.id, "task set projection failed");
        }

        self.publish(
            "service_update",
            "taskSet",
            &task_set.id,
            serde_json::to_value(&task_set).ok(),
        )
        .await;
        Ok(TaskSetResponse { task_set })
    }

    pub async fn update_task_set(&self, request: UpdateTaskSetRequest) -> Result<TaskSetResponse> {
        let cluster = self.require_cluster(Some(&request.cluster)).await?;
        let service = self
            .require_external_service(&cluster.cluster_arn, &request.service)
            .await?;
        let id = task_set_id(&request.task_set);

        for _ in 0..UPDATE_RETRIES {
            let task_set = self
                .storage
                .task_sets()
                .get(&service.service_arn, &id)
                .await?
                .ok_or_else(|| EcsError::NotFound(format!("task set {} not found", id)))?;

            let mut next = task_set.clone();
            next.scale = request.scale;
            next.computed_desired_count =
                request.scale.computed_desired_count(service.desired_count);
            next.stability_status = StabilityStatus::Stabilizing;

            match self.storage.task_sets().update(&next).await {
                Ok(persisted) => {
                    let task_definition = self
                        .resolve_task_definition(&persisted.task_definition)
                        .await?;
                    if let Err(e) = self
                        .coordinator
                        .apply_task_set(&persisted, &service, &task_definition)
                        .await
                    {
                        tracing::error!(error = %e, task_set = %persisted.id, "task set reprojection failed");
                    }
                    self.publish(
                        "service_update",
                        "taskSet",
                        &persisted.id,
                        serde_json::to_value(&persisted).ok(),
                    )
                    .await;
                    return Ok(TaskSetResponse {
                        task_set: persisted,
                    });
                }
                Err(StoreError::StaleVersion(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EcsError::Internal("update task set kept conflicting".into()))
    }

    /// Marks DRAINING, removes the Deployment, then deletes the record.
    pub async fn delete_task_set(&self, request: DeleteTaskSetRequest) -> Result<TaskSetResponse> {
        let cluster = self.require_cluster(Some(&request.cluster)).await?;
        let service = self
            .require_external_service(&cluster.cluster_arn, &request.service)
            .await?;
        let id = task_set_id(&request.task_set);
        let task_set = self
            .storage
            .task_sets()
            .get(&service.service_arn, &id)
            .await?
            .ok_or_else(|| EcsError::NotFound(format!("task set {} not found", id)))?;

        if task_set.primary && !request.force {
            return Err(EcsError::FailedPrecondition(
                "cannot delete the primary task set without force".into(),
            ));
        }

        let mut draining = task_set.clone();
        draining.status = TaskSetStatus::Draining;
        let draining = match self.storage.task_sets().update(&draining).await {
            Ok(persisted) => persisted,
            Err(StoreError::StaleVersion(_)) => draining,
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.coordinator.delete_task_set(&draining, &service).await {
            tracing::error!(error = %e, task_set = %draining.id, "task set teardown failed");
        }
        self.storage
            .task_sets()
            .delete(&service.service_arn, &id)
            .await?;

        self.publish(
            "service_update",
            "taskSet",
            &draining.id,
            serde_json::to_value(&draining).ok(),
        )
        .await;
        Ok(TaskSetResponse { task_set: draining })
    }

    pub async fn describe_task_sets(
        &self,
        request: DescribeTaskSetsRequest,
    ) -> Result<DescribeTaskSetsResponse> {
        let cluster = self.require_cluster(Some(&request.cluster)).await?;
        let service_name = arn::service_name(&request.service);
        let service = self
            .storage
            .services()
            .get(&cluster.cluster_arn, service_name)
            .await?
            .ok_or_else(|| EcsError::NotFound(format!("service {} not found", service_name)))?;

        let all = self.storage.task_sets().list(&service.service_arn).await?;
        if request.task_sets.is_empty() {
            return Ok(DescribeTaskSetsResponse {
                task_sets: all,
                failures: vec![],
            });
        }
        let mut task_sets = Vec::new();
        let mut failures = Vec::new();
        for identifier in &request.task_sets {
            let id = task_set_id(identifier);
            match all.iter().find(|ts| ts.id == id) {
                Some(ts) => task_sets.push(ts.clone()),
                None => failures.push(Failure::missing(self.identity.task_set_arn(
                    &cluster.cluster_name,
                    &service.service_name,
                    &id,
                ))),
            }
        }
        Ok(DescribeTaskSetsResponse {
            task_sets,
            failures,
        })
    }

    /// Makes one task set primary; its pods serve the service's endpoint.
    pub async fn update_service_primary_task_set(
        &self,
        request: UpdateServicePrimaryTaskSetRequest,
    ) -> Result<TaskSetResponse> {
        let cluster = self.require_cluster(Some(&request.cluster)).await?;
        let service = self
            .require_external_service(&cluster.cluster_arn, &request.service)
            .await?;
        let id = task_set_id(&request.primary_task_set);
        let target = self
            .storage
            .task_sets()
            .get(&service.service_arn, &id)
            .await?
            .ok_or_else(|| EcsError::NotFound(format!("task set {} not found", id)))?;

        for task_set in self.storage.task_sets().list(&service.service_arn).await? {
            if task_set.primary != (task_set.id == id) {
                let mut next = task_set.clone();
                next.primary = task_set.id == id;
                if let Err(e) = self.storage.task_sets().update(&next).await {
                    tracing::warn!(error = %e, task_set = %task_set.id, "primary flag update failed");
                }
            }
        }

        let mut service_next = service.clone();
        service_next.primary_task_set = Some(target.task_set_arn.clone());
        if let Err(e) = self.storage.services().update(&service_next).await {
            tracing::warn!(error = %e, service = %service.service_name, "primary task set write failed");
        }

        let task_set = self
            .storage
            .task_sets()
            .get(&service.service_arn, &id)
            .await?
            .unwrap_or(target);
        self.publish(
            "service_update",
            "taskSet",
            &task_set.id,
            serde_json::to_value(&task_set).ok(),
        )
        .await;
        Ok(TaskSetResponse { task_set })
    }

    async fn require_external_service(
        &self,
        cluster_arn: &str,
        identifier: &str,
    ) -> Result<Service> {
        let name = arn::service_name(identifier);
        let service = self
            .storage
            .services()
            .get(cluster_arn, name)
            .await?
            .ok_or_else(|| EcsError::NotFound(format!("service {} not found", name)))?;
        if service.deployment_controller.controller_type != DeploymentControllerType::External {
            return Err(EcsError::FailedPrecondition(
                "task sets require the EXTERNAL deployment controller".into(),
            ));
        }
        Ok(service)
    }
}

/// Task-set identifiers arrive as bare ids or full ARNs.
fn task_set_id(identifier: &str) -> String {
    if arn::is_arn(identifier) {
        identifier
            .rsplit('/')
            .next()
            .unwrap_or(identifier)
            .to_string()
    } else {
        identifier.to_string()
    }
}
