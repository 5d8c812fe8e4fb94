//! Service operations.

use chrono::Utc;
use stevedore_model::{
    DeploymentControllerType, Service, ServiceStatus, arn,
};
use stevedore_store::{PageRequest, ServiceFilter, StoreError};

use crate::api::*;
use crate::core::Ecs;
use crate::error::{EcsError, Result};

const UPDATE_RETRIES: usize = 3;

impl Ecs {
    /// Idempotent by (cluster, name). Under the EXTERNAL controller no
    /// Deployment is created here; the primary task set's pods serve the
    /// service once `CreateTaskSet` runs.
    pub async fn create_service(&self, request: CreateServiceRequest) -> Result<ServiceResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        if request.service_name.is_empty() {
            return Err(EcsError::InvalidParameter("serviceName is required".into()));
        }
        let controller = request.deployment_controller.clone().unwrap_or_default();
        let external = controller.controller_type == DeploymentControllerType::External;

        let task_definition = match request.task_definition.as_deref() {
            Some(identifier) => Some(self.resolve_task_definition(identifier).await?),
            None if external => None,
            None => {
                return Err(EcsError::InvalidParameter(
                    "taskDefinition is required".into(),
                ));
            }
        };

        let now = Utc::now();
        let service = Service {
            service_arn: self
                .identity
                .service_arn(&cluster.cluster_name, &request.service_name),
            service_name: request.service_name.clone(),
            cluster_arn: cluster.cluster_arn.clone(),
            task_definition: task_definition
                .as_ref()
                .map(|td| td.task_definition_arn.clone())
                .unwrap_or_default(),
            desired_count: request.desired_count.unwrap_or(0),
            running_count: 0,
            pending_count: 0,
            status: ServiceStatus::Active,
            launch_type: request.launch_type.unwrap_or_default(),
            load_balancers: request.load_balancers,
            service_registries: request.service_registries,
            deployment_controller: controller,
            primary_task_set: None,
            platform_version: request.platform_version,
            tags: request.tags,
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let mut tx = self.storage.begin().await?;
        if let Some(existing) = tx
            .get_service(&cluster.cluster_arn, &request.service_name)
            .await?
        {
            tx.rollback().await?;
            let existing = self.with_service_counts(existing).await?;
            return Ok(ServiceResponse { service: existing });
        }
        tx.insert_service(&service).await?;
        tx.commit().await?;

        // Projection failures after commit don't fail the operation; the
        // accepted record is the ECS view of the world.
        if !external
            && let Some(td) = &task_definition
            && let Err(e) = self.coordinator.create_service_deployment(&service, td).await
        {
            tracing::error!(error = %e, service = %service.service_name, "deployment creation failed");
        }

        self.publish(
            "service_update",
            "service",
            &service.service_name,
            serde_json::to_value(&service).ok(),
        )
        .await;
        Ok(ServiceResponse { service })
    }

    pub async fn update_service(&self, request: UpdateServiceRequest) -> Result<ServiceResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let name = arn::service_name(&request.service).to_string();

        for _ in 0..UPDATE_RETRIES {
            let service = self
                .storage
                .services()
                .get(&cluster.cluster_arn, &name)
                .await?
                .ok_or_else(|| EcsError::NotFound(format!("service {} not found", name)))?;

            let mut next = service.clone();
            if let Some(desired) = request.desired_count {
                if desired < 0 {
                    return Err(EcsError::InvalidParameter(
                        "desiredCount must be non-negative".into(),
                    ));
                }
                next.desired_count = desired;
            }
            let task_definition = match request.task_definition.as_deref() {
                Some(identifier) => {
                    let td = self.resolve_task_definition(identifier).await?;
                    next.task_definition = td.task_definition_arn.clone();
                    Some(td)
                }
                None if next.task_definition.is_empty() => None,
                None => Some(self.resolve_task_definition(&next.task_definition).await?),
            };

            match self.storage.services().update(&next).await {
                Ok(persisted) => {
                    if persisted.deployment_controller.controller_type
                        != DeploymentControllerType::External
                        && let Some(td) = &task_definition
                        && let Err(e) = self
                            .coordinator
                            .create_service_deployment(&persisted, td)
                            .await
                    {
                        tracing::error!(error = %e, service = %name, "deployment update failed");
                    }
                    self.publish(
                        "service_update",
                        "service",
                        &persisted.service_name,
                        serde_json::to_value(&persisted).ok(),
                    )
                    .await;
                    let persisted = self.with_service_counts(persisted).await?;
                    return Ok(ServiceResponse { service: persisted });
                }
                Err(StoreError::StaleVersion(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EcsError::Internal("update service kept conflicting".into()))
    }

    pub async fn delete_service(&self, request: DeleteServiceRequest) -> Result<ServiceResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let name = arn::service_name(&request.service).to_string();
        let mut service = self
            .storage
            .services()
            .get(&cluster.cluster_arn, &name)
            .await?
            .ok_or_else(|| EcsError::NotFound(format!("service {} not found", name)))?;

        if service.desired_count > 0 && !request.force {
            return Err(EcsError::FailedPrecondition(
                "service has a non-zero desired count; scale to 0 or use force".into(),
            ));
        }

        if let Err(e) = self.coordinator.delete_service_deployment(&service).await {
            tracing::error!(error = %e, service = %name, "deployment deletion failed");
        }
        for task_set in self.storage.task_sets().list(&service.service_arn).await? {
            if let Err(e) = self.coordinator.delete_task_set(&task_set, &service).await {
                tracing::error!(error = %e, task_set = %task_set.id, "task set cleanup failed");
            }
            self.storage
                .task_sets()
                .delete(&service.service_arn, &task_set.id)
                .await?;
        }
        self.storage
            .services()
            .delete(&cluster.cluster_arn, &name)
            .await?;

        service.status = ServiceStatus::Inactive;
        self.publish(
            "service_update",
            "service",
            &service.service_name,
            serde_json::to_value(&service).ok(),
        )
        .await;
        Ok(ServiceResponse { service })
    }

    pub async fn describe_services(
        &self,
        request: DescribeServicesRequest,
    ) -> Result<DescribeServicesResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let mut services = Vec::new();
        let mut failures = Vec::new();
        for identifier in &request.services {
            let name = arn::service_name(identifier);
            match self
                .storage
                .services()
                .get(&cluster.cluster_arn, name)
                .await?
            {
                Some(service) => services.push(self.with_service_counts(service).await?),
                None => failures.push(Failure::missing(
                    self.identity.service_arn(&cluster.cluster_name, name),
                )),
            }
        }
        Ok(DescribeServicesResponse { services, failures })
    }

    pub async fn list_services(&self, request: ListServicesRequest) -> Result<ListServicesResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let filter = ServiceFilter {
            cluster_arn: cluster.cluster_arn.clone(),
            launch_type: request.launch_type,
        };
        let page = self
            .storage
            .services()
            .list(
                &filter,
                &PageRequest {
                    max_results: request.max_results,
                    next_token: request.next_token,
                },
            )
            .await?;
        Ok(ListServicesResponse {
            service_arns: page.items.into_iter().map(|s| s.service_arn).collect(),
            next_token: page.next_token,
        })
    }
}
