//! The ECS operation surface, shared state and helpers.
//!
//! Operations live in sibling modules, one per resource family, all as
//! methods on [`Ecs`]. Derived counters are computed here on every read so
//! the stores never hold an authoritative copy.

use std::sync::Arc;

use chrono::Utc;
use stevedore_events::EventHub;
use stevedore_model::{
    Cluster, ClusterStatus, Event, Identity, Service, ServiceStatus, TaskDefinition, TaskStatus,
    arn,
};
use stevedore_orchestrator::Coordinator;
use stevedore_store::Storage;

use crate::error::{EcsError, Result};

pub const DEFAULT_CLUSTER: &str = "default";

pub struct Ecs {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) hub: EventHub,
    pub(crate) identity: Identity,
}

impl Ecs {
    pub fn new(
        storage: Arc<dyn Storage>,
        coordinator: Arc<Coordinator>,
        hub: EventHub,
        identity: Identity,
    ) -> Self {
        Self {
            storage,
            coordinator,
            hub,
            identity,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Resolve a cluster identifier (bare name, ARN, or absent for the
    /// default cluster) to its persisted record.
    pub(crate) async fn require_cluster(&self, identifier: Option<&str>) -> Result<Cluster> {
        let name = arn::cluster_name(identifier.unwrap_or(DEFAULT_CLUSTER));
        self.storage
            .clusters()
            .get(name)
            .await?
            .ok_or(EcsError::ClusterNotFound)
    }

    /// Resolve a task-definition identifier: full ARN, `family:revision`,
    /// or bare family (latest ACTIVE revision).
    pub(crate) async fn resolve_task_definition(&self, identifier: &str) -> Result<TaskDefinition> {
        let (family, revision) = arn::family_and_revision(identifier)
            .map_err(|e| EcsError::InvalidParameter(e.to_string()))?;
        let found = match revision {
            Some(revision) => self.storage.task_definitions().get(&family, revision).await?,
            None => {
                self.storage
                    .task_definitions()
                    .get_latest_active(&family)
                    .await?
            }
        };
        found.ok_or_else(|| {
            EcsError::NotFound(format!("task definition {} not found", identifier))
        })
    }

    /// Fill the derived counters on a cluster record.
    pub(crate) async fn with_cluster_counts(&self, mut cluster: Cluster) -> Result<Cluster> {
        let tasks = self.storage.tasks().list_all().await?;
        let mut running = 0;
        let mut pending = 0;
        for task in tasks.iter().filter(|t| t.cluster_arn == cluster.cluster_arn) {
            match task.last_status {
                TaskStatus::Running => running += 1,
                TaskStatus::Provisioning | TaskStatus::Pending => pending += 1,
                _ => {}
            }
        }
        cluster.running_tasks_count = running;
        cluster.pending_tasks_count = pending;

        let services = self
            .storage
            .services()
            .list_by_cluster(&cluster.cluster_arn)
            .await?;
        cluster.active_services_count = services
            .iter()
            .filter(|s| s.status == ServiceStatus::Active)
            .count() as i32;

        let instances = self
            .storage
            .container_instances()
            .list_by_cluster(&cluster.cluster_arn)
            .await?;
        cluster.registered_container_instances_count = instances.len() as i32;
        Ok(cluster)
    }

    /// Fill the derived running/pending counters on a service record.
    pub(crate) async fn with_service_counts(&self, mut service: Service) -> Result<Service> {
        let tasks = self.storage.tasks().list_all().await?;
        let started_by = format!("ecs-svc/{}", service.service_name);
        let mut running = 0;
        let mut pending = 0;
        for task in tasks.iter().filter(|t| {
            t.cluster_arn == service.cluster_arn
                && t.started_by.as_deref() == Some(started_by.as_str())
        }) {
            match task.last_status {
                TaskStatus::Running => running += 1,
                TaskStatus::Provisioning | TaskStatus::Pending => pending += 1,
                _ => {}
            }
        }
        service.running_count = running;
        service.pending_count = pending;
        Ok(service)
    }

    pub(crate) async fn publish(
        &self,
        event_type: &str,
        resource_type: &str,
        resource_id: &str,
        payload: Option<serde_json::Value>,
    ) {
        self.hub
            .publish(&Event::new(event_type, resource_type, resource_id, payload))
            .await;
    }

    pub(crate) fn new_cluster(&self, name: &str) -> Cluster {
        let now = Utc::now();
        Cluster {
            cluster_arn: self.identity.cluster_arn(name),
            cluster_name: name.to_string(),
            status: ClusterStatus::Active,
            backing_cluster_name: format!("{}-{}", name, self.identity.region),
            active_services_count: 0,
            running_tasks_count: 0,
            pending_tasks_count: 0,
            registered_container_instances_count: 0,
            tags: vec![],
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}
