//! Typed store traits.
//!
//! Getters return `Ok(None)` for absent rows; `StoreError::NotFound` is
//! reserved for operations whose contract requires the row to exist
//! (optimistic updates, deletes). `update` enforces the version counter:
//! the caller passes the entity as read, the store bumps `version` and
//! fails with `StaleVersion` when the stored counter moved underneath it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stevedore_model::*;

use crate::error::Result;
use crate::filter::*;

#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn create(&self, cluster: &Cluster) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Option<Cluster>>;
    async fn list(&self, page: &PageRequest) -> Result<Page<Cluster>>;
    async fn update(&self, cluster: &Cluster) -> Result<Cluster>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait TaskDefinitionStore: Send + Sync {
    async fn get(&self, family: &str, revision: i32) -> Result<Option<TaskDefinition>>;
    /// Highest-revision ACTIVE of the family.
    async fn get_latest_active(&self, family: &str) -> Result<Option<TaskDefinition>>;
    async fn list(
        &self,
        filter: &TaskDefinitionFilter,
        page: &PageRequest,
    ) -> Result<Page<TaskDefinition>>;
    async fn list_families(&self, filter: &FamilyFilter, page: &PageRequest)
    -> Result<Page<String>>;
    async fn update(&self, td: &TaskDefinition) -> Result<TaskDefinition>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &Task) -> Result<()>;
    async fn get(&self, cluster_arn: &str, task_id: &str) -> Result<Option<Task>>;
    async fn list(&self, filter: &TaskFilter, page: &PageRequest) -> Result<Page<Task>>;
    /// Every persisted task regardless of cluster, for startup restore.
    async fn list_all(&self) -> Result<Vec<Task>>;
    async fn update(&self, task: &Task) -> Result<Task>;
    async fn delete(&self, cluster_arn: &str, task_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<Service>>;
    async fn list(&self, filter: &ServiceFilter, page: &PageRequest) -> Result<Page<Service>>;
    /// Every service in the cluster, unpaged, for derived counts.
    async fn list_by_cluster(&self, cluster_arn: &str) -> Result<Vec<Service>>;
    async fn update(&self, service: &Service) -> Result<Service>;
    async fn delete(&self, cluster_arn: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait TaskSetStore: Send + Sync {
    async fn get(&self, service_arn: &str, id: &str) -> Result<Option<TaskSet>>;
    async fn list(&self, service_arn: &str) -> Result<Vec<TaskSet>>;
    async fn list_all(&self) -> Result<Vec<TaskSet>>;
    async fn update(&self, task_set: &TaskSet) -> Result<TaskSet>;
    async fn delete(&self, service_arn: &str, id: &str) -> Result<()>;
}

#[async_trait]
pub trait ContainerInstanceStore: Send + Sync {
    async fn create(&self, instance: &ContainerInstance) -> Result<()>;
    async fn get(&self, cluster_arn: &str, id: &str) -> Result<Option<ContainerInstance>>;
    async fn list(
        &self,
        filter: &ContainerInstanceFilter,
        page: &PageRequest,
    ) -> Result<Page<ContainerInstance>>;
    /// Every instance in the cluster, unpaged, for derived counts.
    async fn list_by_cluster(&self, cluster_arn: &str) -> Result<Vec<ContainerInstance>>;
    async fn update(&self, instance: &ContainerInstance) -> Result<ContainerInstance>;
    async fn delete(&self, cluster_arn: &str, id: &str) -> Result<()>;
}

#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Upsert by (target_id, name).
    async fn put(&self, cluster_arn: &str, attributes: &[Attribute]) -> Result<()>;
    async fn delete(&self, cluster_arn: &str, attributes: &[Attribute]) -> Result<()>;
    async fn list(&self, filter: &AttributeFilter, page: &PageRequest) -> Result<Page<Attribute>>;
}

#[async_trait]
pub trait LoadBalancerStore: Send + Sync {
    async fn create(&self, lb: &LoadBalancer) -> Result<()>;
    async fn get_by_name(&self, name: &str) -> Result<Option<LoadBalancer>>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<LoadBalancer>>;
    async fn list(&self, page: &PageRequest) -> Result<Page<LoadBalancer>>;
    async fn delete(&self, arn: &str) -> Result<()>;
}

#[async_trait]
pub trait TargetGroupStore: Send + Sync {
    async fn create(&self, tg: &TargetGroup) -> Result<()>;
    async fn get_by_name(&self, name: &str) -> Result<Option<TargetGroup>>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<TargetGroup>>;
    async fn list(&self, page: &PageRequest) -> Result<Page<TargetGroup>>;
    async fn delete(&self, arn: &str) -> Result<()>;
}

#[async_trait]
pub trait ListenerStore: Send + Sync {
    async fn create(&self, listener: &Listener) -> Result<()>;
    async fn get(&self, arn: &str) -> Result<Option<Listener>>;
    async fn list_by_load_balancer(&self, lb_arn: &str) -> Result<Vec<Listener>>;
    async fn delete(&self, arn: &str) -> Result<()>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn create(&self, rule: &Rule) -> Result<()>;
    async fn get(&self, arn: &str) -> Result<Option<Rule>>;
    /// Rules in stable priority order; the default rule sorts last.
    async fn list_by_listener(&self, listener_arn: &str) -> Result<Vec<Rule>>;
    async fn delete(&self, arn: &str) -> Result<()>;
}

#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn register(&self, targets: &[Target]) -> Result<()>;
    async fn deregister(&self, target_group_arn: &str, ids: &[String]) -> Result<()>;
    async fn list_by_group(&self, target_group_arn: &str) -> Result<Vec<Target>>;
}

#[async_trait]
pub trait TaskLogStore: Send + Sync {
    async fn insert(&self, log: &TaskLog) -> Result<()>;
    async fn list_by_task(&self, task_arn: &str) -> Result<Vec<TaskLog>>;
    /// Returns the number of rows pruned.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Writes that must commit or roll back together: task-definition revision
/// allocation, service creation, task-set creation. The handle serialises
/// the read-allocate-write sequence against concurrent writers.
///
/// Dropping an uncommitted transaction rolls it back.
#[async_trait]
pub trait StorageTx: Send {
    /// Highest revision ever allocated for the family, 0 when none.
    /// The read locks the family until commit.
    async fn max_revision(&mut self, family: &str) -> Result<i32>;
    async fn insert_task_definition(&mut self, td: &TaskDefinition) -> Result<()>;
    async fn get_service(&mut self, cluster_arn: &str, name: &str) -> Result<Option<Service>>;
    async fn insert_service(&mut self, service: &Service) -> Result<()>;
    async fn insert_task_set(&mut self, task_set: &TaskSet) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// The bundle of typed stores a backend provides.
#[async_trait]
pub trait Storage: Send + Sync {
    fn clusters(&self) -> &dyn ClusterStore;
    fn task_definitions(&self) -> &dyn TaskDefinitionStore;
    fn tasks(&self) -> &dyn TaskStore;
    fn services(&self) -> &dyn ServiceStore;
    fn task_sets(&self) -> &dyn TaskSetStore;
    fn container_instances(&self) -> &dyn ContainerInstanceStore;
    fn attributes(&self) -> &dyn AttributeStore;
    fn load_balancers(&self) -> &dyn LoadBalancerStore;
    fn target_groups(&self) -> &dyn TargetGroupStore;
    fn listeners(&self) -> &dyn ListenerStore;
    fn rules(&self) -> &dyn RuleStore;
    fn targets(&self) -> &dyn TargetStore;
    fn task_logs(&self) -> &dyn TaskLogStore;

    async fn begin(&self) -> Result<Box<dyn StorageTx>>;

    /// Liveness probe for the detailed health endpoint.
    async fn healthy(&self) -> bool;
}
