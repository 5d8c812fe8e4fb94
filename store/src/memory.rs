//! In-memory backend.
//!
//! The default for tests and test mode. All state lives behind one
//! `RwLock`; a transaction takes the write half for its whole lifetime,
//! which serialises the read-allocate-write sequences (revision
//! allocation, service and task-set creation). Rollback restores a
//! snapshot taken at begin.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stevedore_model::*;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::cursor::paginate;
use crate::error::{Result, StoreError};
use crate::filter::*;
use crate::traits::*;

#[derive(Default, Clone)]
struct MemoryState {
    clusters: HashMap<String, Cluster>,
    task_definitions: HashMap<(String, i32), TaskDefinition>,
    tasks: HashMap<(String, String), Task>,
    services: HashMap<(String, String), Service>,
    task_sets: HashMap<(String, String), TaskSet>,
    container_instances: HashMap<(String, String), ContainerInstance>,
    attributes: Vec<(String, Attribute)>,
    load_balancers: HashMap<String, LoadBalancer>,
    target_groups: HashMap<String, TargetGroup>,
    listeners: HashMap<String, Listener>,
    rules: HashMap<String, Rule>,
    targets: Vec<Target>,
    task_logs: Vec<TaskLog>,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_created_arn<T>(items: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, String)) {
    items.sort_by_key(key);
}

fn bump(label: &str, stored_version: i64, incoming_version: i64) -> Result<i64> {
    if stored_version != incoming_version {
        return Err(StoreError::StaleVersion(label.to_string()));
    }
    Ok(stored_version + 1)
}

#[async_trait]
impl ClusterStore for MemoryStorage {
    async fn create(&self, cluster: &Cluster) -> Result<()> {
        let mut state = self.state.write().await;
        if state.clusters.contains_key(&cluster.cluster_name) {
            return Err(StoreError::Conflict(cluster.cluster_name.clone()));
        }
        state
            .clusters
            .insert(cluster.cluster_name.clone(), cluster.clone());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Cluster>> {
        Ok(self.state.read().await.clusters.get(name).cloned())
    }

    async fn list(&self, page: &PageRequest) -> Result<Page<Cluster>> {
        let mut items: Vec<Cluster> = self.state.read().await.clusters.values().cloned().collect();
        sort_created_arn(&mut items, |c| (c.created_at, c.cluster_arn.clone()));
        paginate(items, &NoFilter {}, page.limit(), page.next_token.as_deref())
    }

    async fn update(&self, cluster: &Cluster) -> Result<Cluster> {
        let mut state = self.state.write().await;
        let stored = state
            .clusters
            .get_mut(&cluster.cluster_name)
            .ok_or_else(|| StoreError::NotFound(cluster.cluster_name.clone()))?;
        let version = bump(&cluster.cluster_name, stored.version, cluster.version)?;
        *stored = Cluster {
            version,
            updated_at: Utc::now(),
            ..cluster.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.state
            .write()
            .await
            .clusters
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl TaskDefinitionStore for MemoryStorage {
    async fn get(&self, family: &str, revision: i32) -> Result<Option<TaskDefinition>> {
        Ok(self
            .state
            .read()
            .await
            .task_definitions
            .get(&(family.to_string(), revision))
            .cloned())
    }

    async fn get_latest_active(&self, family: &str) -> Result<Option<TaskDefinition>> {
        Ok(self
            .state
            .read()
            .await
            .task_definitions
            .values()
            .filter(|td| td.family == family && td.status == TaskDefinitionStatus::Active)
            .max_by_key(|td| td.revision)
            .cloned())
    }

    async fn list(
        &self,
        filter: &TaskDefinitionFilter,
        page: &PageRequest,
    ) -> Result<Page<TaskDefinition>> {
        let mut items: Vec<TaskDefinition> = self
            .state
            .read()
            .await
            .task_definitions
            .values()
            .filter(|td| {
                filter
                    .family_prefix
                    .as_deref()
                    .is_none_or(|p| td.family.starts_with(p))
                    && filter.status.is_none_or(|s| td.status == s)
            })
            .cloned()
            .collect();
        sort_created_arn(&mut items, |td| {
            (td.created_at, td.task_definition_arn.clone())
        });
        paginate(items, filter, page.limit(), page.next_token.as_deref())
    }

    async fn list_families(
        &self,
        filter: &FamilyFilter,
        page: &PageRequest,
    ) -> Result<Page<String>> {
        let mut families: Vec<String> = self
            .state
            .read()
            .await
            .task_definitions
            .values()
            .filter(|td| {
                filter
                    .family_prefix
                    .as_deref()
                    .is_none_or(|p| td.family.starts_with(p))
                    && filter.status.is_none_or(|s| td.status == s)
            })
            .map(|td| td.family.clone())
            .collect();
        families.sort();
        families.dedup();
        paginate(families, filter, page.limit(), page.next_token.as_deref())
    }

    async fn update(&self, td: &TaskDefinition) -> Result<TaskDefinition> {
        let mut state = self.state.write().await;
        let key = (td.family.clone(), td.revision);
        let stored = state
            .task_definitions
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(td.task_definition_arn.clone()))?;
        let version = bump(&td.task_definition_arn, stored.version, td.version)?;
        *stored = TaskDefinition {
            version,
            updated_at: Utc::now(),
            ..td.clone()
        };
        Ok(stored.clone())
    }
}

fn task_matches(task: &Task, filter: &TaskFilter) -> bool {
    if task.cluster_arn != filter.cluster_arn {
        return false;
    }
    if let Some(service) = &filter.service_name {
        let expected = format!("ecs-svc/{}", service);
        if task.started_by.as_deref() != Some(expected.as_str()) {
            return false;
        }
    }
    if let Some(family) = &filter.family {
        match stevedore_model::arn::family_and_revision(&task.task_definition_arn) {
            Ok((f, _)) if &f == family => {}
            _ => return false,
        }
    }
    if let Some(started_by) = &filter.started_by
        && task.started_by.as_deref() != Some(started_by.as_str())
    {
        return false;
    }
    if let Some(lt) = filter.launch_type
        && task.launch_type != lt
    {
        return false;
    }
    if let Some(ds) = filter.desired_status
        && task.desired_status != ds
    {
        return false;
    }
    true
}

#[async_trait]
impl TaskStore for MemoryStorage {
    async fn create(&self, task: &Task) -> Result<()> {
        let mut state = self.state.write().await;
        let key = (task.cluster_arn.clone(), task.task_id().to_string());
        if state.tasks.contains_key(&key) {
            return Err(StoreError::Conflict(task.task_arn.clone()));
        }
        state.tasks.insert(key, task.clone());
        Ok(())
    }

    async fn get(&self, cluster_arn: &str, task_id: &str) -> Result<Option<Task>> {
        Ok(self
            .state
            .read()
            .await
            .tasks
            .get(&(cluster_arn.to_string(), task_id.to_string()))
            .cloned())
    }

    async fn list(&self, filter: &TaskFilter, page: &PageRequest) -> Result<Page<Task>> {
        let mut items: Vec<Task> = self
            .state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| task_matches(t, filter))
            .cloned()
            .collect();
        sort_created_arn(&mut items, |t| (t.created_at, t.task_arn.clone()));
        paginate(items, filter, page.limit(), page.next_token.as_deref())
    }

    async fn list_all(&self) -> Result<Vec<Task>> {
        let mut items: Vec<Task> = self.state.read().await.tasks.values().cloned().collect();
        sort_created_arn(&mut items, |t| (t.created_at, t.task_arn.clone()));
        Ok(items)
    }

    async fn update(&self, task: &Task) -> Result<Task> {
        let mut state = self.state.write().await;
        let key = (task.cluster_arn.clone(), task.task_id().to_string());
        let stored = state
            .tasks
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(task.task_arn.clone()))?;
        let version = bump(&task.task_arn, stored.version, task.version)?;
        *stored = Task {
            version,
            updated_at: Utc::now(),
            ..task.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, cluster_arn: &str, task_id: &str) -> Result<()> {
        self.state
            .write()
            .await
            .tasks
            .remove(&(cluster_arn.to_string(), task_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }
}

#[async_trait]
impl ServiceStore for MemoryStorage {
    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<Service>> {
        Ok(self
            .state
            .read()
            .await
            .services
            .get(&(cluster_arn.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self, filter: &ServiceFilter, page: &PageRequest) -> Result<Page<Service>> {
        let mut items: Vec<Service> = self
            .state
            .read()
            .await
            .services
            .values()
            .filter(|s| {
                s.cluster_arn == filter.cluster_arn
                    && filter.launch_type.is_none_or(|lt| s.launch_type == lt)
            })
            .cloned()
            .collect();
        sort_created_arn(&mut items, |s| (s.created_at, s.service_arn.clone()));
        paginate(items, filter, page.limit(), page.next_token.as_deref())
    }

    async fn list_by_cluster(&self, cluster_arn: &str) -> Result<Vec<Service>> {
        let mut items: Vec<Service> = self
            .state
            .read()
            .await
            .services
            .values()
            .filter(|s| s.cluster_arn == cluster_arn)
            .cloned()
            .collect();
        sort_created_arn(&mut items, |s| (s.created_at, s.service_arn.clone()));
        Ok(items)
    }

    async fn update(&self, service: &Service) -> Result<Service> {
        let mut state = self.state.write().await;
        let key = (service.cluster_arn.clone(), service.service_name.clone());
        let stored = state
            .services
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(service.service_arn.clone()))?;
        let version = bump(&service.service_arn, stored.version, service.version)?;
        *stored = Service {
            version,
            updated_at: Utc::now(),
            ..service.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, cluster_arn: &str, name: &str) -> Result<()> {
        self.state
            .write()
            .await
            .services
            .remove(&(cluster_arn.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl TaskSetStore for MemoryStorage {
    async fn get(&self, service_arn: &str, id: &str) -> Result<Option<TaskSet>> {
        Ok(self
            .state
            .read()
            .await
            .task_sets
            .get(&(service_arn.to_string(), id.to_string()))
            .cloned())
    }

    async fn list(&self, service_arn: &str) -> Result<Vec<TaskSet>> {
        let mut items: Vec<TaskSet> = self
            .state
            .read()
            .await
            .task_sets
            .values()
            .filter(|ts| ts.service_arn == service_arn)
            .cloned()
            .collect();
        sort_created_arn(&mut items, |ts| (ts.created_at, ts.task_set_arn.clone()));
        Ok(items)
    }

    async fn list_all(&self) -> Result<Vec<TaskSet>> {
        let mut items: Vec<TaskSet> =
            self.state.read().await.task_sets.values().cloned().collect();
        sort_created_arn(&mut items, |ts| (ts.created_at, ts.task_set_arn.clone()));
        Ok(items)
    }

    async fn update(&self, task_set: &TaskSet) -> Result<TaskSet> {
        let mut state = self.state.write().await;
        let key = (task_set.service_arn.clone(), task_set.id.clone());
        let stored = state
            .task_sets
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(task_set.task_set_arn.clone()))?;
        let version = bump(&task_set.task_set_arn, stored.version, task_set.version)?;
        *stored = TaskSet {
            version,
            updated_at: Utc::now(),
            ..task_set.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, service_arn: &str, id: &str) -> Result<()> {
        self.state
            .write()
            .await
            .task_sets
            .remove(&(service_arn.to_string(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl ContainerInstanceStore for MemoryStorage {
    async fn create(&self, instance: &ContainerInstance) -> Result<()> {
        let mut state = self.state.write().await;
        let key = (instance.cluster_arn.clone(), instance.id().to_string());
        if state.container_instances.contains_key(&key) {
            return Err(StoreError::Conflict(instance.container_instance_arn.clone()));
        }
        state.container_instances.insert(key, instance.clone());
        Ok(())
    }

    async fn get(&self, cluster_arn: &str, id: &str) -> Result<Option<ContainerInstance>> {
        Ok(self
            .state
            .read()
            .await
            .container_instances
            .get(&(cluster_arn.to_string(), id.to_string()))
            .cloned())
    }

    async fn list(
        &self,
        filter: &ContainerInstanceFilter,
        page: &PageRequest,
    ) -> Result<Page<ContainerInstance>> {
        let mut items: Vec<ContainerInstance> = self
            .state
            .read()
            .await
            .container_instances
            .values()
            .filter(|ci| {
                ci.cluster_arn == filter.cluster_arn
                    && filter.status.as_deref().is_none_or(|s| ci.status == s)
            })
            .cloned()
            .collect();
        sort_created_arn(&mut items, |ci| {
            (ci.created_at, ci.container_instance_arn.clone())
        });
        paginate(items, filter, page.limit(), page.next_token.as_deref())
    }

    async fn list_by_cluster(&self, cluster_arn: &str) -> Result<Vec<ContainerInstance>> {
        let mut items: Vec<ContainerInstance> = self
            .state
            .read()
            .await
            .container_instances
            .values()
            .filter(|ci| ci.cluster_arn == cluster_arn)
            .cloned()
            .collect();
        sort_created_arn(&mut items, |ci| {
            (ci.created_at, ci.container_instance_arn.clone())
        });
        Ok(items)
    }

    async fn update(&self, instance: &ContainerInstance) -> Result<ContainerInstance> {
        let mut state = self.state.write().await;
        let key = (instance.cluster_arn.clone(), instance.id().to_string());
        let stored = state
            .container_instances
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(instance.container_instance_arn.clone()))?;
        let version = bump(
            &instance.container_instance_arn,
            stored.version,
            instance.version,
        )?;
        *stored = ContainerInstance {
            version,
            updated_at: Utc::now(),
            ..instance.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, cluster_arn: &str, id: &str) -> Result<()> {
        self.state
            .write()
            .await
            .container_instances
            .remove(&(cluster_arn.to_string(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl AttributeStore for MemoryStorage {
    async fn put(&self, cluster_arn: &str, attributes: &[Attribute]) -> Result<()> {
        let mut state = self.state.write().await;
        for attr in attributes {
            state.attributes.retain(|(c, a)| {
                !(c == cluster_arn && a.target_id == attr.target_id && a.name == attr.name)
            });
            state
                .attributes
                .push((cluster_arn.to_string(), attr.clone()));
        }
        Ok(())
    }

    async fn delete(&self, cluster_arn: &str, attributes: &[Attribute]) -> Result<()> {
        let mut state = self.state.write().await;
        for attr in attributes {
            state.attributes.retain(|(c, a)| {
                !(c == cluster_arn && a.target_id == attr.target_id && a.name == attr.name)
            });
        }
        Ok(())
    }

    async fn list(&self, filter: &AttributeFilter, page: &PageRequest) -> Result<Page<Attribute>> {
        let mut items: Vec<Attribute> = self
            .state
            .read()
            .await
            .attributes
            .iter()
            .filter(|(cluster, attr)| {
                filter.cluster_arn.as_deref().is_none_or(|c| cluster == c)
                    && attr.target_type.as_deref() == Some(filter.target_type.as_str())
                    && filter
                        .attribute_name
                        .as_deref()
                        .is_none_or(|n| attr.name == n)
                    && filter
                        .attribute_value
                        .as_deref()
                        .is_none_or(|v| attr.value.as_deref() == Some(v))
            })
            .map(|(_, attr)| attr.clone())
            .collect();
        items.sort_by_key(|a| (a.target_id.clone(), a.name.clone()));
        paginate(items, filter, page.limit(), page.next_token.as_deref())
    }
}

#[async_trait]
impl LoadBalancerStore for MemoryStorage {
    async fn create(&self, lb: &LoadBalancer) -> Result<()> {
        let mut state = self.state.write().await;
        if state.load_balancers.contains_key(&lb.load_balancer_name) {
            return Err(StoreError::Conflict(lb.load_balancer_name.clone()));
        }
        state
            .load_balancers
            .insert(lb.load_balancer_name.clone(), lb.clone());
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<LoadBalancer>> {
        Ok(self.state.read().await.load_balancers.get(name).cloned())
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<LoadBalancer>> {
        Ok(self
            .state
            .read()
            .await
            .load_balancers
            .values()
            .find(|lb| lb.load_balancer_arn == arn)
            .cloned())
    }

    async fn list(&self, page: &PageRequest) -> Result<Page<LoadBalancer>> {
        let mut items: Vec<LoadBalancer> = self
            .state
            .read()
            .await
            .load_balancers
            .values()
            .cloned()
            .collect();
        sort_created_arn(&mut items, |lb| {
            (lb.created_at, lb.load_balancer_arn.clone())
        });
        paginate(items, &NoFilter {}, page.limit(), page.next_token.as_deref())
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let name = state
            .load_balancers
            .values()
            .find(|lb| lb.load_balancer_arn == arn)
            .map(|lb| lb.load_balancer_name.clone())
            .ok_or_else(|| StoreError::NotFound(arn.to_string()))?;
        state.load_balancers.remove(&name);
        Ok(())
    }
}

#[async_trait]
impl TargetGroupStore for MemoryStorage {
    async fn create(&self, tg: &TargetGroup) -> Result<()> {
        let mut state = self.state.write().await;
        if state.target_groups.contains_key(&tg.target_group_name) {
            return Err(StoreError::Conflict(tg.target_group_name.clone()));
        }
        state
            .target_groups
            .insert(tg.target_group_name.clone(), tg.clone());
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<TargetGroup>> {
        Ok(self.state.read().await.target_groups.get(name).cloned())
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<TargetGroup>> {
        Ok(self
            .state
            .read()
            .await
            .target_groups
            .values()
            .find(|tg| tg.target_group_arn == arn)
            .cloned())
    }

    async fn list(&self, page: &PageRequest) -> Result<Page<TargetGroup>> {
        let mut items: Vec<TargetGroup> = self
            .state
            .read()
            .await
            .target_groups
            .values()
            .cloned()
            .collect();
        sort_created_arn(&mut items, |tg| (tg.created_at, tg.target_group_arn.clone()));
        paginate(items, &NoFilter {}, page.limit(), page.next_token.as_deref())
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let name = state
            .target_groups
            .values()
            .find(|tg| tg.target_group_arn == arn)
            .map(|tg| tg.target_group_name.clone())
            .ok_or_else(|| StoreError::NotFound(arn.to_string()))?;
        state.target_groups.remove(&name);
        state.targets.retain(|t| t.target_group_arn != arn);
        Ok(())
    }
}

#[async_trait]
impl ListenerStore for MemoryStorage {
    async fn create(&self, listener: &Listener) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .listeners
            .insert(listener.listener_arn.clone(), listener.clone());
        Ok(())
    }

    async fn get(&self, arn: &str) -> Result<Option<Listener>> {
        Ok(self.state.read().await.listeners.get(arn).cloned())
    }

    async fn list_by_load_balancer(&self, lb_arn: &str) -> Result<Vec<Listener>> {
        let mut items: Vec<Listener> = self
            .state
            .read()
            .await
            .listeners
            .values()
            .filter(|l| l.load_balancer_arn == lb_arn)
            .cloned()
            .collect();
        sort_created_arn(&mut items, |l| (l.created_at, l.listener_arn.clone()));
        Ok(items)
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .listeners
            .remove(arn)
            .ok_or_else(|| StoreError::NotFound(arn.to_string()))?;
        state.rules.retain(|_, r| r.listener_arn != arn);
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStorage {
    async fn create(&self, rule: &Rule) -> Result<()> {
        let mut state = self.state.write().await;
        state.rules.insert(rule.rule_arn.clone(), rule.clone());
        Ok(())
    }

    async fn get(&self, arn: &str) -> Result<Option<Rule>> {
        Ok(self.state.read().await.rules.get(arn).cloned())
    }

    async fn list_by_listener(&self, listener_arn: &str) -> Result<Vec<Rule>> {
        let mut items: Vec<Rule> = self
            .state
            .read()
            .await
            .rules
            .values()
            .filter(|r| r.listener_arn == listener_arn)
            .cloned()
            .collect();
        items.sort_by_key(|r| (r.priority_value(), r.rule_arn.clone()));
        Ok(items)
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        self.state
            .write()
            .await
            .rules
            .remove(arn)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(arn.to_string()))
    }
}

#[async_trait]
impl TargetStore for MemoryStorage {
    async fn register(&self, targets: &[Target]) -> Result<()> {
        let mut state = self.state.write().await;
        for target in targets {
            state.targets.retain(|t| {
                !(t.target_group_arn == target.target_group_arn && t.id == target.id)
            });
            state.targets.push(target.clone());
        }
        Ok(())
    }

    async fn deregister(&self, target_group_arn: &str, ids: &[String]) -> Result<()> {
        self.state.write().await.targets.retain(|t| {
            !(t.target_group_arn == target_group_arn && ids.contains(&t.id))
        });
        Ok(())
    }

    async fn list_by_group(&self, target_group_arn: &str) -> Result<Vec<Target>> {
        let mut items: Vec<Target> = self
            .state
            .read()
            .await
            .targets
            .iter()
            .filter(|t| t.target_group_arn == target_group_arn)
            .cloned()
            .collect();
        items.sort_by_key(|t| t.id.clone());
        Ok(items)
    }
}

#[async_trait]
impl TaskLogStore for MemoryStorage {
    async fn insert(&self, log: &TaskLog) -> Result<()> {
        self.state.write().await.task_logs.push(log.clone());
        Ok(())
    }

    async fn list_by_task(&self, task_arn: &str) -> Result<Vec<TaskLog>> {
        let mut items: Vec<TaskLog> = self
            .state
            .read()
            .await
            .task_logs
            .iter()
            .filter(|l| l.task_arn == task_arn)
            .cloned()
            .collect();
        items.sort_by_key(|l| l.created_at);
        Ok(items)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.task_logs.len();
        state.task_logs.retain(|l| l.created_at >= cutoff);
        Ok((before - state.task_logs.len()) as u64)
    }
}

pub struct MemoryTx {
    guard: OwnedRwLockWriteGuard<MemoryState>,
    snapshot: Option<MemoryState>,
    committed: bool,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.committed
            && let Some(snapshot) = self.snapshot.take()
        {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl StorageTx for MemoryTx {
    async fn max_revision(&mut self, family: &str) -> Result<i32> {
        Ok(self
            .guard
            .task_definitions
            .keys()
            .filter(|(f, _)| f == family)
            .map(|(_, rev)| *rev)
            .max()
            .unwrap_or(0))
    }

    async fn insert_task_definition(&mut self, td: &TaskDefinition) -> Result<()> {
        let key = (td.family.clone(), td.revision);
        if self.guard.task_definitions.contains_key(&key) {
            return Err(StoreError::Conflict(td.task_definition_arn.clone()));
        }
        self.guard.task_definitions.insert(key, td.clone());
        Ok(())
    }

    async fn get_service(&mut self, cluster_arn: &str, name: &str) -> Result<Option<Service>> {
        Ok(self
            .guard
            .services
            .get(&(cluster_arn.to_string(), name.to_string()))
            .cloned())
    }

    async fn insert_service(&mut self, service: &Service) -> Result<()> {
        let key = (service.cluster_arn.clone(), service.service_name.clone());
        if self.guard.services.contains_key(&key) {
            return Err(StoreError::Conflict(service.service_name.clone()));
        }
        self.guard.services.insert(key, service.clone());
        Ok(())
    }

    async fn insert_task_set(&mut self, task_set: &TaskSet) -> Result<()> {
        let key = (task_set.service_arn.clone(), task_set.id.clone());
        if self.guard.task_sets.contains_key(&key) {
            return Err(StoreError::Conflict(task_set.task_set_arn.clone()));
        }
        self.guard.task_sets.insert(key, task_set.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.committed = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Drop restores the snapshot.
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn clusters(&self) -> &dyn ClusterStore {
        self
    }
    fn task_definitions(&self) -> &dyn TaskDefinitionStore {
        self
    }
    fn tasks(&self) -> &dyn TaskStore {
        self
    }
    fn services(&self) -> &dyn ServiceStore {
        self
    }
    fn task_sets(&self) -> &dyn TaskSetStore {
        self
    }
    fn container_instances(&self) -> &dyn ContainerInstanceStore {
        self
    }
    fn attributes(&self) -> &dyn AttributeStore {
        self
    }
    fn load_balancers(&self) -> &dyn LoadBalancerStore {
        self
    }
    fn target_groups(&self) -> &dyn TargetGroupStore {
        self
    }
    fn listeners(&self) -> &dyn ListenerStore {
        self
    }
    fn rules(&self) -> &dyn RuleStore {
        self
    }
    fn targets(&self) -> &dyn TargetStore {
        self
    }
    fn task_logs(&self) -> &dyn TaskLogStore {
        self
    }

    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let guard = self.state.clone().write_owned().await;
        let snapshot = Some(guard.clone());
        Ok(Box::new(MemoryTx {
            guard,
            snapshot,
            committed: false,
        }))
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident() -> Identity {
        Identity::new("us-east-1", "000000000000")
    }

    fn cluster(name: &str) -> Cluster {
        let now = Utc::now();
        Cluster {
            cluster_arn: ident().cluster_arn(name),
            cluster_name: name.to_string(),
            status: ClusterStatus::Active,
            backing_cluster_name: String::new(),
            active_services_count: 0,
            running_tasks_count: 0,
            pending_tasks_count: 0,
            registered_container_instances_count: 0,
            tags: vec![],
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_cluster_create_conflict() {
        let store = MemoryStorage::new();
        store.clusters().create(&cluster("test")).await.unwrap();
        assert!(matches!(
            store.clusters().create(&cluster("test")).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let store = MemoryStorage::new();
        store.clusters().create(&cluster("test")).await.unwrap();

        let fresh = store.clusters().get("test").await.unwrap().unwrap();
        let updated = store.clusters().update(&fresh).await.unwrap();
        assert_eq!(updated.version, 1);

        // Replaying the original read must lose.
        assert!(matches!(
            store.clusters().update(&fresh).await,
            Err(StoreError::StaleVersion(_))
        ));
    }

    #[tokio::test]
    async fn test_tx_rollback_discards_writes() {
        let store = MemoryStorage::new();
        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();
        tx.insert_task_definition(&TaskDefinition {
            task_definition_arn: ident().task_definition_arn("web", 1),
            family: "web".into(),
            revision: 1,
            status: TaskDefinitionStatus::Active,
            container_definitions: vec![],
            network_mode: NetworkMode::Awsvpc,
            cpu: None,
            memory: None,
            volumes: vec![],
            placement_constraints: vec![],
            requires_compatibilities: vec![],
            execution_role_arn: None,
            task_role_arn: None,
            tags: vec![],
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            created_at: now,
            updated_at: now,
            version: 0,
        })
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert!(
            store
                .task_definitions()
                .get("web", 1)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_tx_commit_keeps_writes_and_revision_advances() {
        let store = MemoryStorage::new();
        for expected in 1..=2 {
            let mut tx = store.begin().await.unwrap();
            let revision = tx.max_revision("web").await.unwrap() + 1;
            assert_eq!(revision, expected);
            let now = Utc::now();
            tx.insert_task_definition(&TaskDefinition {
                task_definition_arn: ident().task_definition_arn("web", revision),
                family: "web".into(),
                revision,
                status: TaskDefinitionStatus::Active,
                container_definitions: vec![],
                network_mode: NetworkMode::Awsvpc,
                cpu: None,
                memory: None,
                volumes: vec![],
                placement_constraints: vec![],
                requires_compatibilities: vec![],
                execution_role_arn: None,
                task_role_arn: None,
                tags: vec![],
                region: "us-east-1".into(),
                account_id: "000000000000".into(),
                created_at: now,
                updated_at: now,
                version: 0,
            })
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }
        let latest = store
            .task_definitions()
            .get_latest_active("web")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.revision, 2);
    }
}
