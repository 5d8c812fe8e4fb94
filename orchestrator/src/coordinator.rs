//! Kubernetes coordinator: reifies persisted ECS state onto the cluster.
//!
//! Every mutation is written through the stores first; this module owns the
//! Kubernetes side effects and the invariant "persisted task <-> live pod".
//! With no client configured (test mode) it synthesises pod coordinates and
//! persists only; the lifecycle worker takes over from there.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service as K8sService};
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use stevedore_events::EventHub;
use stevedore_model::{
    Identity, KeyValuePair, Service, Task, TaskDefinition, TaskSet, TaskStatus, arn,
};
use stevedore_store::Storage;
use tokio::sync::OnceCell;

use crate::convert;
use crate::error::{Error, Result};
use crate::logs::collect_task_logs;
use crate::sd::ServiceRegistry;
use crate::watcher::{WatchContext, WatcherRegistry, spawn_pod_watcher};

const FIELD_MANAGER: &str = "stevedore";

/// How the coordinator reaches Kubernetes.
pub enum KubeAccess {
    /// Client built at startup.
    Live(Client),
    /// Client built on first use (container mode).
    Deferred(OnceCell<Client>),
    /// No Kubernetes I/O at all (test mode).
    Disabled,
}

pub struct Coordinator {
    storage: Arc<dyn Storage>,
    hub: EventHub,
    identity: Identity,
    access: KubeAccess,
    registry: WatcherRegistry,
    sd: Arc<dyn ServiceRegistry>,
}

impl Coordinator {
    pub fn new(
        storage: Arc<dyn Storage>,
        hub: EventHub,
        identity: Identity,
        access: KubeAccess,
        sd: Arc<dyn ServiceRegistry>,
    ) -> Self {
        Self {
            storage,
            hub,
            identity,
            access,
            registry: WatcherRegistry::default(),
            sd,
        }
    }

    pub fn watchers(&self) -> &WatcherRegistry {
        &self.registry
    }

    /// The Kubernetes client, or `None` when running degraded.
    /// Deferred mode builds the client on first call: in-cluster
    /// configuration first, local kubeconfig as fallback.
    pub async fn client(&self) -> Result<Option<Client>> {
        match &self.access {
            KubeAccess::Live(client) => Ok(Some(client.clone())),
            KubeAccess::Deferred(cell) => {
                let client = cell
                    .get_or_try_init(|| async {
                        tracing::info!("building deferred Kubernetes client");
                        Client::try_default().await
                    })
                    .await?;
                Ok(Some(client.clone()))
            }
            KubeAccess::Disabled => Ok(None),
        }
    }

    fn watch_context(&self, client: Client) -> WatchContext {
        WatchContext {
            client,
            storage: self.storage.clone(),
            hub: self.hub.clone(),
            sd: self.sd.clone(),
            registry: self.registry.clone(),
        }
    }

    pub fn namespace_for_cluster(&self, cluster_name: &str) -> String {
        convert::namespace_for(cluster_name, &self.identity.region)
    }

    /// Idempotent namespace creation (409 tolerated).
    pub async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let Some(client) = self.client().await? else {
            return Ok(());
        };
        let api: Api<Namespace> = Api::all(client);
        match api
            .create(&PostParams::default(), &convert::namespace_object(name))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn materialise_secrets(
        &self,
        client: &Client,
        task_definition: &TaskDefinition,
        namespace: &str,
    ) -> Result<()> {
        let Some(secret) = convert::secret_for(task_definition, namespace) else {
            return Ok(());
        };
        let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Create the pod for a task, persist the derived coordinates, and
    /// attach a watcher. If the coordinate write fails the pod is deleted
    /// again so no orphan survives.
    pub async fn create_task(&self, task: &Task, task_definition: &TaskDefinition) -> Result<Task> {
        let cluster_name = arn::cluster_name(&task.cluster_arn).to_string();
        let namespace = self.namespace_for_cluster(&cluster_name);
        let pod_name = convert::pod_name_for(task.task_id());

        let Some(client) = self.client().await? else {
            // Degraded: record the coordinates, let the lifecycle worker
            // drive the states.
            let updated = self
                .persist_pod_coordinates(task, &pod_name, &namespace)
                .await?;
            return Ok(updated);
        };

        self.ensure_namespace(&namespace).await?;
        self.materialise_secrets(&client, task_definition, &namespace)
            .await?;

        let pod = convert::pod_from_task(task, task_definition, &cluster_name, &namespace);
        let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        match api.create(&PostParams::default(), &pod).await {
            Ok(_) => {}
            // A leftover pod with the same deterministic name is adopted.
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                tracing::warn!(pod = %pod_name, "pod already exists, adopting");
            }
            Err(e) => return Err(Error::from(e)),
        }

        let updated = match self
            .persist_pod_coordinates(task, &pod_name, &namespace)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                // Keep "persisted task <-> live pod" intact.
                tracing::error!(error = %e, pod = %pod_name, "coordinate write failed, deleting pod");
                let _ = api.delete(&pod_name, &DeleteParams::default()).await;
                return Err(e);
            }
        };

        spawn_pod_watcher(
            self.watch_context(client),
            task.cluster_arn.clone(),
            task.task_id().to_string(),
            namespace,
            pod_name,
        )
        .await;
        Ok(updated)
    }

    async fn persist_pod_coordinates(
        &self,
        task: &Task,
        pod_name: &str,
        namespace: &str,
    ) -> Result<Task> {
        let mut updated = task.clone();
        updated.pod_name = Some(pod_name.to_string());
        updated.namespace = Some(namespace.to_string());
        updated
            .attributes
            .retain(|a| a.name != convert::ATTR_POD_NAME && a.name != convert::ATTR_NAMESPACE);
        updated.attributes.push(KeyValuePair {
            name: convert::ATTR_POD_NAME.to_string(),
            value: Some(pod_name.to_string()),
        });
        updated.attributes.push(KeyValuePair {
            name: convert::ATTR_NAMESPACE.to_string(),
            value: Some(namespace.to_string()),
        });
        Ok(self.storage.tasks().update(&updated).await?)
    }

    /// Collect logs, then delete the pod. The record updates happened in
    /// the core already; the watcher finalizes status when the deletion is
    /// observed.
    pub async fn stop_task(&self, task: &Task) -> Result<()> {
        let Some(client) = self.client().await? else {
            return Ok(());
        };
        let (Some(namespace), Some(pod_name)) =
            (task.namespace.as_deref(), task.pod_name.as_deref())
        else {
            return Ok(());
        };
        collect_task_logs(&client, &self.storage, &self.hub, task).await;
        let api: Api<Pod> = Api::namespaced(client, namespace);
        match api.delete(pod_name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Create or update the Deployment projected from a service.
    pub async fn create_service_deployment(
        &self,
        service: &Service,
        task_definition: &TaskDefinition,
    ) -> Result<()> {
        let Some(client) = self.client().await? else {
            return Ok(());
        };
        let cluster_name = arn::cluster_name(&service.cluster_arn).to_string();
        let namespace = self.namespace_for_cluster(&cluster_name);
        self.ensure_namespace(&namespace).await?;
        self.materialise_secrets(&client, task_definition, &namespace)
            .await?;
        let deployment = convert::deployment_from_service(
            &service.service_name,
            &cluster_name,
            service.desired_count,
            task_definition,
            &namespace,
        );
        self.apply_deployment(&client, &namespace, deployment).await
    }

    pub async fn delete_service_deployment(&self, service: &Service) -> Result<()> {
        let Some(client) = self.client().await? else {
            return Ok(());
        };
        let cluster_name = arn::cluster_name(&service.cluster_arn).to_string();
        let namespace = self.namespace_for_cluster(&cluster_name);
        let api: Api<Deployment> = Api::namespaced(client, &namespace);
        let name = convert::service_deployment_name(&service.service_name);
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Create (or re-shape) the Deployment and optional Service projected
    /// from a task set.
    pub async fn apply_task_set(
        &self,
        task_set: &TaskSet,
        service: &Service,
        task_definition: &TaskDefinition,
    ) -> Result<()> {
        let Some(client) = self.client().await? else {
            return Ok(());
        };
        let cluster_name = arn::cluster_name(&task_set.cluster_arn).to_string();
        let namespace = self.namespace_for_cluster(&cluster_name);
        self.ensure_namespace(&namespace).await?;
        self.materialise_secrets(&client, task_definition, &namespace)
            .await?;
        let deployment = convert::deployment_from_task_set(
            task_set,
            &service.service_name,
            &cluster_name,
            task_definition,
            &namespace,
        );
        self.apply_deployment(&client, &namespace, deployment)
            .await?;

        if let Some(k8s_service) = convert::service_from_task_set(
            task_set,
            &service.service_name,
            task_definition,
            &namespace,
        ) {
            let api: Api<K8sService> = Api::namespaced(client, &namespace);
            let name = k8s_service
                .metadata
                .name
                .clone()
                .ok_or_else(|| Error::Convert("service object without a name".into()))?;
            api.patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&k8s_service),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn delete_task_set(&self, task_set: &TaskSet, service: &Service) -> Result<()> {
        let Some(client) = self.client().await? else {
            return Ok(());
        };
        let cluster_name = arn::cluster_name(&task_set.cluster_arn).to_string();
        let namespace = self.namespace_for_cluster(&cluster_name);
        let name = convert::task_set_deployment_name(&service.service_name, &task_set.id);

        let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
        match deployments.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(Error::from(e)),
        }
        let services: Api<K8sService> = Api::namespaced(client, &namespace);
        match services.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn apply_deployment(
        &self,
        client: &Client,
        namespace: &str,
        deployment: Deployment,
    ) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        let name = deployment
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::Convert("deployment without a name".into()))?;
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&deployment),
        )
        .await?;
        Ok(())
    }

    /// Startup restore: for every persisted non-terminal task, recreate the
    /// pod if it is gone and re-attach a watcher.
    pub async fn restore_tasks(&self) -> Result<usize> {
        let Some(client) = self.client().await? else {
            return Ok(0);
        };
        let tasks = self.storage.tasks().list_all().await?;
        let mut restored = 0;
        for task in tasks {
            if task.last_status.is_terminal() {
                continue;
            }
            let cluster_name = arn::cluster_name(&task.cluster_arn).to_string();
            let namespace = task
                .namespace
                .clone()
                .unwrap_or_else(|| self.namespace_for_cluster(&cluster_name));
            let pod_name = task
                .pod_name
                .clone()
                .unwrap_or_else(|| convert::pod_name_for(task.task_id()));

            let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
            let exists = match api.get_opt(&pod_name).await {
                Ok(pod) => pod.is_some(),
                Err(e) => {
                    tracing::warn!(error = %e, pod = %pod_name, "restore probe failed, skipping");
                    continue;
                }
            };
            if !exists {
                match self.task_definition_for(&task).await {
                    Ok(Some(td)) => {
                        self.ensure_namespace(&namespace).await?;
                        self.materialise_secrets(&client, &td, &namespace).await?;
                        let pod = convert::pod_from_task(&task, &td, &cluster_name, &namespace);
                        match api.create(&PostParams::default(), &pod).await {
                            Ok(_) => {}
                            Err(kube::Error::Api(ae)) if ae.code == 409 => {}
                            Err(e) => {
                                tracing::warn!(error = %e, pod = %pod_name, "restore create failed");
                                continue;
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(task = %task.task_arn, "task definition gone, cannot restore");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, task = %task.task_arn, "restore lookup failed");
                        continue;
                    }
                }
            }
            spawn_pod_watcher(
                self.watch_context(client.clone()),
                task.cluster_arn.clone(),
                task.task_id().to_string(),
                namespace,
                pod_name,
            )
            .await;
            restored += 1;
        }
        if restored > 0 {
            tracing::info!(count = restored, "restored orphaned tasks");
        }
        Ok(restored)
    }

    async fn task_definition_for(&self, task: &Task) -> Result<Option<TaskDefinition>> {
        let (family, revision) = arn::family_and_revision(&task.task_definition_arn)
            .map_err(|e| Error::Convert(e.to_string()))?;
        Ok(match revision {
            Some(revision) => self.storage.task_definitions().get(&family, revision).await?,
            None => {
                self.storage
                    .task_definitions()
                    .get_latest_active(&family)
                    .await?
            }
        })
    }

    /// Degraded-mode container synthesis for a fresh task record.
    pub fn synthesize_containers(task_definition: &TaskDefinition) -> Vec<stevedore_model::Container> {
        task_definition
            .container_definitions
            .iter()
            .map(|cd| stevedore_model::Container {
                name: cd.name.clone(),
                image: cd.image.clone(),
                last_status: TaskStatus::Provisioning,
                exit_code: None,
                reason: None,
                health_status: stevedore_model::HealthStatus::Unknown,
                network_interfaces: vec![],
            })
            .collect()
    }

    /// Component status for the detailed health endpoint.
    pub async fn health(&self) -> (&'static str, BTreeMap<String, String>) {
        let mut details = BTreeMap::new();
        details.insert("watchers".to_string(), self.registry.len().await.to_string());
        match &self.access {
            KubeAccess::Disabled => ("test-mode", details),
            KubeAccess::Deferred(cell) if cell.get().is_none() => ("deferred", details),
            _ => ("configured", details),
        }
    }
}
