//! Per-pod watchers.
//!
//! One lightweight unit per projected pod, opened field-scoped on the pod
//! name. Every event re-reads the task, folds the pod state in, persists
//! under optimistic concurrency, and announces the update. The watcher
//! terminates itself once the pod reaches a terminal phase.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::{Api, Client};
use stevedore_events::EventHub;
use stevedore_model::{Event, Task, TaskStatus};
use stevedore_store::{Storage, StoreError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::logs::collect_task_logs;
use crate::project::{PodProjection, apply_pod_deleted, apply_pod_update};
use crate::sd::ServiceRegistry;

/// Bounded retry for optimistic-concurrency losses on status writes.
const UPDATE_RETRIES: usize = 3;

/// Live watchers keyed by pod coordinates. Guarded reader/writer: broadcast
/// paths read, registration changes write.
#[derive(Clone, Default)]
pub struct WatcherRegistry {
    inner: Arc<RwLock<HashMap<(String, String), CancellationToken>>>,
}

impl WatcherRegistry {
    /// Register a watcher, cancelling any previous one for the same pod.
    pub async fn register(&self, namespace: &str, pod_name: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut inner = self.inner.write().await;
        if let Some(previous) =
            inner.insert((namespace.to_string(), pod_name.to_string()), token.clone())
        {
            previous.cancel();
        }
        token
    }

    pub async fn remove(&self, namespace: &str, pod_name: &str) {
        self.inner
            .write()
            .await
            .remove(&(namespace.to_string(), pod_name.to_string()));
    }

    pub async fn cancel_all(&self) {
        for token in self.inner.write().await.values() {
            token.cancel();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Everything a watcher needs, threaded explicitly (no ambient state).
#[derive(Clone)]
pub struct WatchContext {
    pub client: Client,
    pub storage: Arc<dyn Storage>,
    pub hub: EventHub,
    pub sd: Arc<dyn ServiceRegistry>,
    pub registry: WatcherRegistry,
}

/// Spawn the watcher unit for one pod.
pub async fn spawn_pod_watcher(
    ctx: WatchContext,
    cluster_arn: String,
    task_id: String,
    namespace: String,
    pod_name: String,
) {
    let cancel = ctx.registry.register(&namespace, &pod_name).await;
    tokio::spawn(async move {
        watch_pod(&ctx, &cluster_arn, &task_id, &namespace, &pod_name, cancel).await;
        ctx.registry.remove(&namespace, &pod_name).await;
    });
}

async fn watch_pod(
    ctx: &WatchContext,
    cluster_arn: &str,
    task_id: &str,
    namespace: &str,
    pod_name: &str,
    cancel: CancellationToken,
) {
    let api: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let config = watcher::Config::default().fields(&format!("metadata.name={}", pod_name));
    let mut stream = watcher(api, config).boxed();

    tracing::debug!(pod = %pod_name, namespace = %namespace, "pod watcher started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.try_next() => match event {
                Ok(Some(watcher::Event::Apply(pod)) | Some(watcher::Event::InitApply(pod))) => {
                    let terminal = handle_pod_event(ctx, cluster_arn, task_id, Some(&pod)).await;
                    if terminal {
                        break;
                    }
                }
                Ok(Some(watcher::Event::Delete(_))) => {
                    handle_pod_event(ctx, cluster_arn, task_id, None).await;
                    break;
                }
                Ok(Some(watcher::Event::Init)) | Ok(Some(watcher::Event::InitDone)) => {}
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, pod = %pod_name, "pod watch error, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            },
        }
    }
    tracing::debug!(pod = %pod_name, namespace = %namespace, "pod watcher stopped");
}

/// Fold one observation into the persisted task. `None` means the pod was
/// deleted. Returns true when the task reached its terminal state.
async fn handle_pod_event(
    ctx: &WatchContext,
    cluster_arn: &str,
    task_id: &str,
    pod: Option<&Pod>,
) -> bool {
    for _ in 0..UPDATE_RETRIES {
        let task = match ctx.storage.tasks().get(cluster_arn, task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::warn!(task = %task_id, "task disappeared underneath its watcher");
                return true;
            }
            Err(e) => {
                tracing::error!(error = %e, task = %task_id, "failed to read task");
                return false;
            }
        };
        if task.last_status == TaskStatus::Stopped {
            return true;
        }

        let mut updated = task.clone();
        let outcome = match pod {
            Some(pod) => apply_pod_update(&mut updated, pod, Utc::now()),
            None => apply_pod_deleted(&mut updated, Utc::now()),
        };
        if !outcome.changed {
            return updated.last_status == TaskStatus::Stopped;
        }

        match ctx.storage.tasks().update(&updated).await {
            Ok(persisted) => {
                announce(ctx, &persisted, outcome).await;
                if persisted.last_status == TaskStatus::Stopped {
                    collect_task_logs(&ctx.client, &ctx.storage, &ctx.hub, &persisted).await;
                    return true;
                }
                return false;
            }
            Err(StoreError::StaleVersion(_)) => continue,
            Err(e) => {
                tracing::error!(error = %e, task = %task_id, "failed to persist task status");
                return false;
            }
        }
    }
    tracing::warn!(task = %task_id, "gave up persisting status after repeated conflicts");
    false
}

async fn announce(ctx: &WatchContext, task: &Task, outcome: PodProjection) {
    ctx.hub
        .publish(&Event::new(
            "task_update",
            "task",
            task.task_id(),
            serde_json::to_value(task).ok(),
        ))
        .await;
    if outcome.entered_running {
        if let Err(e) = ctx.sd.register_task(task).await {
            tracing::warn!(error = %e, task = %task.task_arn, "service discovery register failed");
        }
    }
    if outcome.entered_stopped {
        if let Err(e) = ctx.sd.deregister_task(task).await {
            tracing::warn!(error = %e, task = %task.task_arn, "service discovery deregister failed");
        }
    }
}
