//! Container log capture for finished tasks.

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, api::LogParams};
use stevedore_events::EventHub;
use stevedore_model::{Event, Task, TaskLog};
use stevedore_store::Storage;
use uuid::Uuid;

const TAIL_LINES: i64 = 1000;

/// Fetch the tail of every container's log, persist one row each, and
/// announce a `log_entry` per captured container. Best effort: a container
/// whose log cannot be read is skipped with a warning, the rest are still
/// captured.
pub async fn collect_task_logs(
    client: &Client,
    storage: &Arc<dyn Storage>,
    hub: &EventHub,
    task: &Task,
) {
    let (Some(namespace), Some(pod_name)) = (task.namespace.as_deref(), task.pod_name.as_deref())
    else {
        return;
    };
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    for container in &task.containers {
        let params = LogParams {
            container: Some(container.name.clone()),
            tail_lines: Some(TAIL_LINES),
            ..Default::default()
        };
        match pods.logs(pod_name, &params).await {
            Ok(content) => {
                let log = TaskLog {
                    id: Uuid::new_v4(),
                    task_arn: task.task_arn.clone(),
                    container_name: container.name.clone(),
                    content,
                    created_at: Utc::now(),
                };
                if let Err(e) = storage.task_logs().insert(&log).await {
                    tracing::warn!(error = %e, task = %task.task_arn, "failed to persist task log");
                    continue;
                }
                hub.publish(&Event::new(
                    "log_entry",
                    "task",
                    task.task_id(),
                    serde_json::to_value(&log).ok(),
                ))
                .await;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    pod = %pod_name,
                    container = %container.name,
                    "failed to collect container logs"
                );
            }
        }
    }
}
