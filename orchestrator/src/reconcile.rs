//! Background reconcilers.
//!
//! Three periodic units: the test-mode lifecycle worker (drives task state
//! without Kubernetes), the task-set stability evaluator, and the log
//! retention pruner. All stop on context cancellation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use stevedore_events::EventHub;
use stevedore_model::{
    Event, StabilityStatus, StopCode, Task, TaskSetStatus, TaskStatus, arn,
};
use stevedore_store::{Storage, StoreError};
use tokio_util::sync::CancellationToken;

use crate::convert;

const LIFECYCLE_POLL: Duration = Duration::from_millis(500);
const PROVISIONING_HOLD_MS: i64 = 100;
const PENDING_HOLD_MS: i64 = 200;
const SHORT_LIVED_RUNTIME_MS: i64 = 2_000;
const STABILITY_POLL: Duration = Duration::from_secs(5);
const RETENTION_POLL: Duration = Duration::from_secs(3_600);

/// Test-mode lifecycle worker: walks tasks through
/// PROVISIONING -> PENDING -> RUNNING, honours a pending STOPPED desired
/// status, and auto-stops short-lived workloads with a synthesised exit 0.
pub async fn run_test_lifecycle(
    storage: Arc<dyn Storage>,
    hub: EventHub,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(LIFECYCLE_POLL);
    tracing::info!("test-mode lifecycle worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        let tasks = match storage.tasks().list_all().await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "lifecycle worker failed to list tasks");
                continue;
            }
        };
        for task in tasks {
            if task.last_status.is_terminal() {
                continue;
            }
            if let Some(next) = step_task(&storage, &task).await {
                match storage.tasks().update(&next).await {
                    Ok(persisted) => {
                        hub.publish(&Event::new(
                            "task_update",
                            "task",
                            persisted.task_id(),
                            serde_json::to_value(&persisted).ok(),
                        ))
                        .await;
                    }
                    // Someone else advanced it; next tick re-reads.
                    Err(StoreError::StaleVersion(_)) => {}
                    Err(e) => {
                        tracing::error!(error = %e, task = %task.task_arn, "lifecycle update failed");
                    }
                }
            }
        }
    }
    tracing::info!("test-mode lifecycle worker stopped");
}

async fn step_task(storage: &Arc<dyn Storage>, task: &Task) -> Option<Task> {
    let now = Utc::now();
    let age_ms = (now - task.updated_at).num_milliseconds();
    let mut next = task.clone();

    if task.desired_status == TaskStatus::Stopped {
        finalize_stopped(&mut next, 0, now);
        return Some(next);
    }

    match task.last_status {
        TaskStatus::Provisioning if age_ms >= PROVISIONING_HOLD_MS => {
            next.last_status = TaskStatus::Pending;
            next.pull_started_at = Some(now);
            set_container_status(&mut next, TaskStatus::Pending);
            Some(next)
        }
        TaskStatus::Pending if age_ms >= PENDING_HOLD_MS => {
            next.last_status = TaskStatus::Running;
            next.pull_stopped_at = Some(now);
            next.started_at = Some(now);
            set_container_status(&mut next, TaskStatus::Running);
            Some(next)
        }
        TaskStatus::Running if age_ms >= SHORT_LIVED_RUNTIME_MS => {
            if short_lived(storage, task).await {
                finalize_stopped(&mut next, 0, now);
                Some(next)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// A workload is short-lived when its task definition runs an explicit
/// command (the `echo`-style one-shots the test scenarios use) rather than
/// a long-running image entrypoint.
async fn short_lived(storage: &Arc<dyn Storage>, task: &Task) -> bool {
    let Ok((family, revision)) = arn::family_and_revision(&task.task_definition_arn) else {
        return false;
    };
    let td = match revision {
        Some(revision) => storage.task_definitions().get(&family, revision).await,
        None => storage.task_definitions().get_latest_active(&family).await,
    };
    match td {
        Ok(Some(td)) => td
            .container_definitions
            .iter()
            .any(|cd| !cd.command.is_empty()),
        _ => false,
    }
}

fn finalize_stopped(task: &mut Task, exit_code: i32, now: chrono::DateTime<chrono::Utc>) {
    task.last_status = TaskStatus::Stopped;
    task.desired_status = TaskStatus::Stopped;
    if task.stopped_at.is_none() {
        task.stopped_at = Some(now);
    }
    if task.execution_stopped_at.is_none() {
        task.execution_stopped_at = Some(now);
    }
    if task.stop_code.is_none() {
        task.stop_code = Some(if task.stopped_reason.is_some() {
            StopCode::UserInitiated
        } else {
            StopCode::EssentialContainerExited
        });
    }
    if task.stopped_reason.is_none() {
        task.stopped_reason = Some("Essential container in task exited".to_string());
    }
    for container in &mut task.containers {
        container.last_status = TaskStatus::Stopped;
        container.exit_code = Some(exit_code);
    }
}

fn set_container_status(task: &mut Task, status: TaskStatus) {
    for container in &mut task.containers {
        container.last_status = status;
    }
}

/// Task-set stability evaluator: reads each ACTIVE task set's Deployment,
/// updates running/pending counts, and flips stabilityStatus to
/// STEADY_STATE once readyReplicas matches computedDesiredCount. Without a
/// client (test mode) readiness is synthesised as already converged.
///
/// The client is fetched through the coordinator only when there is an
/// active task set to evaluate, so deferred-client deployments are not
/// forced to connect early.
pub async fn run_task_set_stability(
    storage: Arc<dyn Storage>,
    hub: EventHub,
    coordinator: Arc<crate::Coordinator>,
    region: String,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(STABILITY_POLL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        let task_sets = match storage.task_sets().list_all().await {
            Ok(ts) => ts,
            Err(e) => {
                tracing::error!(error = %e, "stability evaluator failed to list task sets");
                continue;
            }
        };
        let mut cached_client: Option<Option<Client>> = None;
        for task_set in task_sets {
            if task_set.status != TaskSetStatus::Active {
                continue;
            }
            if cached_client.is_none() {
                match coordinator.client().await {
                    Ok(fetched) => cached_client = Some(fetched),
                    Err(e) => {
                        tracing::warn!(error = %e, "Kubernetes unavailable, skipping stability pass");
                        break;
                    }
                }
            }
            let client = cached_client.as_ref().and_then(|c| c.as_ref());
            let (ready, total) = match client {
                Some(client) => {
                    let cluster_name = arn::cluster_name(&task_set.cluster_arn);
                    let service_name = arn::service_name(&task_set.service_arn);
                    let namespace = convert::namespace_for(cluster_name, &region);
                    let name = convert::task_set_deployment_name(service_name, &task_set.id);
                    let api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
                    match api.get_opt(&name).await {
                        Ok(Some(deployment)) => {
                            let status = deployment.status.unwrap_or_default();
                            (
                                status.ready_replicas.unwrap_or(0),
                                status.replicas.unwrap_or(0),
                            )
                        }
                        Ok(None) => (0, 0),
                        Err(e) => {
                            tracing::warn!(error = %e, task_set = %task_set.id, "deployment read failed");
                            continue;
                        }
                    }
                }
                None => (
                    task_set.computed_desired_count,
                    task_set.computed_desired_count,
                ),
            };

            let stability = if ready == task_set.computed_desired_count {
                StabilityStatus::SteadyState
            } else {
                StabilityStatus::Stabilizing
            };
            let pending = (total - ready).max(0);
            if task_set.running_count == ready
                && task_set.pending_count == pending
                && task_set.stability_status == stability
            {
                continue;
            }
            let mut next = task_set.clone();
            next.running_count = ready;
            next.pending_count = pending;
            next.stability_status = stability;
            match storage.task_sets().update(&next).await {
                Ok(persisted) => {
                    hub.publish(&Event::new(
                        "service_update",
                        "taskSet",
                        persisted.id.clone(),
                        serde_json::to_value(&persisted).ok(),
                    ))
                    .await;
                }
                Err(StoreError::StaleVersion(_)) => {}
                Err(e) => {
                    tracing::error!(error = %e, task_set = %task_set.id, "stability update failed");
                }
            }
        }
    }
}

/// Log retention pruner: hourly, drops task logs older than the window.
pub async fn run_log_retention(
    storage: Arc<dyn Storage>,
    retention: chrono::Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(RETENTION_POLL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        let cutoff = Utc::now() - retention;
        match storage.task_logs().delete_older_than(cutoff).await {
            Ok(0) => {}
            Ok(pruned) => tracing::info!(pruned, "pruned expired task logs"),
            Err(e) => tracing::error!(error = %e, "log retention pass failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stevedore_model::*;
    use stevedore_store::MemoryStorage;

    fn ident() -> Identity {
        Identity::new("us-east-1", "000000000000")
    }

    async fn seed(storage: &MemoryStorage, command: Vec<String>) -> Task {
        let now = Utc::now();
        let mut tx = stevedore_store::Storage::begin(storage).await.unwrap();
        tx.insert_task_definition(&TaskDefinition {
            task_definition_arn: ident().task_definition_arn("job", 1),
            family: "job".into(),
            revision: 1,
            status: TaskDefinitionStatus::Active,
            container_definitions: vec![ContainerDefinition {
                name: "main".into(),
                image: "busybox".into(),
                cpu: None,
                memory: None,
                memory_reservation: None,
                essential: Some(true),
                command,
                entry_point: vec![],
                environment: vec![],
                port_mappings: vec![],
                secrets: vec![],
                health_check: None,
                log_configuration: None,
                working_directory: None,
            }],
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

        let task = Task {
            task_arn: ident().task_arn("default", "t1"),
            cluster_arn: ident().cluster_arn("default"),
            task_definition_arn: ident().task_definition_arn("job", 1),
            container_instance_arn: None,
            last_status: TaskStatus::Running,
            desired_status: TaskStatus::Running,
            launch_type: LaunchType::Fargate,
            started_by: None,
            group: None,
            containers: vec![Container {
                name: "main".into(),
                image: "busybox".into(),
                last_status: TaskStatus::Running,
                exit_code: None,
                reason: None,
                health_status: HealthStatus::Unknown,
                network_interfaces: vec![],
            }],
            attachments: vec![],
            attributes: vec![],
            health_status: HealthStatus::Unknown,
            created_at: now - chrono::Duration::seconds(10),
            started_at: Some(now - chrono::Duration::seconds(5)),
            pull_started_at: None,
            pull_stopped_at: None,
            stopping_at: None,
            stopped_at: None,
            execution_stopped_at: None,
            stopped_reason: None,
            stop_code: None,
            pod_name: None,
            namespace: None,
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            updated_at: now - chrono::Duration::seconds(5),
            version: 0,
        };
        storage.tasks().create(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_short_lived_running_task_auto_stops() {
        let storage = MemoryStorage::new();
        let task = seed(&storage, vec!["echo".into(), "hi".into()]).await;
        let next = step_task(&(Arc::new(storage.clone()) as Arc<dyn Storage>), &task)
            .await
            .expect("task should stop");
        assert_eq!(next.last_status, TaskStatus::Stopped);
        assert_eq!(next.desired_status, TaskStatus::Stopped);
        assert_eq!(next.containers[0].exit_code, Some(0));
        assert_eq!(next.stop_code, Some(StopCode::EssentialContainerExited));
    }

    #[tokio::test]
    async fn test_long_running_task_keeps_running() {
        let storage = MemoryStorage::new();
        let task = seed(&storage, vec![]).await;
        assert!(
            step_task(&(Arc::new(storage.clone()) as Arc<dyn Storage>), &task)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_desired_stop_is_honoured_immediately() {
        let storage = MemoryStorage::new();
        let mut task = seed(&storage, vec![]).await;
        task.desired_status = TaskStatus::Stopped;
        task.stopped_reason = Some("User requested stop".into());
        let next = step_task(&(Arc::new(storage.clone()) as Arc<dyn Storage>), &task)
            .await
            .expect("task should finalize");
        assert_eq!(next.last_status, TaskStatus::Stopped);
        assert_eq!(next.stop_code, Some(StopCode::UserInitiated));
        assert_eq!(next.stopped_reason.as_deref(), Some("User requested stop"));
    }
}
