//! Reverse projection: pod state back onto the task record.
//!
//! Kubernetes is authoritative for `lastStatus` and container runtime
//! facts; the task record is authoritative for `desiredStatus`, identity,
//! and everything ECS-shaped. Transitions are monotonic: a stale watch
//! event can never move a task backwards, and nothing moves past STOPPED.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use stevedore_model::{
    Attachment, HealthStatus, KeyValuePair, NetworkInterface, StopCode, Task, TaskStatus,
};

use crate::convert::{containers_from_pod, pod_succeeded, status_from_phase};

/// What a single watch event did to the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct PodProjection {
    pub changed: bool,
    pub entered_running: bool,
    pub entered_stopped: bool,
}

fn k8s_time_to_chrono(time: &k8s_openapi::apimachinery::pkg::apis::meta::v1::Time) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.0.as_second(), time.0.subsec_nanosecond().max(0) as u32)
}

/// Fold one pod observation into the task. Returns what changed so the
/// caller can persist, announce, and drive service-discovery side effects.
pub fn apply_pod_update(task: &mut Task, pod: &Pod, now: DateTime<Utc>) -> PodProjection {
    let mut outcome = PodProjection::default();
    let previous = task.last_status;

    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown");
    let observed = status_from_phase(phase);
    // Monotonic: keep whatever the task already reached.
    let next = previous.max(observed);

    if next != previous {
        task.last_status = next;
        outcome.changed = true;
    }

    // Timestamps track the transitions, not the raw phases.
    if previous == TaskStatus::Provisioning
        && next >= TaskStatus::Pending
        && task.pull_started_at.is_none()
    {
        task.pull_started_at = Some(now);
        outcome.changed = true;
    }
    if next >= TaskStatus::Running && task.pull_stopped_at.is_none() {
        task.pull_stopped_at = Some(now);
        outcome.changed = true;
    }
    if next >= TaskStatus::Running && task.started_at.is_none() {
        task.started_at = pod
            .status
            .as_ref()
            .and_then(|s| s.start_time.as_ref())
            .and_then(k8s_time_to_chrono)
            .or(Some(now));
        outcome.changed = true;
    }

    let containers = containers_from_pod(pod, next);
    if !containers.is_empty() {
        task.containers = containers;
        outcome.changed = true;
    }

    if next >= TaskStatus::Running {
        let health = if task.containers.is_empty() {
            HealthStatus::Unknown
        } else if task
            .containers
            .iter()
            .all(|c| c.health_status == HealthStatus::Healthy)
        {
            HealthStatus::Healthy
        } else if next == TaskStatus::Running {
            HealthStatus::Unhealthy
        } else {
            task.health_status
        };
        if task.health_status != health {
            task.health_status = health;
            outcome.changed = true;
        }
    }

    if crate::convert::pod_is_awsvpc(pod)
        && let Some(ip) = crate::convert::pod_ip(pod)
        && !task
            .attachments
            .iter()
            .any(|a| a.attachment_type == "ElasticNetworkInterface")
    {
        let attachment_id = uuid::Uuid::new_v4().to_string();
        task.attachments.push(Attachment {
            id: attachment_id.clone(),
            attachment_type: "ElasticNetworkInterface".into(),
            status: "ATTACHED".into(),
            details: vec![KeyValuePair {
                name: "privateIPv4Address".into(),
                value: Some(ip.clone()),
            }],
        });
        for container in &mut task.containers {
            container.network_interfaces = vec![NetworkInterface {
                attachment_id: Some(attachment_id.clone()),
                private_ipv4_address: Some(ip.clone()),
            }];
        }
        outcome.changed = true;
    }

    if next == TaskStatus::Stopped && previous != TaskStatus::Stopped {
        // Terminal: desired status follows, timestamps close out.
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
            task.stopped_reason = Some(if pod_succeeded(pod) {
                "Essential container in task exited".to_string()
            } else {
                let container_reason = task
                    .containers
                    .iter()
                    .find_map(|c| c.reason.clone())
                    .unwrap_or_else(|| "Task failed".to_string());
                container_reason
            });
        }
        outcome.changed = true;
    }

    outcome.entered_running = previous < TaskStatus::Running && next >= TaskStatus::Running;
    outcome.entered_stopped = previous != TaskStatus::Stopped && next == TaskStatus::Stopped;
    outcome
}

/// Finalize a task whose pod disappeared out from under it.
pub fn apply_pod_deleted(task: &mut Task, now: DateTime<Utc>) -> PodProjection {
    let mut outcome = PodProjection::default();
    if task.last_status == TaskStatus::Stopped {
        return outcome;
    }
    outcome.entered_stopped = true;
    outcome.changed = true;
    task.last_status = TaskStatus::Stopped;
    task.desired_status = TaskStatus::Stopped;
    if task.stopped_at.is_none() {
        task.stopped_at = Some(now);
    }
    if task.execution_stopped_at.is_none() {
        task.execution_stopped_at = Some(now);
    }
    if task.stop_code.is_none() {
        task.stop_code = Some(StopCode::UserInitiated);
    }
    if task.stopped_reason.is_none() {
        task.stopped_reason = Some("Pod was deleted".to_string());
    }
    for container in &mut task.containers {
        container.last_status = TaskStatus::Stopped;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStatus,
        PodStatus,
    };
    use stevedore_model::{Identity, LaunchType};

    fn task(last: TaskStatus) -> Task {
        let ident = Identity::new("us-east-1", "000000000000");
        let now = Utc::now();
        Task {
            task_arn: ident.task_arn("default", "abc"),
            cluster_arn: ident.cluster_arn("default"),
            task_definition_arn: ident.task_definition_arn("web", 1),
            container_instance_arn: None,
            last_status: last,
            desired_status: TaskStatus::Running,
            launch_type: LaunchType::Fargate,
            started_by: None,
            group: None,
            containers: vec![],
            attachments: vec![],
            attributes: vec![],
            health_status: HealthStatus::Unknown,
            created_at: now,
            started_at: None,
            pull_started_at: None,
            pull_stopped_at: None,
            stopping_at: None,
            stopped_at: None,
            execution_stopped_at: None,
            stopped_reason: None,
            stop_code: None,
            pod_name: Some("task-abc".into()),
            namespace: Some("default-us-east-1".into()),
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            updated_at: now,
            version: 0,
        }
    }

    fn pod(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_running_pod_advances_task() {
        let mut t = task(TaskStatus::Provisioning);
        let outcome = apply_pod_update(&mut t, &pod("Running"), Utc::now());
        assert!(outcome.changed);
        assert!(outcome.entered_running);
        assert_eq!(t.last_status, TaskStatus::Running);
        assert!(t.started_at.is_some());
        assert!(t.pull_stopped_at.is_some());
    }

    #[test]
    fn test_status_never_regresses() {
        let mut t = task(TaskStatus::Running);
        let outcome = apply_pod_update(&mut t, &pod("Pending"), Utc::now());
        assert_eq!(t.last_status, TaskStatus::Running);
        assert!(!outcome.entered_running);
    }

    #[test]
    fn test_stopped_closes_out_invariants() {
        let mut t = task(TaskStatus::Running);
        let outcome = apply_pod_update(&mut t, &pod("Succeeded"), Utc::now());
        assert!(outcome.entered_stopped);
        assert_eq!(t.last_status, TaskStatus::Stopped);
        // STOPPED implies desired STOPPED and a stop timestamp
        assert_eq!(t.desired_status, TaskStatus::Stopped);
        assert!(t.stopped_at.is_some());
        assert!(t.stop_code.is_some());
    }

    #[test]
    fn test_terminated_container_carries_exit_code() {
        let mut p = pod("Failed");
        p.status.as_mut().unwrap().container_statuses = Some(vec![ContainerStatus {
            name: "app".into(),
            image: "nginx:1.0".into(),
            ready: false,
            restart_count: 0,
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: 137,
                    reason: Some("OOMKilled".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        let mut t = task(TaskStatus::Running);
        apply_pod_update(&mut t, &p, Utc::now());
        assert_eq!(t.containers[0].exit_code, Some(137));
        assert_eq!(t.stopped_reason.as_deref(), Some("OOMKilled"));
    }

    #[test]
    fn test_pod_ip_becomes_attachment() {
        let mut p = pod("Running");
        p.status.as_mut().unwrap().pod_ip = Some("10.1.2.3".into());
        p.status.as_mut().unwrap().container_statuses = Some(vec![ContainerStatus {
            name: "app".into(),
            image: "nginx:1.0".into(),
            ready: true,
            restart_count: 0,
            state: Some(ContainerState {
                running: Some(ContainerStateRunning::default()),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        let mut t = task(TaskStatus::Pending);
        apply_pod_update(&mut t, &p, Utc::now());
        assert_eq!(t.attachments.len(), 1);
        assert_eq!(
            t.attachments[0].details[0].value.as_deref(),
            Some("10.1.2.3")
        );
        assert_eq!(t.health_status, HealthStatus::Healthy);
    }

    #[test]
    fn test_pod_deletion_finalizes() {
        let mut t = task(TaskStatus::Running);
        let outcome = apply_pod_deleted(&mut t, Utc::now());
        assert!(outcome.entered_stopped);
        assert_eq!(t.last_status, TaskStatus::Stopped);
        // Idempotent on a second delivery
        let outcome = apply_pod_deleted(&mut t, Utc::now());
        assert!(!outcome.changed);
    }
}
