//! Task operations.

use chrono::Utc;
use stevedore_model::{
    HealthStatus, LaunchType, Task, TaskDefinition, TaskStatus, arn,
};
use stevedore_orchestrator::Coordinator;
use stevedore_store::{PageRequest, StoreError, TaskFilter};

use crate::api::*;
use crate::core::Ecs;
use crate::error::{EcsError, Result};

const MAX_RUN_COUNT: i32 = 10;
const STOP_RETRIES: usize = 3;

impl Ecs {
    /// Create `count` task records in PROVISIONING and emit their pods.
    /// Per-task projection failures land in the failures array; the call
    /// only errors when not a single task was created.
    pub async fn run_task(&self, request: RunTaskRequest) -> Result<RunTaskResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let task_definition = self
            .resolve_task_definition(&request.task_definition)
            .await?;
        let count = request.count.unwrap_or(1);
        if !(1..=MAX_RUN_COUNT).contains(&count) {
            return Err(EcsError::InvalidParameter(format!(
                "count must be between 1 and {}",
                MAX_RUN_COUNT
            )));
        }

        let mut tasks = Vec::new();
        let mut failures = Vec::new();
        for _ in 0..count {
            let task = self.new_task(
                &cluster.cluster_arn,
                &task_definition,
                request.launch_type.unwrap_or_default(),
                request.started_by.clone(),
                request.group.clone(),
                None,
            );
            self.storage.tasks().create(&task).await?;
            match self.coordinator.create_task(&task, &task_definition).await {
                Ok(updated) => {
                    self.publish(
                        "task_update",
                        "task",
                        updated.task_id(),
                        serde_json::to_value(&updated).ok(),
                    )
                    .await;
                    tasks.push(updated);
                }
                Err(e) => {
                    // No degraded fallback: remove the record so no task
                    // exists without a pod behind it.
                    tracing::error!(error = %e, task = %task.task_arn, "pod creation failed");
                    let _ = self
                        .storage
                        .tasks()
                        .delete(&task.cluster_arn, task.task_id())
                        .await;
                    failures.push(Failure {
                        arn: task.task_arn.clone(),
                        reason: "RESOURCE:FAILED".into(),
                        detail: Some(e.to_string()),
                    });
                }
            }
        }

        if tasks.is_empty()
            && let Some(first) = failures.first()
        {
            return Err(EcsError::Unavailable(
                first
                    .detail
                    .clone()
                    .unwrap_or_else(|| "task placement failed".into()),
            ));
        }
        Ok(RunTaskResponse { tasks, failures })
    }

    /// Like RunTask but pinned to explicit container instances.
    pub async fn start_task(&self, request: StartTaskRequest) -> Result<RunTaskResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let task_definition = self
            .resolve_task_definition(&request.task_definition)
            .await?;
        if request.container_instances.is_empty() {
            return Err(EcsError::InvalidParameter(
                "containerInstances is required".into(),
            ));
        }

        let mut tasks = Vec::new();
        let mut failures = Vec::new();
        for identifier in &request.container_instances {
            let instance_id = arn::container_instance_id(identifier);
            let Some(instance) = self
                .storage
                .container_instances()
                .get(&cluster.cluster_arn, instance_id)
                .await?
            else {
                failures.push(Failure::missing(
                    self.identity
                        .container_instance_arn(&cluster.cluster_name, instance_id),
                ));
                continue;
            };
            let task = self.new_task(
                &cluster.cluster_arn,
                &task_definition,
                LaunchType::Ec2,
                request.started_by.clone(),
                request.group.clone(),
                Some(instance.container_instance_arn.clone()),
            );
            self.storage.tasks().create(&task).await?;
            match self.coordinator.create_task(&task, &task_definition).await {
                Ok(updated) => tasks.push(updated),
                Err(e) => {
                    let _ = self
                        .storage
                        .tasks()
                        .delete(&task.cluster_arn, task.task_id())
                        .await;
                    failures.push(Failure {
                        arn: task.task_arn.clone(),
                        reason: "RESOURCE:FAILED".into(),
                        detail: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(RunTaskResponse { tasks, failures })
    }

    /// Idempotent: stopping an already-stopping task returns the current
    /// record. The pod deletion runs asynchronously; its failure is only
    /// surfaced when the record update itself failed.
    pub async fn stop_task(&self, request: StopTaskRequest) -> Result<TaskResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let task_id = arn::task_id(&request.task).to_string();

        for _ in 0..STOP_RETRIES {
            let task = self
                .storage
                .tasks()
                .get(&cluster.cluster_arn, &task_id)
                .await?
                .ok_or_else(|| EcsError::NotFound(format!("task {} not found", request.task)))?;

            if task.desired_status == TaskStatus::Stopped {
                return Ok(TaskResponse { task });
            }

            let mut next = task.clone();
            next.desired_status = TaskStatus::Stopped;
            next.stopping_at = Some(Utc::now());
            next.stopped_reason = Some(
                request
                    .reason
                    .clone()
                    .unwrap_or_else(|| "Task stopped".to_string()),
            );
            match self.storage.tasks().update(&next).await {
                Ok(persisted) => {
                    let coordinator = self.coordinator.clone();
                    let to_stop = persisted.clone();
                    tokio::spawn(async move {
                        if let Err(e) = coordinator.stop_task(&to_stop).await {
                            tracing::error!(error = %e, task = %to_stop.task_arn, "pod deletion failed");
                        }
                    });
                    self.publish(
                        "task_update",
                        "task",
                        persisted.task_id(),
                        serde_json::to_value(&persisted).ok(),
                    )
                    .await;
                    return Ok(TaskResponse { task: persisted });
                }
                Err(StoreError::StaleVersion(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EcsError::Internal("stop task kept conflicting".into()))
    }

    pub async fn describe_tasks(
        &self,
        request: DescribeTasksRequest,
    ) -> Result<DescribeTasksResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let mut tasks = Vec::new();
        let mut failures = Vec::new();
        for identifier in &request.tasks {
            let task_id = arn::task_id(identifier);
            match self
                .storage
                .tasks()
                .get(&cluster.cluster_arn, task_id)
                .await?
            {
                Some(task) => tasks.push(task),
                None => failures.push(Failure::missing(
                    self.identity.task_arn(&cluster.cluster_name, task_id),
                )),
            }
        }
        Ok(DescribeTasksResponse { tasks, failures })
    }

    pub async fn list_tasks(&self, request: ListTasksRequest) -> Result<ListTasksResponse> {
        let cluster = self.require_cluster(request.cluster.as_deref()).await?;
        let filter = TaskFilter {
            cluster_arn: cluster.cluster_arn.clone(),
            service_name: request.service_name,
            family: request.family,
            started_by: request.started_by,
            launch_type: request.launch_type,
            desired_status: request.desired_status,
        };
        let page = self
            .storage
            .tasks()
            .list(
                &filter,
                &PageRequest {
                    max_results: request.max_results,
                    next_token: request.next_token,
                },
            )
            .await?;
        Ok(ListTasksResponse {
            task_arns: page.items.into_iter().map(|t| t.task_arn).collect(),
            next_token: page.next_token,
        })
    }

    pub(crate) fn new_task(
        &self,
        cluster_arn: &str,
        task_definition: &TaskDefinition,
        launch_type: LaunchType,
        started_by: Option<String>,
        group: Option<String>,
        container_instance_arn: Option<String>,
    ) -> Task {
        let now = Utc::now();
        let task_id = arn::random_task_id();
        let cluster_name = arn::cluster_name(cluster_arn);
        Task {
            task_arn: self.identity.task_arn(cluster_name, &task_id),
            cluster_arn: cluster_arn.to_string(),
            task_definition_arn: task_definition.task_definition_arn.clone(),
            container_instance_arn,
            last_status: TaskStatus::Provisioning,
            desired_status: TaskStatus::Running,
            launch_type,
            started_by,
            group: group.or_else(|| Some(format!("family:{}", task_definition.family))),
            containers: Coordinator::synthesize_containers(task_definition),
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
            pod_name: None,
            namespace: None,
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            updated_at: now,
            version: 0,
        }
    }
}
