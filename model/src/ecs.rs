use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::*;

/// A logical grouping of services and tasks, backed by a Kubernetes
/// namespace per cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub cluster_arn: String,
    pub cluster_name: String,
    pub status: ClusterStatus,
    /// Name of the Kubernetes cluster this cluster is reified onto.
    #[serde(default)]
    pub backing_cluster_name: String,
    /// Derived on read; never authoritative in storage.
    #[serde(default)]
    pub active_services_count: i32,
    #[serde(default)]
    pub running_tasks_count: i32,
    #[serde(default)]
    pub pending_tasks_count: i32,
    #[serde(default)]
    pub registered_container_instances_count: i32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub region: String,
    pub account_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter.
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValuePair {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A versioned declarative description of containers to run together.
/// `(family, revision)` is unique; revisions are never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub task_definition_arn: String,
    pub family: String,
    /// 1-based, monotonically increasing within the family.
    pub revision: i32,
    pub status: TaskDefinitionStatus,
    pub container_definitions: Vec<ContainerDefinition>,
    #[serde(default)]
    pub network_mode: NetworkMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Opaque payloads echoed back on describe.
    #[serde(default)]
    pub volumes: Vec<serde_json::Value>,
    #[serde(default)]
    pub placement_constraints: Vec<serde_json::Value>,
    #[serde(default)]
    pub requires_compatibilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub region: String,
    pub account_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub entry_point: Vec<String>,
    #[serde(default)]
    pub environment: Vec<KeyValuePair>,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default)]
    pub secrets: Vec<SecretReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Reference to a secret value resolved at projection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    pub value_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_period: Option<i32>,
}

/// A single running (or terminal) instance of a task definition, projected
/// as one Kubernetes pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_arn: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_instance_arn: Option<String>,
    pub last_status: TaskStatus,
    /// Only ever moves forward toward STOPPED.
    pub desired_status: TaskStatus,
    #[serde(default)]
    pub launch_type: LaunchType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Name/value pairs, including the pod coordinates once projected.
    #[serde(default)]
    pub attributes: Vec<KeyValuePair>,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_stopped_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopping_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_stopped_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_code: Option<StopCode>,
    /// Kubernetes coordinates once the pod exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub region: String,
    pub account_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl Task {
    pub fn task_id(&self) -> &str {
        crate::arn::task_id(&self.task_arn)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub last_status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_ipv4_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub attachment_type: String,
    pub status: String,
    #[serde(default)]
    pub details: Vec<KeyValuePair>,
}

/// A declarative desired-state descriptor for running N tasks of a task
/// definition, projected as a Kubernetes Deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_arn: String,
    pub service_name: String,
    pub cluster_arn: String,
    pub task_definition: String,
    pub desired_count: i32,
    /// Derived on read.
    #[serde(default)]
    pub running_count: i32,
    #[serde(default)]
    pub pending_count: i32,
    pub status: ServiceStatus,
    #[serde(default)]
    pub launch_type: LaunchType,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerRef>,
    #[serde(default)]
    pub service_registries: Vec<ServiceRegistryRef>,
    #[serde(default)]
    pub deployment_controller: DeploymentController,
    /// Under the EXTERNAL controller, the task set whose pods serve the
    /// service's main endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_task_set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub region: String,
    pub account_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentController {
    #[serde(rename = "type", default)]
    pub controller_type: DeploymentControllerType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_group_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistryRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,
}

/// A weighted slice of a service's capacity under the EXTERNAL controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSet {
    pub id: String,
    pub task_set_arn: String,
    pub service_arn: String,
    pub cluster_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub task_definition: String,
    pub scale: Scale,
    /// scale x service desired count; see [`Scale::computed_desired_count`].
    pub computed_desired_count: i32,
    pub status: TaskSetStatus,
    pub stability_status: StabilityStatus,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub running_count: i32,
    #[serde(default)]
    pub pending_count: i32,
    #[serde(default)]
    pub launch_type: LaunchType,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerRef>,
    #[serde(default)]
    pub service_registries: Vec<ServiceRegistryRef>,
    pub region: String,
    pub account_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scale {
    pub value: f64,
    pub unit: ScaleUnit,
}

impl Scale {
    /// PERCENT scales the service's desired count; COUNT is absolute.
    /// Both floor toward zero.
    pub fn computed_desired_count(&self, service_desired: i32) -> i32 {
        match self.unit {
            ScaleUnit::Percent => {
                ((service_desired as f64) * self.value / 100.0).floor() as i32
            }
            ScaleUnit::Count => self.value.floor() as i32,
        }
    }
}

/// A simulated node that tasks can be attributed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInstance {
    pub container_instance_arn: String,
    pub cluster_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ec2_instance_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub agent_connected: bool,
    /// Derived on read.
    #[serde(default)]
    pub running_tasks_count: i32,
    #[serde(default)]
    pub pending_tasks_count: i32,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub registered_resources: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_info: Option<serde_json::Value>,
    pub region: String,
    pub account_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl ContainerInstance {
    pub fn id(&self) -> &str {
        crate::arn::container_instance_id(&self.container_instance_arn)
    }
}

/// A key/value pair targeting a container instance or a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

/// One captured log chunk for a finished container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLog {
    pub id: Uuid,
    pub task_arn: String,
    pub container_name: String,
    pub content: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_percent_floors() {
        let scale = Scale {
            value: 50.0,
            unit: ScaleUnit::Percent,
        };
        assert_eq!(scale.computed_desired_count(3), 1);
        assert_eq!(scale.computed_desired_count(4), 2);
        assert_eq!(scale.computed_desired_count(0), 0);
    }

    #[test]
    fn test_scale_count_is_absolute() {
        let scale = Scale {
            value: 2.9,
            unit: ScaleUnit::Count,
        };
        assert_eq!(scale.computed_desired_count(100), 2);
    }

    #[test]
    fn test_task_wire_field_names() {
        let ident = crate::Identity::new("us-east-1", "000000000000");
        let now = Utc::now();
        let task = Task {
            task_arn: ident.task_arn("default", "abc"),
            cluster_arn: ident.cluster_arn("default"),
            task_definition_arn: ident.task_definition_arn("web", 1),
            container_instance_arn: None,
            last_status: TaskStatus::Provisioning,
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
            pod_name: None,
            namespace: None,
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            updated_at: now,
            version: 0,
        };
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("taskArn").is_some());
        assert_eq!(json["lastStatus"], "PROVISIONING");
        assert_eq!(json["desiredStatus"], "RUNNING");
        // Unset optionals stay off the wire
        assert!(json.get("stoppedReason").is_none());
    }
}
