//! Forward and reverse projection between the canonical model and
//! Kubernetes objects.
//!
//! The forward direction (Task -> Pod, Service/TaskSet -> Deployment,
//! TaskSet -> Service) is pure construction; the reverse direction maps pod
//! phase and container statuses back onto task state. Everything here is
//! deterministic so the coordinator and the watcher share one vocabulary.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    Container as K8sContainer, ContainerPort, EnvVar, EnvVarSource, ExecAction, Namespace, Pod,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Secret, SecretKeySelector,
    Service as K8sService, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use stevedore_model::{
    Container, ContainerDefinition, HealthCheck, HealthStatus, Task, TaskDefinition, TaskSet,
    TaskStatus,
};

pub const LABEL_MANAGED: &str = "ecs.managed";
pub const LABEL_CLUSTER: &str = "ecs.cluster";
pub const LABEL_TASK_ID: &str = "ecs.task-id";
pub const LABEL_SERVICE: &str = "ecs.service";
pub const LABEL_TASK_SET: &str = "ecs.task-set";

pub const ANNOTATION_TASK_ARN: &str = "ecs.amazonaws.com/task-arn";
pub const ANNOTATION_NETWORK_MODE: &str = "ecs.amazonaws.com/network-mode";
pub const ANNOTATION_SUBNETS: &str = "ecs.amazonaws.com/subnets";

/// Attribute names that carry pod coordinates on the task record.
pub const ATTR_POD_NAME: &str = "kubernetes.pod-name";
pub const ATTR_NAMESPACE: &str = "kubernetes.namespace";

/// Namespace backing a cluster: `<cluster-name>-<region>`. Tasks restored
/// from an older layout may still live in `ecs-<cluster-name>`.
pub fn namespace_for(cluster_name: &str, region: &str) -> String {
    sanitize_name(&format!("{}-{}", cluster_name, region), 63)
}

pub fn legacy_namespace_for(cluster_name: &str) -> String {
    sanitize_name(&format!("ecs-{}", cluster_name), 63)
}

/// Deterministic pod name for a standalone task.
pub fn pod_name_for(task_id: &str) -> String {
    sanitize_name(&format!("task-{}", task_id), 63)
}

/// Deployment name for a service's projected Deployment.
pub fn service_deployment_name(service_name: &str) -> String {
    sanitize_name(service_name, 63)
}

/// Deployment name for a task set: service name plus task-set id,
/// lowercased, underscores to hyphens, truncated to 63 chars.
pub fn task_set_deployment_name(service_name: &str, task_set_id: &str) -> String {
    sanitize_name(&format!("{}-{}", service_name, task_set_id), 63)
}

fn sanitize_name(name: &str, max: usize) -> String {
    let mut out: String = name
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            '_' | '.' | '/' | ':' => '-',
            _ => '-',
        })
        .collect();
    out.truncate(max);
    out.trim_matches('-').to_string()
}

pub fn namespace_object(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Name of the secret object materialised for a task definition's secret
/// references.
pub fn secret_name_for(task_definition: &TaskDefinition) -> String {
    sanitize_name(
        &format!(
            "{}-secrets-{}",
            task_definition.family, task_definition.revision
        ),
        63,
    )
}

/// Build the secret object holding every value referenced by the task
/// definition. Values are placeholders; resolving them against a real
/// secret store belongs to an external collaborator.
pub fn secret_for(task_definition: &TaskDefinition, namespace: &str) -> Option<Secret> {
    let mut data = BTreeMap::new();
    for container in &task_definition.container_definitions {
        for secret in &container.secrets {
            data.insert(
                secret_key(&secret.value_from),
                ByteString(b"placeholder".to_vec()),
            );
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(Secret {
        metadata: ObjectMeta {
            name: Some(secret_name_for(task_definition)),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

fn secret_key(value_from: &str) -> String {
    sanitize_name(value_from.rsplit('/').next().unwrap_or(value_from), 253)
}

fn task_labels(task: &Task, cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_CLUSTER.to_string(), cluster_name.to_string()),
        (LABEL_TASK_ID.to_string(), task.task_id().to_string()),
    ])
}

fn task_annotations(task: &Task, task_definition: &TaskDefinition) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::from([
        (ANNOTATION_TASK_ARN.to_string(), task.task_arn.clone()),
        (
            ANNOTATION_NETWORK_MODE.to_string(),
            serde_json::to_value(task_definition.network_mode)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| "awsvpc".to_string()),
        ),
    ]);
    let subnets: Vec<String> = task
        .attachments
        .iter()
        .flat_map(|a| a.details.iter())
        .filter(|d| d.name == "subnetId")
        .filter_map(|d| d.value.clone())
        .collect();
    if !subnets.is_empty() {
        annotations.insert(ANNOTATION_SUBNETS.to_string(), subnets.join(","));
    }
    annotations
}

/// Project a standalone task into a Pod.
pub fn pod_from_task(
    task: &Task,
    task_definition: &TaskDefinition,
    cluster_name: &str,
    namespace: &str,
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name_for(task.task_id())),
            namespace: Some(namespace.to_string()),
            labels: Some(task_labels(task, cluster_name)),
            annotations: Some(task_annotations(task, task_definition)),
            ..Default::default()
        },
        spec: Some(pod_spec(task_definition, "Never")),
        ..Default::default()
    }
}

fn pod_spec(task_definition: &TaskDefinition, restart_policy: &str) -> PodSpec {
    PodSpec {
        containers: task_definition
            .container_definitions
            .iter()
            .map(|cd| container_from_definition(cd, task_definition))
            .collect(),
        restart_policy: Some(restart_policy.to_string()),
        ..Default::default()
    }
}

fn container_from_definition(
    definition: &ContainerDefinition,
    task_definition: &TaskDefinition,
) -> K8sContainer {
    let mut env: Vec<EnvVar> = definition
        .environment
        .iter()
        .map(|kv| EnvVar {
            name: kv.name.clone(),
            value: kv.value.clone(),
            ..Default::default()
        })
        .collect();
    for secret in &definition.secrets {
        env.push(EnvVar {
            name: secret.name.clone(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name_for(task_definition),
                    key: secret_key(&secret.value_from),
                    optional: Some(true),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let ports: Vec<ContainerPort> = definition
        .port_mappings
        .iter()
        .filter_map(|pm| {
            pm.container_port.map(|port| ContainerPort {
                container_port: port,
                protocol: pm.protocol.as_deref().map(|p| p.to_uppercase()),
                ..Default::default()
            })
        })
        .collect();

    K8sContainer {
        name: sanitize_name(&definition.name, 63),
        image: Some(definition.image.clone()),
        command: (!definition.entry_point.is_empty()).then(|| definition.entry_point.clone()),
        args: (!definition.command.is_empty()).then(|| definition.command.clone()),
        env: (!env.is_empty()).then_some(env),
        ports: (!ports.is_empty()).then_some(ports),
        resources: resources_for(definition),
        liveness_probe: definition.health_check.as_ref().map(probe_from_health_check),
        working_dir: definition.working_directory.clone(),
        ..Default::default()
    }
}

fn resources_for(definition: &ContainerDefinition) -> Option<ResourceRequirements> {
    let mut requests = BTreeMap::new();
    if let Some(cpu) = definition.cpu
        && cpu > 0
    {
        // 1024 CPU units = one vCPU
        requests.insert(
            "cpu".to_string(),
            Quantity(format!("{}m", (cpu as i64) * 1000 / 1024)),
        );
    }
    if let Some(memory) = definition.memory.or(definition.memory_reservation)
        && memory > 0
    {
        requests.insert("memory".to_string(), Quantity(format!("{}Mi", memory)));
    }
    if requests.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: Some(requests),
        ..Default::default()
    })
}

fn probe_from_health_check(health_check: &HealthCheck) -> Probe {
    // ECS command shape: ["CMD-SHELL", "curl ..."] or ["CMD", "exe", ...]
    let command = match health_check.command.first().map(String::as_str) {
        Some("CMD-SHELL") => {
            let rest = health_check.command[1..].join(" ");
            vec!["/bin/sh".to_string(), "-c".to_string(), rest]
        }
        Some("CMD") => health_check.command[1..].to_vec(),
        _ => health_check.command.clone(),
    };
    Probe {
        exec: Some(ExecAction {
            command: Some(command),
        }),
        period_seconds: health_check.interval,
        timeout_seconds: health_check.timeout,
        failure_threshold: health_check.retries,
        initial_delay_seconds: health_check.start_period,
        ..Default::default()
    }
}

/// Project a service into its Deployment: replicas from desiredCount,
/// rolling update 25%/25%, progress deadline 600 s.
pub fn deployment_from_service(
    service_name: &str,
    cluster_name: &str,
    replicas: i32,
    task_definition: &TaskDefinition,
    namespace: &str,
) -> Deployment {
    deployment(
        &service_deployment_name(service_name),
        namespace,
        cluster_name,
        replicas,
        task_definition,
        (LABEL_SERVICE, sanitize_name(service_name, 63)),
    )
}

/// Project a task set into its Deployment; the selector matches the
/// task-set id so a service's and a task set's pods never collide.
pub fn deployment_from_task_set(
    task_set: &TaskSet,
    service_name: &str,
    cluster_name: &str,
    task_definition: &TaskDefinition,
    namespace: &str,
) -> Deployment {
    deployment(
        &task_set_deployment_name(service_name, &task_set.id),
        namespace,
        cluster_name,
        task_set.computed_desired_count,
        task_definition,
        (LABEL_TASK_SET, sanitize_name(&task_set.id, 63)),
    )
}

fn deployment(
    name: &str,
    namespace: &str,
    cluster_name: &str,
    replicas: i32,
    task_definition: &TaskDefinition,
    selector: (&str, String),
) -> Deployment {
    let mut labels = BTreeMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_CLUSTER.to_string(), cluster_name.to_string()),
    ]);
    labels.insert(selector.0.to_string(), selector.1.clone());
    let match_labels = BTreeMap::from([(selector.0.to_string(), selector.1)]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(match_labels),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::String("25%".to_string())),
                    max_surge: Some(IntOrString::String("25%".to_string())),
                }),
            }),
            progress_deadline_seconds: Some(600),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec(task_definition, "Always")),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Kubernetes Service for a task set, created iff the task definition
/// exposes container ports or a load balancer is attached. LoadBalancer
/// type when at least one ELBv2 load balancer references it.
pub fn service_from_task_set(
    task_set: &TaskSet,
    service_name: &str,
    task_definition: &TaskDefinition,
    namespace: &str,
) -> Option<K8sService> {
    let ports: Vec<ServicePort> = task_definition
        .container_definitions
        .iter()
        .flat_map(|cd| cd.port_mappings.iter())
        .filter_map(|pm| {
            pm.container_port.map(|port| ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some(
                    pm.protocol
                        .as_deref()
                        .map(|p| p.to_uppercase())
                        .unwrap_or_else(|| "TCP".to_string()),
                ),
                name: Some(sanitize_name(&format!("port-{}", port), 63)),
                ..Default::default()
            })
        })
        .collect();
    if ports.is_empty() && task_set.load_balancers.is_empty() {
        return None;
    }
    let service_type = if task_set.load_balancers.is_empty() {
        "ClusterIP"
    } else {
        "LoadBalancer"
    };
    Some(K8sService {
        metadata: ObjectMeta {
            name: Some(task_set_deployment_name(service_name, &task_set.id)),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                LABEL_TASK_SET.to_string(),
                sanitize_name(&task_set.id, 63),
            )])),
            ports: (!ports.is_empty()).then_some(ports),
            type_: Some(service_type.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Pod phase -> task status. Unknown maps to PENDING, never backwards past
/// what the task already reached.
pub fn status_from_phase(phase: &str) -> TaskStatus {
    match phase {
        "Pending" => TaskStatus::Pending,
        "Running" => TaskStatus::Running,
        "Succeeded" | "Failed" => TaskStatus::Stopped,
        _ => TaskStatus::Pending,
    }
}

/// Whether the pod terminated successfully (exit 0 everywhere).
pub fn pod_succeeded(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Succeeded")
}

/// Per-container status records projected from the pod.
pub fn containers_from_pod(pod: &Pod, fallback_status: TaskStatus) -> Vec<Container> {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref());
    let Some(statuses) = statuses else {
        return vec![];
    };
    statuses
        .iter()
        .map(|cs| {
            let (last_status, exit_code, reason) = match &cs.state {
                Some(state) => {
                    if let Some(terminated) = &state.terminated {
                        (
                            TaskStatus::Stopped,
                            Some(terminated.exit_code),
                            terminated.reason.clone().or(terminated.message.clone()),
                        )
                    } else if state.running.is_some() {
                        (TaskStatus::Running, None, None)
                    } else if let Some(waiting) = &state.waiting {
                        (TaskStatus::Pending, None, waiting.reason.clone())
                    } else {
                        (fallback_status, None, None)
                    }
                }
                None => (fallback_status, None, None),
            };
            Container {
                name: cs.name.clone(),
                image: cs.image.clone(),
                last_status,
                exit_code,
                reason,
                health_status: if cs.ready {
                    HealthStatus::Healthy
                } else if last_status == TaskStatus::Running {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Unknown
                },
                network_interfaces: vec![],
            }
        })
        .collect()
}

/// Pod IP feeds task attachments under awsvpc networking.
pub fn pod_ip(pod: &Pod) -> Option<String> {
    pod.status.as_ref().and_then(|s| s.pod_ip.clone())
}

/// Whether the pod's annotations declare awsvpc networking. Absent
/// annotations mean awsvpc, the default network mode.
pub fn pod_is_awsvpc(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_NETWORK_MODE))
        .is_none_or(|mode| mode == "awsvpc")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stevedore_model::{
        Identity, KeyValuePair, LaunchType, NetworkMode, PortMapping, Scale, ScaleUnit,
        SecretReference, StabilityStatus, TaskDefinitionStatus, TaskSetStatus,
    };

    fn ident() -> Identity {
        Identity::new("us-east-1", "000000000000")
    }

    fn task_definition() -> TaskDefinition {
        let now = Utc::now();
        TaskDefinition {
            task_definition_arn: ident().task_definition_arn("web", 1),
            family: "web".into(),
            revision: 1,
            status: TaskDefinitionStatus::Active,
            container_definitions: vec![ContainerDefinition {
                name: "app".into(),
                image: "nginx:1.0".into(),
                cpu: Some(256),
                memory: Some(512),
                memory_reservation: None,
                essential: Some(true),
                command: vec!["nginx".into(), "-g".into(), "daemon off;".into()],
                entry_point: vec![],
                environment: vec![KeyValuePair {
                    name: "ENV".into(),
                    value: Some("prod".into()),
                }],
                port_mappings: vec![PortMapping {
                    container_port: Some(80),
                    host_port: None,
                    protocol: Some("tcp".into()),
                }],
                secrets: vec![SecretReference {
                    name: "DB_PASSWORD".into(),
                    value_from: "arn:aws:ssm:us-east-1:0:parameter/db/password".into(),
                }],
                health_check: Some(HealthCheck {
                    command: vec!["CMD-SHELL".into(), "curl -f http://localhost/".into()],
                    interval: Some(30),
                    timeout: Some(5),
                    retries: Some(3),
                    start_period: Some(10),
                }),
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
        }
    }

    fn task() -> Task {
        let now = Utc::now();
        Task {
            task_arn: ident().task_arn("default", "abcdef0123456789"),
            cluster_arn: ident().cluster_arn("default"),
            task_definition_arn: ident().task_definition_arn("web", 1),
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
        }
    }

    #[test]
    fn test_namespace_shape() {
        assert_eq!(namespace_for("default", "us-east-1"), "default-us-east-1");
        assert_eq!(legacy_namespace_for("default"), "ecs-default");
    }

    #[test]
    fn test_task_set_deployment_name_is_sanitized_and_bounded() {
        let long = "a".repeat(80);
        let name = task_set_deployment_name(&long, "ts_ID.1");
        assert!(name.len() <= 63);
        assert!(!name.contains('_'));
        assert!(!name.contains('.'));
        assert_eq!(name, name.to_lowercase());
    }

    #[test]
    fn test_pod_from_task_carries_reverse_lookup() {
        let task = task();
        let pod = pod_from_task(&task, &task_definition(), "default", "default-us-east-1");
        let meta = &pod.metadata;
        assert_eq!(meta.name.as_deref(), Some("task-abcdef0123456789"));
        let labels = meta.labels.as_ref().unwrap();
        assert_eq!(labels.get(LABEL_MANAGED).map(String::as_str), Some("true"));
        assert_eq!(
            labels.get(LABEL_TASK_ID).map(String::as_str),
            Some("abcdef0123456789")
        );
        let annotations = meta.annotations.as_ref().unwrap();
        assert_eq!(annotations.get(ANNOTATION_TASK_ARN), Some(&task.task_arn));

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        let container = &spec.containers[0];
        assert_eq!(container.name, "app");
        // ECS command maps to args; entryPoint (absent here) to command
        assert!(container.command.is_none());
        assert_eq!(container.args.as_ref().unwrap().len(), 3);
        // 256 CPU units -> 250m
        let requests = container.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests.get("cpu").unwrap().0, "250m");
        assert_eq!(requests.get("memory").unwrap().0, "512Mi");
        // CMD-SHELL becomes a shell exec probe
        let probe = container.liveness_probe.as_ref().unwrap();
        let exec = probe.exec.as_ref().unwrap().command.as_ref().unwrap();
        assert_eq!(exec[0], "/bin/sh");
        // Secret env var points at the materialised secret
        let env = container.env.as_ref().unwrap();
        let secret_var = env.iter().find(|e| e.name == "DB_PASSWORD").unwrap();
        let selector = secret_var
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(selector.name, "web-secrets-1");
    }

    #[test]
    fn test_deployment_strategy_and_replicas() {
        let deployment =
            deployment_from_service("web-svc", "default", 3, &task_definition(), "default-us-east-1");
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.progress_deadline_seconds, Some(600));
        let rolling = spec.strategy.unwrap().rolling_update.unwrap();
        assert_eq!(
            rolling.max_surge,
            Some(IntOrString::String("25%".to_string()))
        );
        let template_spec = spec.template.spec.unwrap();
        assert_eq!(template_spec.restart_policy.as_deref(), Some("Always"));
    }

    fn task_set(load_balancers: bool) -> TaskSet {
        let now = Utc::now();
        TaskSet {
            id: "ts-1".into(),
            task_set_arn: ident().task_set_arn("default", "web-svc", "ts-1"),
            service_arn: ident().service_arn("default", "web-svc"),
            cluster_arn: ident().cluster_arn("default"),
            external_id: None,
            task_definition: ident().task_definition_arn("web", 1),
            scale: Scale {
                value: 100.0,
                unit: ScaleUnit::Percent,
            },
            computed_desired_count: 2,
            status: TaskSetStatus::Active,
            stability_status: StabilityStatus::Stabilizing,
            primary: false,
            running_count: 0,
            pending_count: 0,
            launch_type: LaunchType::Fargate,
            load_balancers: if load_balancers {
                vec![Default::default()]
            } else {
                vec![]
            },
            service_registries: vec![],
            region: "us-east-1".into(),
            account_id: "000000000000".into(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[test]
    fn test_service_from_task_set_type_follows_load_balancers() {
        let svc = service_from_task_set(&task_set(false), "web-svc", &task_definition(), "ns")
            .expect("ports exposed");
        assert_eq!(svc.spec.as_ref().unwrap().type_.as_deref(), Some("ClusterIP"));

        let svc = service_from_task_set(&task_set(true), "web-svc", &task_definition(), "ns")
            .expect("load balancer attached");
        assert_eq!(
            svc.spec.as_ref().unwrap().type_.as_deref(),
            Some("LoadBalancer")
        );
    }

    #[test]
    fn test_service_from_task_set_absent_without_ports_or_lb() {
        let mut td = task_definition();
        td.container_definitions[0].port_mappings.clear();
        assert!(service_from_task_set(&task_set(false), "web-svc", &td, "ns").is_none());
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(status_from_phase("Pending"), TaskStatus::Pending);
        assert_eq!(status_from_phase("Running"), TaskStatus::Running);
        assert_eq!(status_from_phase("Succeeded"), TaskStatus::Stopped);
        assert_eq!(status_from_phase("Failed"), TaskStatus::Stopped);
        assert_eq!(status_from_phase("Unknown"), TaskStatus::Pending);
    }

    #[test]
    fn test_secret_materialisation() {
        let td = task_definition();
        let secret = secret_for(&td, "ns").unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("web-secrets-1"));
        let data = secret.data.unwrap();
        assert_eq!(
            data.get("password").map(|b| b.0.as_slice()),
            Some(b"placeholder".as_slice())
        );
    }
}
