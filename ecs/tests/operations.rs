//! End-to-end operation semantics against the in-memory backend with
//! Kubernetes disabled (the record side of the contract).

use std::sync::Arc;

use stevedore_ecs::api::*;
use stevedore_ecs::{Ecs, EcsError};
use stevedore_events::{ConnectionLimits, EventHub, MATCH_ANY};
use stevedore_model::{
    ContainerDefinition, DeploymentController, DeploymentControllerType, Identity, Scale,
    ScaleUnit, TaskStatus,
};
use stevedore_orchestrator::{Coordinator, KubeAccess, NoopServiceRegistry};
use stevedore_store::{MemoryStorage, Storage};

fn ecs() -> (Ecs, EventHub) {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let hub = EventHub::new(ConnectionLimits::default());
    let identity = Identity::new("us-east-1", "000000000000");
    let coordinator = Arc::new(Coordinator::new(
        storage.clone(),
        hub.clone(),
        identity.clone(),
        KubeAccess::Disabled,
        Arc::new(NoopServiceRegistry),
    ));
    (
        Ecs::new(storage, coordinator, hub.clone(), identity),
        hub,
    )
}

fn container(name: &str, image: &str) -> ContainerDefinition {
    ContainerDefinition {
        name: name.into(),
        image: image.into(),
        cpu: None,
        memory: Some(512),
        memory_reservation: None,
        essential: Some(true),
        command: vec![],
        entry_point: vec![],
        environment: vec![],
        port_mappings: vec![],
        secrets: vec![],
        health_check: None,
        log_configuration: None,
        working_directory: None,
    }
}

async fn register(ecs: &Ecs, family: &str, image: &str) -> i32 {
    ecs.register_task_definition(RegisterTaskDefinitionRequest {
        family: Some(family.into()),
        container_definitions: vec![container("app", image)],
        network_mode: None,
        cpu: None,
        memory: None,
        volumes: vec![],
        placement_constraints: vec![],
        requires_compatibilities: vec![],
        execution_role_arn: None,
        task_role_arn: None,
        tags: vec![],
    })
    .await
    .unwrap()
    .task_definition
    .revision
}

#[tokio::test]
async fn test_create_cluster_is_idempotent() {
    let (ecs, _) = ecs();
    let first = ecs
        .create_cluster(CreateClusterRequest {
            cluster_name: Some("test".into()),
            tags: vec![],
        })
        .await
        .unwrap();
    let second = ecs
        .create_cluster(CreateClusterRequest {
            cluster_name: Some("test".into()),
            tags: vec![],
        })
        .await
        .unwrap();
    assert_eq!(first.cluster.cluster_arn, second.cluster.cluster_arn);
    assert_eq!(
        first.cluster.cluster_arn,
        "arn:aws:ecs:us-east-1:000000000000:cluster/test"
    );

    let list = ecs
        .list_clusters(ListClustersRequest::default())
        .await
        .unwrap();
    assert_eq!(
        list.cluster_arns,
        vec!["arn:aws:ecs:us-east-1:000000000000:cluster/test"]
    );
}

#[tokio::test]
async fn test_revisions_are_contiguous_and_latest_wins() {
    let (ecs, _) = ecs();
    assert_eq!(register(&ecs, "web", "nginx:1.0").await, 1);
    assert_eq!(register(&ecs, "web", "nginx:2.0").await, 2);

    let described = ecs
        .describe_task_definition(DescribeTaskDefinitionRequest {
            task_definition: "web".into(),
        })
        .await
        .unwrap();
    assert_eq!(described.task_definition.revision, 2);
    assert_eq!(
        described.task_definition.container_definitions[0].image,
        "nginx:2.0"
    );

    // Deregistering the latest makes revision 1 the latest ACTIVE.
    ecs.deregister_task_definition(DeregisterTaskDefinitionRequest {
        task_definition: "web:2".into(),
    })
    .await
    .unwrap();
    let described = ecs
        .describe_task_definition(DescribeTaskDefinitionRequest {
            task_definition: "web".into(),
        })
        .await
        .unwrap();
    assert_eq!(described.task_definition.revision, 1);

    // The revision is retained, addressable, and never reused.
    assert_eq!(register(&ecs, "web", "nginx:3.0").await, 3);
}

#[tokio::test]
async fn test_register_requires_family_and_containers() {
    let (ecs, _) = ecs();
    let err = ecs
        .register_task_definition(RegisterTaskDefinitionRequest {
            family: None,
            container_definitions: vec![container("app", "nginx")],
            network_mode: None,
            cpu: None,
            memory: None,
            volumes: vec![],
            placement_constraints: vec![],
            requires_compatibilities: vec![],
            execution_role_arn: None,
            task_role_arn: None,
            tags: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EcsError::InvalidParameter(_)));

    let err = ecs
        .register_task_definition(RegisterTaskDefinitionRequest {
            family: Some("web".into()),
            container_definitions: vec![],
            network_mode: None,
            cpu: None,
            memory: None,
            volumes: vec![],
            placement_constraints: vec![],
            requires_compatibilities: vec![],
            execution_role_arn: None,
            task_role_arn: None,
            tags: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EcsError::InvalidParameter(_)));
}

#[tokio::test]
async fn test_run_task_creates_provisioning_tasks_with_distinct_arns() {
    let (ecs, _) = ecs();
    ecs.create_cluster(CreateClusterRequest {
        cluster_name: Some("test-cluster".into()),
        tags: vec![],
    })
    .await
    .unwrap();
    register(&ecs, "test-task", "busybox").await;

    let response = ecs
        .run_task(RunTaskRequest {
            cluster: Some("test-cluster".into()),
            task_definition: "test-task:1".into(),
            count: Some(3),
            launch_type: None,
            started_by: None,
            group: None,
            tags: vec![],
        })
        .await
        .unwrap();
    assert_eq!(response.tasks.len(), 3);
    assert!(response.failures.is_empty());
    let mut arns: Vec<&str> = response.tasks.iter().map(|t| t.task_arn.as_str()).collect();
    arns.sort();
    arns.dedup();
    assert_eq!(arns.len(), 3);
    for task in &response.tasks {
        assert_eq!(task.last_status, TaskStatus::Provisioning);
        // Degraded mode still records pod coordinates
        assert!(task.pod_name.is_some());
    }

    // Running tasks are counted on read, PROVISIONING counts as pending.
    let described = ecs
        .describe_clusters(DescribeClustersRequest {
            clusters: vec!["test-cluster".into()],
        })
        .await
        .unwrap();
    assert_eq!(described.clusters[0].pending_tasks_count, 3);
    assert_eq!(described.clusters[0].running_tasks_count, 0);
}

#[tokio::test]
async fn test_stop_task_is_idempotent_and_publishes() {
    let (ecs, hub) = ecs();
    let (client, mut rx) = hub.register(None, None).await.unwrap();
    hub.subscribe(client, MATCH_ANY.into(), MATCH_ANY.into())
        .await;

    ecs.create_cluster(CreateClusterRequest {
        cluster_name: Some("test".into()),
        tags: vec![],
    })
    .await
    .unwrap();
    register(&ecs, "job", "busybox").await;
    let run = ecs
        .run_task(RunTaskRequest {
            cluster: Some("test".into()),
            task_definition: "job".into(),
            count: Some(1),
            launch_type: None,
            started_by: None,
            group: None,
            tags: vec![],
        })
        .await
        .unwrap();
    let task_arn = run.tasks[0].task_arn.clone();

    let stopped = ecs
        .stop_task(StopTaskRequest {
            cluster: Some("test".into()),
            task: task_arn.clone(),
            reason: Some("User requested stop".into()),
        })
        .await
        .unwrap();
    assert_eq!(stopped.task.desired_status, TaskStatus::Stopped);
    assert_eq!(
        stopped.task.stopped_reason.as_deref(),
        Some("User requested stop")
    );
    assert!(stopped.task.stopping_at.is_some());

    // Second stop returns the current record without error.
    let again = ecs
        .stop_task(StopTaskRequest {
            cluster: Some("test".into()),
            task: task_arn,
            reason: Some("again".into()),
        })
        .await
        .unwrap();
    assert_eq!(
        again.task.stopped_reason.as_deref(),
        Some("User requested stop")
    );

    // The subscribed client saw task_update frames.
    let mut saw_task_update = false;
    while let Ok(frame) = rx.try_recv() {
        if frame.contains("\"task_update\"") {
            saw_task_update = true;
        }
    }
    assert!(saw_task_update);
}

#[tokio::test]
async fn test_container_instance_pagination_round_trip() {
    let (ecs, _) = ecs();
    ecs.create_cluster(CreateClusterRequest {
        cluster_name: Some("test-cluster".into()),
        tags: vec![],
    })
    .await
    .unwrap();
    for _ in 0..15 {
        ecs.register_container_instance(RegisterContainerInstanceRequest {
            cluster: Some("test-cluster".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    }

    let mut pages = Vec::new();
    let mut token = None;
    loop {
        let page = ecs
            .list_container_instances(ListContainerInstancesRequest {
                cluster: Some("test-cluster".into()),
                status: None,
                max_results: Some(5),
                next_token: token.clone(),
            })
            .await
            .unwrap();
        pages.push(page.container_instance_arns.clone());
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    assert_eq!(pages.len(), 3);
    assert!(pages.iter().all(|p| p.len() == 5));

    // Pages are disjoint and their union is the full set.
    let mut all: Vec<String> = pages.into_iter().flatten().collect();
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), total);
    assert_eq!(total, 15);

    let full = ecs
        .list_container_instances(ListContainerInstancesRequest {
            cluster: Some("test-cluster".into()),
            status: None,
            max_results: Some(100),
            next_token: None,
        })
        .await
        .unwrap();
    let mut full_sorted = full.container_instance_arns.clone();
    full_sorted.sort();
    assert_eq!(all, full_sorted);
}

#[tokio::test]
async fn test_create_service_is_idempotent() {
    let (ecs, _) = ecs();
    ecs.create_cluster(CreateClusterRequest {
        cluster_name: Some("default".into()),
        tags: vec![],
    })
    .await
    .unwrap();
    register(&ecs, "web", "nginx").await;

    let request = CreateServiceRequest {
        cluster: None,
        service_name: "web-svc".into(),
        task_definition: Some("web".into()),
        desired_count: Some(2),
        launch_type: None,
        load_balancers: vec![],
        service_registries: vec![],
        deployment_controller: None,
        platform_version: None,
        tags: vec![],
    };
    let first = ecs.create_service(request.clone()).await.unwrap();
    let second = ecs.create_service(request).await.unwrap();
    assert_eq!(first.service.service_arn, second.service.service_arn);
    assert_eq!(second.service.desired_count, 2);
}

#[tokio::test]
async fn test_task_set_requires_external_controller() {
    let (ecs, _) = ecs();
    ecs.create_cluster(CreateClusterRequest {
        cluster_name: Some("default".into()),
        tags: vec![],
    })
    .await
    .unwrap();
    register(&ecs, "web", "nginx").await;
    ecs.create_service(CreateServiceRequest {
        cluster: None,
        service_name: "plain".into(),
        task_definition: Some("web".into()),
        desired_count: Some(1),
        launch_type: None,
        load_balancers: vec![],
        service_registries: vec![],
        deployment_controller: None,
        platform_version: None,
        tags: vec![],
    })
    .await
    .unwrap();

    let err = ecs
        .create_task_set(CreateTaskSetRequest {
            cluster: "default".into(),
            service: "plain".into(),
            task_definition: "web".into(),
            external_id: None,
            scale: None,
            launch_type: None,
            load_balancers: vec![],
            service_registries: vec![],
            client_token: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EcsError::FailedPrecondition(_)));
}

#[tokio::test]
async fn test_task_set_scale_math() {
    let (ecs, _) = ecs();
    ecs.create_cluster(CreateClusterRequest {
        cluster_name: Some("default".into()),
        tags: vec![],
    })
    .await
    .unwrap();
    register(&ecs, "web", "nginx").await;
    ecs.create_service(CreateServiceRequest {
        cluster: None,
        service_name: "ext".into(),
        task_definition: None,
        desired_count: Some(3),
        launch_type: None,
        load_balancers: vec![],
        service_registries: vec![],
        deployment_controller: Some(DeploymentController {
            controller_type: DeploymentControllerType::External,
        }),
        platform_version: None,
        tags: vec![],
    })
    .await
    .unwrap();

    let created = ecs
        .create_task_set(CreateTaskSetRequest {
            cluster: "default".into(),
            service: "ext".into(),
            task_definition: "web".into(),
            external_id: None,
            scale: Some(Scale {
                value: 50.0,
                unit: ScaleUnit::Percent,
            }),
            launch_type: None,
            load_balancers: vec![],
            service_registries: vec![],
            client_token: None,
        })
        .await
        .unwrap();
    // floor(3 * 50 / 100) = 1
    assert_eq!(created.task_set.computed_desired_count, 1);

    let updated = ecs
        .update_task_set(UpdateTaskSetRequest {
            cluster: "default".into(),
            service: "ext".into(),
            task_set: created.task_set.id.clone(),
            scale: Scale {
                value: 2.0,
                unit: ScaleUnit::Count,
            },
        })
        .await
        .unwrap();
    assert_eq!(updated.task_set.computed_desired_count, 2);
}

#[tokio::test]
async fn test_describe_tasks_reports_missing() {
    let (ecs, _) = ecs();
    ecs.create_cluster(CreateClusterRequest {
        cluster_name: Some("default".into()),
        tags: vec![],
    })
    .await
    .unwrap();
    let response = ecs
        .describe_tasks(DescribeTasksRequest {
            cluster: None,
            tasks: vec!["deadbeefdeadbeefdeadbeefdeadbeef".into()],
        })
        .await
        .unwrap();
    assert!(response.tasks.is_empty());
    assert_eq!(response.failures.len(), 1);
    assert_eq!(response.failures[0].reason, "MISSING");
}

#[tokio::test]
async fn test_unknown_cluster_is_cluster_not_found() {
    let (ecs, _) = ecs();
    let err = ecs
        .list_tasks(ListTasksRequest {
            cluster: Some("nope".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EcsError::ClusterNotFound));
}
