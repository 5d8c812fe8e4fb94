//! Dispatcher and adapter behaviour through the public router, backed by
//! the in-memory store with Kubernetes disabled.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use http_body_util::BodyExt;
use stevedore_ecs::Ecs;
use stevedore_elbv2::Elbv2;
use stevedore_events::{ConnectionLimits, EventHub, OriginPolicy, SocketConfig};
use stevedore_gateway::proxy::UpstreamProxy;
use stevedore_gateway::sd_wire::StubServiceDiscovery;
use stevedore_gateway::server::router;
use stevedore_gateway::state::AppState;
use stevedore_model::Identity;
use stevedore_orchestrator::{Coordinator, KubeAccess, NoopServiceRegistry};
use stevedore_store::{MemoryStorage, Storage};
use tower::ServiceExt;

fn app() -> Router {
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
    let state = AppState {
        storage: storage.clone(),
        ecs: Arc::new(Ecs::new(
            storage.clone(),
            coordinator.clone(),
            hub.clone(),
            identity.clone(),
        )),
        elbv2: Arc::new(Elbv2::new(storage, identity)),
        sd: Arc::new(StubServiceDiscovery),
        coordinator,
        hub,
        origin_policy: OriginPolicy::default(),
        socket_config: SocketConfig {
            rate_limit_per_minute: 600,
        },
        proxy: UpstreamProxy::new("http://127.0.0.1:9".into()).unwrap(),
        started_at: Utc::now(),
    };
    router(state)
}

fn ecs_request(action: &str, body: &str) -> Request<Body> {
    Request::post("/")
        .header("x-amz-target", format!("AmazonEC2ContainerServiceV20141113.{}", action))
        .header(header::CONTENT_TYPE, "application/x-amz-json-1.1")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn form_request(body: &str) -> Request<Body> {
    Request::post("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_create_and_list_clusters_over_the_wire() {
    let app = app();
    let response = app
        .clone()
        .oneshot(ecs_request("CreateCluster", r#"{"clusterName":"test"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(
        first["cluster"]["clusterArn"],
        "arn:aws:ecs:us-east-1:000000000000:cluster/test"
    );
    assert_eq!(first["cluster"]["status"], "ACTIVE");

    // Idempotent re-create returns the identical identity triple.
    let response = app
        .clone()
        .oneshot(ecs_request("CreateCluster", r#"{"clusterName":"test"}"#))
        .await
        .unwrap();
    let second = body_json(response).await;
    assert_eq!(first["cluster"]["clusterArn"], second["cluster"]["clusterArn"]);
    assert_eq!(
        first["cluster"]["clusterName"],
        second["cluster"]["clusterName"]
    );
    assert_eq!(first["cluster"]["status"], second["cluster"]["status"]);

    let response = app
        .oneshot(ecs_request("ListClusters", "{}"))
        .await
        .unwrap();
    let list = body_json(response).await;
    assert_eq!(
        list["clusterArns"],
        serde_json::json!(["arn:aws:ecs:us-east-1:000000000000:cluster/test"])
    );
}

#[tokio::test]
async fn test_task_definition_revisions_over_the_wire() {
    let app = app();
    for image in ["nginx:1.0", "nginx:2.0"] {
        let body = format!(
            r#"{{"family":"web","containerDefinitions":[{{"name":"app","image":"{}","memory":512,"essential":true}}]}}"#,
            image
        );
        let response = app
            .clone()
            .oneshot(ecs_request("RegisterTaskDefinition", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(ecs_request(
            "DescribeTaskDefinition",
            r#"{"taskDefinition":"web"}"#,
        ))
        .await
        .unwrap();
    let described = body_json(response).await;
    assert_eq!(described["taskDefinition"]["revision"], 2);
    assert_eq!(
        described["taskDefinition"]["containerDefinitions"][0]["image"],
        "nginx:2.0"
    );
}

#[tokio::test]
async fn test_unknown_action_is_not_implemented() {
    let response = app()
        .oneshot(ecs_request("LaunchRocket", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["__type"], "InvalidAction");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_request() {
    let response = app()
        .oneshot(ecs_request("CreateCluster", "{not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["__type"], "InvalidParameterException");
}

#[tokio::test]
async fn test_empty_body_is_valid_for_parameterless_ops() {
    let response = app()
        .oneshot(ecs_request("ListClusters", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_elbv2_create_load_balancer_xml() {
    let app = app();
    let body = "Action=CreateLoadBalancer&Version=2015-12-01&Name=web&Subnets.member.1=subnet-a";
    let response = app.clone().oneshot(form_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_text(response).await;
    assert!(xml.contains("<CreateLoadBalancerResponse xmlns=\"http://elasticloadbalancing.amazonaws.com/doc/2015-12-01/\">"));
    assert!(xml.contains("<LoadBalancerName>web</LoadBalancerName>"));
    assert!(xml.contains("<RequestId>"));

    // Duplicate name comes back as the XML error envelope.
    let response = app.oneshot(form_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let xml = body_text(response).await;
    assert!(xml.contains("<Code>DuplicateLoadBalancerName</Code>"));
}

#[tokio::test]
async fn test_elbv2_stubbed_modify_returns_empty_envelope() {
    let response = app()
        .oneshot(form_request(
            "Action=SetRulePriorities&Version=2015-12-01&RulePriorities.member.1.Priority=5",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_text(response).await;
    assert!(xml.contains("<SetRulePrioritiesResult></SetRulePrioritiesResult>"));
}

#[tokio::test]
async fn test_sd_namespace_routes_to_stub() {
    let response = app()
        .oneshot(
            Request::post("/")
                .header("x-amz-target", "Route53AutoNaming_v20170314.ListNamespaces")
                .header(header::CONTENT_TYPE, "application/x-amz-json-1.1")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["__type"], "InvalidAction");
}

#[tokio::test]
async fn test_ws_upgrade_rejects_foreign_origin() {
    let response = app()
        .oneshot(
            Request::get("/ws")
                .header("host", "localhost:8080")
                .header("origin", "http://evil.example")
                .header("connection", "upgrade")
                .header("upgrade", "websocket")
                .header("sec-websocket-version", "13")
                .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_run_and_stop_task_over_the_wire() {
    let app = app();
    app.clone()
        .oneshot(ecs_request("CreateCluster", r#"{"clusterName":"test-cluster"}"#))
        .await
        .unwrap();
    app.clone()
        .oneshot(ecs_request(
            "RegisterTaskDefinition",
            r#"{"family":"test-task","containerDefinitions":[{"name":"app","image":"busybox","command":["echo"],"essential":true}]}"#,
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(ecs_request(
            "RunTask",
            r#"{"cluster":"test-cluster","taskDefinition":"test-task:1","count":3}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let run = body_json(response).await;
    assert_eq!(run["tasks"].as_array().unwrap().len(), 3);
    for task in run["tasks"].as_array().unwrap() {
        assert_eq!(task["lastStatus"], "PROVISIONING");
    }

    let task_arn = run["tasks"][0]["taskArn"].as_str().unwrap().to_string();
    let stop_body = format!(
        r#"{{"cluster":"test-cluster","task":"{}","reason":"User requested stop"}}"#,
        task_arn
    );
    let response = app
        .clone()
        .oneshot(ecs_request("StopTask", &stop_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stopped = body_json(response).await;
    assert_eq!(stopped["task"]["desiredStatus"], "STOPPED");
    assert_eq!(stopped["task"]["stoppedReason"], "User requested stop");

    // Idempotent second stop.
    let response = app
        .oneshot(ecs_request("StopTask", &stop_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
