//! ECS JSON adapter: `X-Amz-Target` discriminator to operation dispatch.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use stevedore_ecs::{Ecs, EcsError};

pub const ECS_TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113.";

pub async fn handle(ecs: &Ecs, action: &str, body: Bytes) -> Response {
    match dispatch(ecs, action, &body).await {
        Ok(value) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-amz-json-1.1")],
            value.to_string(),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

pub fn error_response(error: &EcsError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = serde_json::json!({
        "__type": error.wire_code(),
        "message": error.to_string(),
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/x-amz-json-1.1")],
        envelope.to_string(),
    )
        .into_response()
}

/// Empty bodies are valid for parameterless operations.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, EcsError> {
    let body = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(body)
        .map_err(|e| EcsError::InvalidParameter(format!("invalid request body: {}", e)))
}

fn encode<T: serde::Serialize>(value: T) -> Result<serde_json::Value, EcsError> {
    serde_json::to_value(value).map_err(|e| EcsError::Internal(e.to_string()))
}

async fn dispatch(ecs: &Ecs, action: &str, body: &[u8]) -> Result<serde_json::Value, EcsError> {
    match action {
        "CreateCluster" => encode(ecs.create_cluster(decode(body)?).await?),
        "DeleteCluster" => encode(ecs.delete_cluster(decode(body)?).await?),
        "DescribeClusters" => encode(ecs.describe_clusters(decode(body)?).await?),
        "ListClusters" => encode(ecs.list_clusters(decode(body)?).await?),

        "RegisterTaskDefinition" => encode(ecs.register_task_definition(decode(body)?).await?),
        "DeregisterTaskDefinition" => encode(ecs.deregister_task_definition(decode(body)?).await?),
        "DescribeTaskDefinition" => encode(ecs.describe_task_definition(decode(body)?).await?),
        "ListTaskDefinitions" => encode(ecs.list_task_definitions(decode(body)?).await?),
        "ListTaskDefinitionFamilies" => {
            encode(ecs.list_task_definition_families(decode(body)?).await?)
        }

        "RunTask" => encode(ecs.run_task(decode(body)?).await?),
        "StartTask" => encode(ecs.start_task(decode(body)?).await?),
        "StopTask" => encode(ecs.stop_task(decode(body)?).await?),
        "DescribeTasks" => encode(ecs.describe_tasks(decode(body)?).await?),
        "ListTasks" => encode(ecs.list_tasks(decode(body)?).await?),

        "CreateService" => encode(ecs.create_service(decode(body)?).await?),
        "UpdateService" => encode(ecs.update_service(decode(body)?).await?),
        "DeleteService" => encode(ecs.delete_service(decode(body)?).await?),
        "DescribeServices" => encode(ecs.describe_services(decode(body)?).await?),
        "ListServices" => encode(ecs.list_services(decode(body)?).await?),

        "CreateTaskSet" => encode(ecs.create_task_set(decode(body)?).await?),
        "UpdateTaskSet" => encode(ecs.update_task_set(decode(body)?).await?),
        "DeleteTaskSet" => encode(ecs.delete_task_set(decode(body)?).await?),
        "DescribeTaskSets" => encode(ecs.describe_task_sets(decode(body)?).await?),
        "UpdateServicePrimaryTaskSet" => {
            encode(ecs.update_service_primary_task_set(decode(body)?).await?)
        }

        "RegisterContainerInstance" => {
            encode(ecs.register_container_instance(decode(body)?).await?)
        }
        "DeregisterContainerInstance" => {
            encode(ecs.deregister_container_instance(decode(body)?).await?)
        }
        "DescribeContainerInstances" => {
            encode(ecs.describe_container_instances(decode(body)?).await?)
        }
        "ListContainerInstances" => encode(ecs.list_container_instances(decode(body)?).await?),
        "UpdateContainerInstancesState" => {
            encode(ecs.update_container_instances_state(decode(body)?).await?)
        }

        "PutAttributes" => encode(ecs.put_attributes(decode(body)?).await?),
        "DeleteAttributes" => encode(ecs.delete_attributes(decode(body)?).await?),
        "ListAttributes" => encode(ecs.list_attributes(decode(body)?).await?),

        "TagResource" => encode(ecs.tag_resource(decode(body)?).await?),
        "UntagResource" => encode(ecs.untag_resource(decode(body)?).await?),
        "ListTagsForResource" => encode(ecs.list_tags_for_resource(decode(body)?).await?),

        other => Err(EcsError::NotImplemented(other.to_string())),
    }
}
