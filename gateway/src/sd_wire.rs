//! Service-discovery wire handler.
//!
//! The service-discovery subsystem is an external collaborator; the
//! dispatcher only owns routing its namespace to a handler. The bundled
//! handler answers every operation with the not-implemented envelope, and
//! deployments that carry a real subsystem swap the trait object.

use async_trait::async_trait;
use axum::response::Response;
use bytes::Bytes;
use stevedore_ecs::EcsError;

use crate::ecs_wire::error_response;

pub const SD_TARGET_PREFIX: &str = "Route53AutoNaming_v20170314.";

#[async_trait]
pub trait ServiceDiscoveryHandler: Send + Sync {
    async fn handle(&self, action: &str, body: Bytes) -> Response;
}

pub struct StubServiceDiscovery;

#[async_trait]
impl ServiceDiscoveryHandler for StubServiceDiscovery {
    async fn handle(&self, action: &str, _body: Bytes) -> Response {
        tracing::debug!(action, "service discovery operation stubbed");
        error_response(&EcsError::NotImplemented(format!(
            "service discovery operation {}",
            action
        )))
    }
}
