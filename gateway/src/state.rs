use std::sync::Arc;

use chrono::{DateTime, Utc};
use stevedore_ecs::Ecs;
use stevedore_elbv2::Elbv2;
use stevedore_events::{EventHub, OriginPolicy, SocketConfig};
use stevedore_orchestrator::Coordinator;
use stevedore_store::Storage;

use crate::proxy::UpstreamProxy;
use crate::sd_wire::ServiceDiscoveryHandler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub ecs: Arc<Ecs>,
    pub elbv2: Arc<Elbv2>,
    pub sd: Arc<dyn ServiceDiscoveryHandler>,
    pub coordinator: Arc<Coordinator>,
    pub hub: EventHub,
    pub origin_policy: OriginPolicy,
    pub socket_config: SocketConfig,
    pub proxy: UpstreamProxy,
    pub started_at: DateTime<Utc>,
}
