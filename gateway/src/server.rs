//! Server assembly: storage, coordinator, cores, reconcilers, router.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use chrono::Utc;
use stevedore_common::shutdown::shutdown_signal;
use stevedore_ecs::Ecs;
use stevedore_elbv2::Elbv2;
use stevedore_events::{ConnectionLimits, EventHub, OriginPolicy, SocketConfig};
use stevedore_model::Identity;
use stevedore_orchestrator::{Coordinator, KubeAccess, NoopServiceRegistry, reconcile};
use stevedore_store::{MemoryStorage, PostgresStorage, Storage};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;

use crate::args::Cli;
use crate::dispatch::{dispatch, panic_response};
use crate::health::{health, health_detailed};
use crate::proxy::UpstreamProxy;
use crate::sd_wire::StubServiceDiscovery;
use crate::state::AppState;
use crate::ws::ws_handler;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/ws", get(ws_handler))
        .fallback(dispatch)
        .layer(axum::middleware::from_fn(
            stevedore_common::access_log::api,
        ))
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

pub async fn run_server(args: Cli) -> Result<()> {
    let identity = Identity::new(args.cloud.region.clone(), args.cloud.account_id.clone());

    let storage: Arc<dyn Storage> = match args.database.db.as_str() {
        "memory" => Arc::new(MemoryStorage::new()),
        "postgres" => {
            let pg = &args.database.postgres;
            Arc::new(
                PostgresStorage::connect(
                    &pg.postgres_host,
                    pg.postgres_port,
                    &pg.postgres_database,
                    &pg.postgres_username,
                    pg.postgres_password.as_deref(),
                )
                .await
                .context("failed to connect to postgres")?,
            )
        }
        other => anyhow::bail!("unknown storage backend: {}", other),
    };

    let hub = EventHub::new(ConnectionLimits {
        max_per_user: args.websocket.ws_max_connections_per_user,
        max_per_ip: args.websocket.ws_max_connections_per_ip,
    });
    let origin_policy = OriginPolicy::new(args.websocket.ws_allowed_origins.clone());
    let socket_config = SocketConfig {
        rate_limit_per_minute: args.websocket.ws_rate_limit_per_minute,
    };

    let access = kube_access(&args).await;
    let coordinator = Arc::new(Coordinator::new(
        storage.clone(),
        hub.clone(),
        identity.clone(),
        access,
        Arc::new(NoopServiceRegistry),
    ));

    let ecs = Arc::new(Ecs::new(
        storage.clone(),
        coordinator.clone(),
        hub.clone(),
        identity.clone(),
    ));
    let elbv2 = Arc::new(Elbv2::new(storage.clone(), identity.clone()));

    if !args.runtime.test_mode {
        if let Err(e) = coordinator.restore_tasks().await {
            tracing::warn!(error = %e, "task restore failed, continuing");
        }
    }

    let cancel = CancellationToken::new();
    spawn_reconcilers(&args, &storage, &hub, &coordinator, &cancel);

    let state = AppState {
        storage,
        ecs,
        elbv2,
        sd: Arc::new(StubServiceDiscovery),
        coordinator: coordinator.clone(),
        hub,
        origin_policy,
        socket_config,
        proxy: UpstreamProxy::new(args.upstream.upstream_endpoint.clone())?,
        started_at: Utc::now(),
    };

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    tracing::info!(%addr, region = %identity.region, test_mode = args.runtime.test_mode, "starting stevedore gateway");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    coordinator.watchers().cancel_all().await;
    tracing::info!("gateway stopped gracefully");
    Ok(())
}

async fn kube_access(args: &Cli) -> KubeAccess {
    if args.runtime.test_mode {
        tracing::info!("test mode: Kubernetes I/O disabled");
        return KubeAccess::Disabled;
    }
    if args.runtime.container_mode {
        tracing::info!("container mode: Kubernetes client deferred to first use");
        return KubeAccess::Deferred(Default::default());
    }
    match build_client(args.runtime.kubeconfig.as_deref()).await {
        Ok(client) => KubeAccess::Live(client),
        Err(e) => {
            tracing::warn!(error = %e, "Kubernetes client unavailable at startup, deferring");
            KubeAccess::Deferred(Default::default())
        }
    }
}

/// In-cluster configuration first; an explicit kubeconfig path wins when
/// given, otherwise the standard discovery order applies.
async fn build_client(kubeconfig: Option<&str>) -> Result<kube::Client> {
    match kubeconfig {
        Some(path) => {
            let config = kube::Config::from_custom_kubeconfig(
                kube::config::Kubeconfig::read_from(path)?,
                &kube::config::KubeConfigOptions::default(),
            )
            .await?;
            Ok(kube::Client::try_from(config)?)
        }
        None => Ok(kube::Client::try_default().await?),
    }
}

fn spawn_reconcilers(
    args: &Cli,
    storage: &Arc<dyn Storage>,
    hub: &EventHub,
    coordinator: &Arc<Coordinator>,
    cancel: &CancellationToken,
) {
    if args.runtime.test_mode {
        tokio::spawn(reconcile::run_test_lifecycle(
            storage.clone(),
            hub.clone(),
            cancel.clone(),
        ));
    }

    tokio::spawn(reconcile::run_task_set_stability(
        storage.clone(),
        hub.clone(),
        coordinator.clone(),
        args.cloud.region.clone(),
        cancel.clone(),
    ));

    tokio::spawn(reconcile::run_log_retention(
        storage.clone(),
        chrono::Duration::hours(args.retention.log_retention_hours),
        cancel.clone(),
    ));
}
