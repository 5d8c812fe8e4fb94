//! Cluster operations.

use stevedore_model::{ClusterStatus, arn};
use stevedore_store::{PageRequest, StoreError};

use crate::api::*;
use crate::core::{DEFAULT_CLUSTER, Ecs};
use crate::error::{EcsError, Result};

impl Ecs {
    /// Idempotent by name: re-creating an existing cluster returns the
    /// record unchanged. The backing namespace is requested up front so
    /// later task placement never races namespace creation.
    pub async fn create_cluster(&self, request: CreateClusterRequest) -> Result<ClusterResponse> {
        let name = request
            .cluster_name
            .as_deref()
            .unwrap_or(DEFAULT_CLUSTER)
            .to_string();
        if name.is_empty() {
            return Err(EcsError::InvalidParameter("clusterName is empty".into()));
        }

        if let Some(existing) = self.storage.clusters().get(&name).await? {
            let cluster = self.with_cluster_counts(existing).await?;
            return Ok(ClusterResponse { cluster });
        }

        let mut cluster = self.new_cluster(&name);
        cluster.tags = request.tags;
        match self.storage.clusters().create(&cluster).await {
            Ok(()) => {}
            // Lost a race with a concurrent create of the same name.
            Err(StoreError::Conflict(_)) => {
                let existing = self
                    .storage
                    .clusters()
                    .get(&name)
                    .await?
                    .ok_or_else(|| EcsError::Internal("cluster vanished after conflict".into()))?;
                return Ok(ClusterResponse { cluster: existing });
            }
            Err(e) => return Err(e.into()),
        }

        let namespace = self.coordinator.namespace_for_cluster(&name);
        if let Err(e) = self.coordinator.ensure_namespace(&namespace).await {
            tracing::warn!(error = %e, cluster = %name, "namespace creation failed, will retry on first task");
        }

        self.publish(
            "metric_update",
            "cluster",
            &cluster.cluster_name,
            serde_json::to_value(&cluster).ok(),
        )
        .await;
        Ok(ClusterResponse { cluster })
    }

    pub async fn delete_cluster(&self, request: DeleteClusterRequest) -> Result<ClusterResponse> {
        let mut cluster = self.require_cluster(Some(&request.cluster)).await?;
        let cluster_counts = self.with_cluster_counts(cluster.clone()).await?;
        if cluster_counts.active_services_count > 0 {
            return Err(EcsError::FailedPrecondition(
                "cluster contains active services".into(),
            ));
        }
        if cluster_counts.running_tasks_count > 0 || cluster_counts.pending_tasks_count > 0 {
            return Err(EcsError::FailedPrecondition(
                "cluster contains tasks".into(),
            ));
        }
        self.storage.clusters().delete(&cluster.cluster_name).await?;
        cluster.status = ClusterStatus::Inactive;
        self.publish(
            "metric_update",
            "cluster",
            &cluster.cluster_name,
            serde_json::to_value(&cluster).ok(),
        )
        .await;
        Ok(ClusterResponse { cluster })
    }

    pub async fn describe_clusters(
        &self,
        request: DescribeClustersRequest,
    ) -> Result<DescribeClustersResponse> {
        let identifiers = if request.clusters.is_empty() {
            vec![DEFAULT_CLUSTER.to_string()]
        } else {
            request.clusters
        };
        let mut clusters = Vec::new();
        let mut failures = Vec::new();
        for identifier in identifiers {
            let name = arn::cluster_name(&identifier);
            match self.storage.clusters().get(name).await? {
                Some(cluster) => clusters.push(self.with_cluster_counts(cluster).await?),
                None => failures.push(Failure::missing(self.identity.cluster_arn(name))),
            }
        }
        Ok(DescribeClustersResponse { clusters, failures })
    }

    pub async fn list_clusters(&self, request: ListClustersRequest) -> Result<ListClustersResponse> {
        let page = self
            .storage
            .clusters()
            .list(&PageRequest {
                max_results: request.max_results,
                next_token: request.next_token,
            })
            .await?;
        Ok(ListClustersResponse {
            cluster_arns: page.items.into_iter().map(|c| c.cluster_arn).collect(),
            next_token: page.next_token,
        })
    }
}
