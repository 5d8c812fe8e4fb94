//! PostgreSQL backend.
//!
//! One row per entity: natural-key index columns plus a `data` JSONB column
//! holding the serialized entity. Nested lists (container definitions,
//! load balancers, service registries, tags) ride inside the blob. Derived
//! counters are recomputed by the cores on read, so the blob copy of a
//! counter is never trusted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Object, Pool, Runtime};
use serde::Serialize;
use serde::de::DeserializeOwned;
use stevedore_model::*;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::cursor;
use crate::error::{Result, StoreError};
use crate::filter::*;
use crate::traits::*;

#[derive(Clone)]
pub struct PostgresStorage {
    pool: Pool,
}

impl PostgresStorage {
    pub async fn connect(
        host: &str,
        port: u16,
        dbname: &str,
        user: &str,
        password: Option<&str>,
    ) -> Result<Self> {
        let mut config = Config::new();
        config.host = Some(host.to_string());
        config.port = Some(port);
        config.dbname = Some(dbname.to_string());
        config.user = Some(user.to_string());
        config.password = password.map(|p| p.to_string());
        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Internal(anyhow::Error::new(e)))?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Internal(anyhow::Error::new(e)))
    }

    /// Initialize the schema, creating tables if they don't exist.
    async fn init_schema(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS clusters (
                    name TEXT PRIMARY KEY,
                    arn TEXT NOT NULL UNIQUE,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS task_definitions (
                    family TEXT NOT NULL,
                    revision INT NOT NULL,
                    arn TEXT NOT NULL UNIQUE,
                    status TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL,
                    PRIMARY KEY (family, revision)
                );
                CREATE TABLE IF NOT EXISTS task_definition_families (
                    family TEXT PRIMARY KEY,
                    latest_revision INT NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS tasks (
                    cluster_arn TEXT NOT NULL,
                    task_id TEXT NOT NULL,
                    arn TEXT NOT NULL UNIQUE,
                    desired_status TEXT NOT NULL,
                    started_by TEXT,
                    launch_type TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL,
                    PRIMARY KEY (cluster_arn, task_id)
                );
                CREATE TABLE IF NOT EXISTS services (
                    cluster_arn TEXT NOT NULL,
                    name TEXT NOT NULL,
                    arn TEXT NOT NULL UNIQUE,
                    launch_type TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL,
                    PRIMARY KEY (cluster_arn, name)
                );
                CREATE TABLE IF NOT EXISTS task_sets (
                    service_arn TEXT NOT NULL,
                    id TEXT NOT NULL,
                    arn TEXT NOT NULL UNIQUE,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL,
                    PRIMARY KEY (service_arn, id)
                );
                CREATE TABLE IF NOT EXISTS container_instances (
                    cluster_arn TEXT NOT NULL,
                    id TEXT NOT NULL,
                    arn TEXT NOT NULL UNIQUE,
                    status TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL,
                    PRIMARY KEY (cluster_arn, id)
                );
                CREATE TABLE IF NOT EXISTS attributes (
                    cluster_arn TEXT NOT NULL,
                    target_type TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    value TEXT,
                    PRIMARY KEY (cluster_arn, target_id, name)
                );
                CREATE TABLE IF NOT EXISTS load_balancers (
                    name TEXT PRIMARY KEY,
                    arn TEXT NOT NULL UNIQUE,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS target_groups (
                    name TEXT PRIMARY KEY,
                    arn TEXT NOT NULL UNIQUE,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS listeners (
                    arn TEXT PRIMARY KEY,
                    load_balancer_arn TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS rules (
                    arn TEXT PRIMARY KEY,
                    listener_arn TEXT NOT NULL,
                    priority INT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 0,
                    data JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS lb_targets (
                    target_group_arn TEXT NOT NULL,
                    id TEXT NOT NULL,
                    data JSONB NOT NULL,
                    PRIMARY KEY (target_group_arn, id)
                );
                CREATE TABLE IF NOT EXISTS task_logs (
                    id UUID PRIMARY KEY,
                    task_arn TEXT NOT NULL,
                    container_name TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_task_logs_task ON task_logs (task_arn);
                CREATE INDEX IF NOT EXISTS idx_task_logs_created ON task_logs (created_at);
                "#,
            )
            .await?;
        tracing::info!("database schema initialized");
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(row: &Row) -> Result<T> {
    let data: serde_json::Value = row.get("data");
    Ok(serde_json::from_value(data)?)
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Page a query that already selects `COUNT(*) OVER() AS full_count`,
/// ordered by `(created_at, arn)`, with `LIMIT`/`OFFSET` appended by the
/// caller as the last two parameters.
fn page_from_rows<T: DeserializeOwned, F: Serialize>(
    rows: &[Row],
    filter: &F,
    offset: usize,
) -> Result<Page<T>> {
    let full_count: i64 = rows.first().map(|r| r.get("full_count")).unwrap_or(0);
    let items: Vec<T> = rows.iter().map(decode).collect::<Result<_>>()?;
    let consumed = offset + items.len();
    let next = ((consumed as i64) < full_count)
        .then(|| cursor::encode_token(consumed, &cursor::fingerprint(filter)));
    Ok(Page {
        items,
        next_token: next,
    })
}

fn page_offset<F: Serialize>(filter: &F, page: &PageRequest) -> Result<usize> {
    match page.next_token.as_deref() {
        Some(token) => cursor::decode_token(token, &cursor::fingerprint(filter)),
        None => Ok(0),
    }
}

/// Optimistic update of a `data`-blob row: the WHERE clause pins the
/// version the caller read. Zero rows updated means either the row is gone
/// or the version moved; a follow-up existence probe disambiguates.
async fn guarded_update(
    client: &Object,
    table: &str,
    key_clause: &str,
    params: &[&(dyn ToSql + Sync)],
    label: &str,
) -> Result<()> {
    let sql = format!(
        "UPDATE {table} SET version = version + 1, data = $1 WHERE {key_clause} AND version = $2"
    );
    let n = client.execute(&sql, params).await?;
    if n == 0 {
        return Err(StoreError::StaleVersion(label.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ClusterStore for PostgresStorage {
    async fn create(&self, cluster: &Cluster) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                r#"
                INSERT INTO clusters (name, arn, created_at, version, data)
                VALUES ($1, $2, $3, 0, $4)
                ON CONFLICT (name) DO NOTHING
                "#,
                &[
                    &cluster.cluster_name,
                    &cluster.cluster_arn,
                    &cluster.created_at,
                    &encode(cluster)?,
                ],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::Conflict(cluster.cluster_name.clone()));
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Cluster>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT data FROM clusters WHERE name = $1", &[&name])
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list(&self, page: &PageRequest) -> Result<Page<Cluster>> {
        let filter = NoFilter {};
        let offset = page_offset(&filter, page)?;
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data, COUNT(*) OVER() AS full_count
                FROM clusters
                ORDER BY created_at ASC, arn ASC
                LIMIT $1 OFFSET $2
                "#,
                &[&(page.limit() as i64), &(offset as i64)],
            )
            .await?;
        page_from_rows(&rows, &filter, offset)
    }

    async fn update(&self, cluster: &Cluster) -> Result<Cluster> {
        let client = self.client().await?;
        let mut next = cluster.clone();
        next.version = cluster.version + 1;
        next.updated_at = Utc::now();
        let result = guarded_update(
            &client,
            "clusters",
            "name = $3",
            &[&encode(&next)?, &cluster.version, &cluster.cluster_name],
            &cluster.cluster_name,
        )
        .await;
        if result.is_err() && ClusterStore::get(self, &cluster.cluster_name).await?.is_none() {
            return Err(StoreError::NotFound(cluster.cluster_name.clone()));
        }
        result.map(|_| next)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM clusters WHERE name = $1", &[&name])
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskDefinitionStore for PostgresStorage {
    async fn get(&self, family: &str, revision: i32) -> Result<Option<TaskDefinition>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT data FROM task_definitions WHERE family = $1 AND revision = $2",
                &[&family, &revision],
            )
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_latest_active(&self, family: &str) -> Result<Option<TaskDefinition>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                r#"
                SELECT data FROM task_definitions
                WHERE family = $1 AND status = 'ACTIVE'
                ORDER BY revision DESC
                LIMIT 1
                "#,
                &[&family],
            )
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list(
        &self,
        filter: &TaskDefinitionFilter,
        page: &PageRequest,
    ) -> Result<Page<TaskDefinition>> {
        let offset = page_offset(filter, page)?;
        let client = self.client().await?;
        let prefix = filter
            .family_prefix
            .as_deref()
            .map(|p| format!("{}%", p.replace('%', "\\%")));
        let status = filter.status.map(|s| {
            serde_json::to_value(s)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default()
        });
        let rows = client
            .query(
                r#"
                SELECT data, COUNT(*) OVER() AS full_count
                FROM task_definitions
                WHERE ($1::TEXT IS NULL OR family LIKE $1)
                  AND ($2::TEXT IS NULL OR status = $2)
                ORDER BY created_at ASC, arn ASC
                LIMIT $3 OFFSET $4
                "#,
                &[
                    &prefix,
                    &status,
                    &(page.limit() as i64),
                    &(offset as i64),
                ],
            )
            .await?;
        page_from_rows(&rows, filter, offset)
    }

    async fn list_families(
        &self,
        filter: &FamilyFilter,
        page: &PageRequest,
    ) -> Result<Page<String>> {
        let offset = page_offset(filter, page)?;
        let client = self.client().await?;
        let prefix = filter
            .family_prefix
            .as_deref()
            .map(|p| format!("{}%", p.replace('%', "\\%")));
        let status = filter.status.map(|s| {
            serde_json::to_value(s)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default()
        });
        let rows = client
            .query(
                r#"
                SELECT DISTINCT family, COUNT(*) OVER() AS full_count
                FROM task_definitions
                WHERE ($1::TEXT IS NULL OR family LIKE $1)
                  AND ($2::TEXT IS NULL OR status = $2)
                ORDER BY family ASC
                LIMIT $3 OFFSET $4
                "#,
                &[&prefix, &status, &(page.limit() as i64), &(offset as i64)],
            )
            .await?;
        let full_count: i64 = rows.first().map(|r| r.get("full_count")).unwrap_or(0);
        let items: Vec<String> = rows.iter().map(|r| r.get("family")).collect();
        let consumed = offset + items.len();
        let next = ((consumed as i64) < full_count)
            .then(|| cursor::encode_token(consumed, &cursor::fingerprint(filter)));
        Ok(Page {
            items,
            next_token: next,
        })
    }

    async fn update(&self, td: &TaskDefinition) -> Result<TaskDefinition> {
        let client = self.client().await?;
        let mut next = td.clone();
        next.version = td.version + 1;
        next.updated_at = Utc::now();
        let status = match next.status {
            TaskDefinitionStatus::Active => "ACTIVE",
            TaskDefinitionStatus::Inactive => "INACTIVE",
        };
        let n = client
            .execute(
                r#"
                UPDATE task_definitions
                SET version = version + 1, status = $1, data = $2
                WHERE family = $3 AND revision = $4 AND version = $5
                "#,
                &[&status, &encode(&next)?, &td.family, &td.revision, &td.version],
            )
            .await?;
        if n == 0 {
            if TaskDefinitionStore::get(self, &td.family, td.revision)
                .await?
                .is_none()
            {
                return Err(StoreError::NotFound(td.task_definition_arn.clone()));
            }
            return Err(StoreError::StaleVersion(td.task_definition_arn.clone()));
        }
        Ok(next)
    }
}

#[async_trait]
impl TaskStore for PostgresStorage {
    async fn create(&self, task: &Task) -> Result<()> {
        let client = self.client().await?;
        let launch_type = serde_json::to_value(task.launch_type)?;
        let desired = task.desired_status.as_str();
        let n = client
            .execute(
                r#"
                INSERT INTO tasks
                    (cluster_arn, task_id, arn, desired_status, started_by, launch_type,
                     created_at, version, data)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8)
                ON CONFLICT (cluster_arn, task_id) DO NOTHING
                "#,
                &[
                    &task.cluster_arn,
                    &task.task_id(),
                    &task.task_arn,
                    &desired,
                    &task.started_by,
                    &launch_type.as_str().unwrap_or("FARGATE"),
                    &task.created_at,
                    &encode(task)?,
                ],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::Conflict(task.task_arn.clone()));
        }
        Ok(())
    }

    async fn get(&self, cluster_arn: &str, task_id: &str) -> Result<Option<Task>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT data FROM tasks WHERE cluster_arn = $1 AND task_id = $2",
                &[&cluster_arn, &task_id],
            )
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list(&self, filter: &TaskFilter, page: &PageRequest) -> Result<Page<Task>> {
        let offset = page_offset(filter, page)?;
        let client = self.client().await?;
        let started_by = match (&filter.service_name, &filter.started_by) {
            (Some(service), _) => Some(format!("ecs-svc/{}", service)),
            (None, Some(sb)) => Some(sb.clone()),
            (None, None) => None,
        };
        let launch_type = filter
            .launch_type
            .and_then(|lt| serde_json::to_value(lt).ok())
            .and_then(|v| v.as_str().map(String::from));
        let desired = filter.desired_status.map(|s| s.as_str().to_string());
        let family = filter.family.as_deref().map(|f| format!("%/{}:%", f));
        let rows = client
            .query(
                r#"
                SELECT data, COUNT(*) OVER() AS full_count
                FROM tasks
                WHERE cluster_arn = $1
                  AND ($2::TEXT IS NULL OR started_by = $2)
                  AND ($3::TEXT IS NULL OR launch_type = $3)
                  AND ($4::TEXT IS NULL OR desired_status = $4)
                  AND ($5::TEXT IS NULL OR data->>'taskDefinitionArn' LIKE $5)
                ORDER BY created_at ASC, arn ASC
                LIMIT $6 OFFSET $7
                "#,
                &[
                    &filter.cluster_arn,
                    &started_by,
                    &launch_type,
                    &desired,
                    &family,
                    &(page.limit() as i64),
                    &(offset as i64),
                ],
            )
            .await?;
        page_from_rows(&rows, filter, offset)
    }

    async fn list_all(&self) -> Result<Vec<Task>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT data FROM tasks ORDER BY created_at ASC, arn ASC",
                &[],
            )
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn update(&self, task: &Task) -> Result<Task> {
        let client = self.client().await?;
        let mut next = task.clone();
        next.version = task.version + 1;
        next.updated_at = Utc::now();
        let n = client
            .execute(
                r#"
                UPDATE tasks
                SET version = version + 1, desired_status = $1, data = $2
                WHERE cluster_arn = $3 AND task_id = $4 AND version = $5
                "#,
                &[
                    &next.desired_status.as_str(),
                    &encode(&next)?,
                    &task.cluster_arn,
                    &task.task_id(),
                    &task.version,
                ],
            )
            .await?;
        if n == 0 {
            if TaskStore::get(self, &task.cluster_arn, task.task_id())
                .await?
                .is_none()
            {
                return Err(StoreError::NotFound(task.task_arn.clone()));
            }
            return Err(StoreError::StaleVersion(task.task_arn.clone()));
        }
        Ok(next)
    }

    async fn delete(&self, cluster_arn: &str, task_id: &str) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "DELETE FROM tasks WHERE cluster_arn = $1 AND task_id = $2",
                &[&cluster_arn, &task_id],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceStore for PostgresStorage {
    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<Service>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT data FROM services WHERE cluster_arn = $1 AND name = $2",
                &[&cluster_arn, &name],
            )
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list(&self, filter: &ServiceFilter, page: &PageRequest) -> Result<Page<Service>> {
        let offset = page_offset(filter, page)?;
        let client = self.client().await?;
        let launch_type = filter
            .launch_type
            .and_then(|lt| serde_json::to_value(lt).ok())
            .and_then(|v| v.as_str().map(String::from));
        let rows = client
            .query(
                r#"
                SELECT data, COUNT(*) OVER() AS full_count
                FROM services
                WHERE cluster_arn = $1
                  AND ($2::TEXT IS NULL OR launch_type = $2)
                ORDER BY created_at ASC, arn ASC
                LIMIT $3 OFFSET $4
                "#,
                &[
                    &filter.cluster_arn,
                    &launch_type,
                    &(page.limit() as i64),
                    &(offset as i64),
                ],
            )
            .await?;
        page_from_rows(&rows, filter, offset)
    }

    async fn list_by_cluster(&self, cluster_arn: &str) -> Result<Vec<Service>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data FROM services
                WHERE cluster_arn = $1
                ORDER BY created_at ASC, arn ASC
                "#,
                &[&cluster_arn],
            )
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn update(&self, service: &Service) -> Result<Service> {
        let client = self.client().await?;
        let mut next = service.clone();
        next.version = service.version + 1;
        next.updated_at = Utc::now();
        let result = guarded_update(
            &client,
            "services",
            "cluster_arn = $3 AND name = $4",
            &[
                &encode(&next)?,
                &service.version,
                &service.cluster_arn,
                &service.service_name,
            ],
            &service.service_arn,
        )
        .await;
        if result.is_err()
            && ServiceStore::get(self, &service.cluster_arn, &service.service_name)
                .await?
                .is_none()
        {
            return Err(StoreError::NotFound(service.service_arn.clone()));
        }
        result.map(|_| next)
    }

    async fn delete(&self, cluster_arn: &str, name: &str) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "DELETE FROM services WHERE cluster_arn = $1 AND name = $2",
                &[&cluster_arn, &name],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskSetStore for PostgresStorage {
    async fn get(&self, service_arn: &str, id: &str) -> Result<Option<TaskSet>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT data FROM task_sets WHERE service_arn = $1 AND id = $2",
                &[&service_arn, &id],
            )
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list(&self, service_arn: &str) -> Result<Vec<TaskSet>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data FROM task_sets
                WHERE service_arn = $1
                ORDER BY created_at ASC, arn ASC
                "#,
                &[&service_arn],
            )
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn list_all(&self) -> Result<Vec<TaskSet>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT data FROM task_sets ORDER BY created_at ASC, arn ASC",
                &[],
            )
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn update(&self, task_set: &TaskSet) -> Result<TaskSet> {
        let client = self.client().await?;
        let mut next = task_set.clone();
        next.version = task_set.version + 1;
        next.updated_at = Utc::now();
        let result = guarded_update(
            &client,
            "task_sets",
            "service_arn = $3 AND id = $4",
            &[
                &encode(&next)?,
                &task_set.version,
                &task_set.service_arn,
                &task_set.id,
            ],
            &task_set.task_set_arn,
        )
        .await;
        if result.is_err()
            && TaskSetStore::get(self, &task_set.service_arn, &task_set.id)
                .await?
                .is_none()
        {
            return Err(StoreError::NotFound(task_set.task_set_arn.clone()));
        }
        result.map(|_| next)
    }

    async fn delete(&self, service_arn: &str, id: &str) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "DELETE FROM task_sets WHERE service_arn = $1 AND id = $2",
                &[&service_arn, &id],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerInstanceStore for PostgresStorage {
    async fn create(&self, instance: &ContainerInstance) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                r#"
                INSERT INTO container_instances
                    (cluster_arn, id, arn, status, created_at, version, data)
                VALUES ($1, $2, $3, $4, $5, 0, $6)
                ON CONFLICT (cluster_arn, id) DO NOTHING
                "#,
                &[
                    &instance.cluster_arn,
                    &instance.id(),
                    &instance.container_instance_arn,
                    &instance.status,
                    &instance.created_at,
                    &encode(instance)?,
                ],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::Conflict(
                instance.container_instance_arn.clone(),
            ));
        }
        Ok(())
    }

    async fn get(&self, cluster_arn: &str, id: &str) -> Result<Option<ContainerInstance>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT data FROM container_instances WHERE cluster_arn = $1 AND id = $2",
                &[&cluster_arn, &id],
            )
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list(
        &self,
        filter: &ContainerInstanceFilter,
        page: &PageRequest,
    ) -> Result<Page<ContainerInstance>> {
        let offset = page_offset(filter, page)?;
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data, COUNT(*) OVER() AS full_count
                FROM container_instances
                WHERE cluster_arn = $1
                  AND ($2::TEXT IS NULL OR status = $2)
                ORDER BY created_at ASC, arn ASC
                LIMIT $3 OFFSET $4
                "#,
                &[
                    &filter.cluster_arn,
                    &filter.status,
                    &(page.limit() as i64),
                    &(offset as i64),
                ],
            )
            .await?;
        page_from_rows(&rows, filter, offset)
    }

    async fn list_by_cluster(&self, cluster_arn: &str) -> Result<Vec<ContainerInstance>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data FROM container_instances
                WHERE cluster_arn = $1
                ORDER BY created_at ASC, arn ASC
                "#,
                &[&cluster_arn],
            )
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn update(&self, instance: &ContainerInstance) -> Result<ContainerInstance> {
        let client = self.client().await?;
        let mut next = instance.clone();
        next.version = instance.version + 1;
        next.updated_at = Utc::now();
        let n = client
            .execute(
                r#"
                UPDATE container_instances
                SET version = version + 1, status = $1, data = $2
                WHERE cluster_arn = $3 AND id = $4 AND version = $5
                "#,
                &[
                    &next.status,
                    &encode(&next)?,
                    &instance.cluster_arn,
                    &instance.id(),
                    &instance.version,
                ],
            )
            .await?;
        if n == 0 {
            if ContainerInstanceStore::get(self, &instance.cluster_arn, instance.id())
                .await?
                .is_none()
            {
                return Err(StoreError::NotFound(
                    instance.container_instance_arn.clone(),
                ));
            }
            return Err(StoreError::StaleVersion(
                instance.container_instance_arn.clone(),
            ));
        }
        Ok(next)
    }

    async fn delete(&self, cluster_arn: &str, id: &str) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                "DELETE FROM container_instances WHERE cluster_arn = $1 AND id = $2",
                &[&cluster_arn, &id],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AttributeStore for PostgresStorage {
    async fn put(&self, cluster_arn: &str, attributes: &[Attribute]) -> Result<()> {
        let client = self.client().await?;
        for attr in attributes {
            client
                .execute(
                    r#"
                    INSERT INTO attributes (cluster_arn, target_type, target_id, name, value)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (cluster_arn, target_id, name)
                    DO UPDATE SET value = EXCLUDED.value, target_type = EXCLUDED.target_type
                    "#,
                    &[
                        &cluster_arn,
                        &attr.target_type.as_deref().unwrap_or("container-instance"),
                        &attr.target_id.as_deref().unwrap_or_default(),
                        &attr.name,
                        &attr.value,
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, cluster_arn: &str, attributes: &[Attribute]) -> Result<()> {
        let client = self.client().await?;
        for attr in attributes {
            client
                .execute(
                    r#"
                    DELETE FROM attributes
                    WHERE cluster_arn = $1 AND target_id = $2 AND name = $3
                    "#,
                    &[
                        &cluster_arn,
                        &attr.target_id.as_deref().unwrap_or_default(),
                        &attr.name,
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn list(&self, filter: &AttributeFilter, page: &PageRequest) -> Result<Page<Attribute>> {
        let offset = page_offset(filter, page)?;
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT target_type, target_id, name, value, COUNT(*) OVER() AS full_count
                FROM attributes
                WHERE target_type = $1
                  AND ($2::TEXT IS NULL OR cluster_arn = $2)
                  AND ($3::TEXT IS NULL OR name = $3)
                  AND ($4::TEXT IS NULL OR value = $4)
                ORDER BY target_id ASC, name ASC
                LIMIT $5 OFFSET $6
                "#,
                &[
                    &filter.target_type,
                    &filter.cluster_arn,
                    &filter.attribute_name,
                    &filter.attribute_value,
                    &(page.limit() as i64),
                    &(offset as i64),
                ],
            )
            .await?;
        let full_count: i64 = rows.first().map(|r| r.get("full_count")).unwrap_or(0);
        let items: Vec<Attribute> = rows
            .iter()
            .map(|r| Attribute {
                name: r.get("name"),
                value: r.get("value"),
                target_type: Some(r.get("target_type")),
                target_id: Some(r.get("target_id")),
            })
            .collect();
        let consumed = offset + items.len();
        let next = ((consumed as i64) < full_count)
            .then(|| cursor::encode_token(consumed, &cursor::fingerprint(filter)));
        Ok(Page {
            items,
            next_token: next,
        })
    }
}

#[async_trait]
impl LoadBalancerStore for PostgresStorage {
    async fn create(&self, lb: &LoadBalancer) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                r#"
                INSERT INTO load_balancers (name, arn, created_at, version, data)
                VALUES ($1, $2, $3, 0, $4)
                ON CONFLICT (name) DO NOTHING
                "#,
                &[
                    &lb.load_balancer_name,
                    &lb.load_balancer_arn,
                    &lb.created_at,
                    &encode(lb)?,
                ],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::Conflict(lb.load_balancer_name.clone()));
        }
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<LoadBalancer>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT data FROM load_balancers WHERE name = $1", &[&name])
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<LoadBalancer>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT data FROM load_balancers WHERE arn = $1", &[&arn])
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list(&self, page: &PageRequest) -> Result<Page<LoadBalancer>> {
        let filter = NoFilter {};
        let offset = page_offset(&filter, page)?;
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data, COUNT(*) OVER() AS full_count
                FROM load_balancers
                ORDER BY created_at ASC, arn ASC
                LIMIT $1 OFFSET $2
                "#,
                &[&(page.limit() as i64), &(offset as i64)],
            )
            .await?;
        page_from_rows(&rows, &filter, offset)
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM load_balancers WHERE arn = $1", &[&arn])
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(arn.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TargetGroupStore for PostgresStorage {
    async fn create(&self, tg: &TargetGroup) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute(
                r#"
                INSERT INTO target_groups (name, arn, created_at, version, data)
                VALUES ($1, $2, $3, 0, $4)
                ON CONFLICT (name) DO NOTHING
                "#,
                &[
                    &tg.target_group_name,
                    &tg.target_group_arn,
                    &tg.created_at,
                    &encode(tg)?,
                ],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::Conflict(tg.target_group_name.clone()));
        }
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<TargetGroup>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT data FROM target_groups WHERE name = $1", &[&name])
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<TargetGroup>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT data FROM target_groups WHERE arn = $1", &[&arn])
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list(&self, page: &PageRequest) -> Result<Page<TargetGroup>> {
        let filter = NoFilter {};
        let offset = page_offset(&filter, page)?;
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data, COUNT(*) OVER() AS full_count
                FROM target_groups
                ORDER BY created_at ASC, arn ASC
                LIMIT $1 OFFSET $2
                "#,
                &[&(page.limit() as i64), &(offset as i64)],
            )
            .await?;
        page_from_rows(&rows, &filter, offset)
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM target_groups WHERE arn = $1", &[&arn])
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(arn.to_string()));
        }
        client
            .execute("DELETE FROM lb_targets WHERE target_group_arn = $1", &[&arn])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ListenerStore for PostgresStorage {
    async fn create(&self, listener: &Listener) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                r#"
                INSERT INTO listeners (arn, load_balancer_arn, created_at, version, data)
                VALUES ($1, $2, $3, 0, $4)
                "#,
                &[
                    &listener.listener_arn,
                    &listener.load_balancer_arn,
                    &listener.created_at,
                    &encode(listener)?,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, arn: &str) -> Result<Option<Listener>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT data FROM listeners WHERE arn = $1", &[&arn])
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_by_load_balancer(&self, lb_arn: &str) -> Result<Vec<Listener>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data FROM listeners
                WHERE load_balancer_arn = $1
                ORDER BY created_at ASC, arn ASC
                "#,
                &[&lb_arn],
            )
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM listeners WHERE arn = $1", &[&arn])
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(arn.to_string()));
        }
        client
            .execute("DELETE FROM rules WHERE listener_arn = $1", &[&arn])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for PostgresStorage {
    async fn create(&self, rule: &Rule) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                r#"
                INSERT INTO rules (arn, listener_arn, priority, created_at, version, data)
                VALUES ($1, $2, $3, $4, 0, $5)
                "#,
                &[
                    &rule.rule_arn,
                    &rule.listener_arn,
                    &rule.priority_value(),
                    &rule.created_at,
                    &encode(rule)?,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, arn: &str) -> Result<Option<Rule>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT data FROM rules WHERE arn = $1", &[&arn])
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_by_listener(&self, listener_arn: &str) -> Result<Vec<Rule>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data FROM rules
                WHERE listener_arn = $1
                ORDER BY priority ASC, arn ASC
                "#,
                &[&listener_arn],
            )
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM rules WHERE arn = $1", &[&arn])
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(arn.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TargetStore for PostgresStorage {
    async fn register(&self, targets: &[Target]) -> Result<()> {
        let client = self.client().await?;
        for target in targets {
            client
                .execute(
                    r#"
                    INSERT INTO lb_targets (target_group_arn, id, data)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (target_group_arn, id) DO UPDATE SET data = EXCLUDED.data
                    "#,
                    &[&target.target_group_arn, &target.id, &encode(target)?],
                )
                .await?;
        }
        Ok(())
    }

    async fn deregister(&self, target_group_arn: &str, ids: &[String]) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM lb_targets WHERE target_group_arn = $1 AND id = ANY($2)",
                &[&target_group_arn, &ids],
            )
            .await?;
        Ok(())
    }

    async fn list_by_group(&self, target_group_arn: &str) -> Result<Vec<Target>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT data FROM lb_targets
                WHERE target_group_arn = $1
                ORDER BY id ASC
                "#,
                &[&target_group_arn],
            )
            .await?;
        rows.iter().map(decode).collect()
    }
}

#[async_trait]
impl TaskLogStore for PostgresStorage {
    async fn insert(&self, log: &TaskLog) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                r#"
                INSERT INTO task_logs (id, task_arn, container_name, content, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
                &[
                    &log.id,
                    &log.task_arn,
                    &log.container_name,
                    &log.content,
                    &log.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_by_task(&self, task_arn: &str) -> Result<Vec<TaskLog>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT id, task_arn, container_name, content, created_at
                FROM task_logs
                WHERE task_arn = $1
                ORDER BY created_at ASC
                "#,
                &[&task_arn],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| TaskLog {
                id: r.get("id"),
                task_arn: r.get("task_arn"),
                container_name: r.get("container_name"),
                content: r.get("content"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let client = self.client().await?;
        let n = client
            .execute("DELETE FROM task_logs WHERE created_at < $1", &[&cutoff])
            .await?;
        Ok(n)
    }
}

pub struct PostgresTx {
    client: Option<Object>,
    done: bool,
}

impl PostgresTx {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("transaction already finished")))
    }
}

impl Drop for PostgresTx {
    fn drop(&mut self) {
        // Roll back abandoned transactions off-thread; the connection only
        // returns to the pool once the ROLLBACK has been issued.
        if !self.done
            && let Some(client) = self.client.take()
        {
            tokio::spawn(async move {
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    tracing::warn!(error = %e, "failed to roll back abandoned transaction");
                }
            });
        }
    }
}

#[async_trait]
impl StorageTx for PostgresTx {
    async fn max_revision(&mut self, family: &str) -> Result<i32> {
        let client = self.client()?;
        client
            .execute(
                r#"
                INSERT INTO task_definition_families (family, latest_revision)
                VALUES ($1, 0)
                ON CONFLICT (family) DO NOTHING
                "#,
                &[&family],
            )
            .await?;
        let row = client
            .query_one(
                "SELECT latest_revision FROM task_definition_families WHERE family = $1 FOR UPDATE",
                &[&family],
            )
            .await?;
        Ok(row.get::<_, i32>("latest_revision"))
    }

    async fn insert_task_definition(&mut self, td: &TaskDefinition) -> Result<()> {
        let client = self.client()?;
        let status = match td.status {
            TaskDefinitionStatus::Active => "ACTIVE",
            TaskDefinitionStatus::Inactive => "INACTIVE",
        };
        let n = client
            .execute(
                r#"
                INSERT INTO task_definitions
                    (family, revision, arn, status, created_at, version, data)
                VALUES ($1, $2, $3, $4, $5, 0, $6)
                ON CONFLICT (family, revision) DO NOTHING
                "#,
                &[
                    &td.family,
                    &td.revision,
                    &td.task_definition_arn,
                    &status,
                    &td.created_at,
                    &encode(td)?,
                ],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::Conflict(td.task_definition_arn.clone()));
        }
        client
            .execute(
                r#"
                UPDATE task_definition_families
                SET latest_revision = GREATEST(latest_revision, $2)
                WHERE family = $1
                "#,
                &[&td.family, &td.revision],
            )
            .await?;
        Ok(())
    }

    async fn get_service(&mut self, cluster_arn: &str, name: &str) -> Result<Option<Service>> {
        let client = self.client()?;
        let row = client
            .query_opt(
                "SELECT data FROM services WHERE cluster_arn = $1 AND name = $2 FOR UPDATE",
                &[&cluster_arn, &name],
            )
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn insert_service(&mut self, service: &Service) -> Result<()> {
        let client = self.client()?;
        let launch_type = serde_json::to_value(service.launch_type)?;
        let n = client
            .execute(
                r#"
                INSERT INTO services
                    (cluster_arn, name, arn, launch_type, created_at, version, data)
                VALUES ($1, $2, $3, $4, $5, 0, $6)
                ON CONFLICT (cluster_arn, name) DO NOTHING
                "#,
                &[
                    &service.cluster_arn,
                    &service.service_name,
                    &service.service_arn,
                    &launch_type.as_str().unwrap_or("FARGATE"),
                    &service.created_at,
                    &encode(service)?,
                ],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::Conflict(service.service_name.clone()));
        }
        Ok(())
    }

    async fn insert_task_set(&mut self, task_set: &TaskSet) -> Result<()> {
        let client = self.client()?;
        let n = client
            .execute(
                r#"
                INSERT INTO task_sets (service_arn, id, arn, created_at, version, data)
                VALUES ($1, $2, $3, $4, 0, $5)
                ON CONFLICT (service_arn, id) DO NOTHING
                "#,
                &[
                    &task_set.service_arn,
                    &task_set.id,
                    &task_set.task_set_arn,
                    &task_set.created_at,
                    &encode(task_set)?,
                ],
            )
            .await?;
        if n == 0 {
            return Err(StoreError::Conflict(task_set.task_set_arn.clone()));
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let client = self.client()?;
        client.batch_execute("COMMIT").await?;
        self.done = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let client = self.client()?;
        client.batch_execute("ROLLBACK").await?;
        self.done = true;
        Ok(())
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    fn clusters(&self) -> &dyn ClusterStore {
        self
    }
    fn task_definitions(&self) -> &dyn TaskDefinitionStore {
        self
    }
    fn tasks(&self) -> &dyn TaskStore {
        self
    }
    fn services(&self) -> &dyn ServiceStore {
        self
    }
    fn task_sets(&self) -> &dyn TaskSetStore {
        self
    }
    fn container_instances(&self) -> &dyn ContainerInstanceStore {
        self
    }
    fn attributes(&self) -> &dyn AttributeStore {
        self
    }
    fn load_balancers(&self) -> &dyn LoadBalancerStore {
        self
    }
    fn target_groups(&self) -> &dyn TargetGroupStore {
        self
    }
    fn listeners(&self) -> &dyn ListenerStore {
        self
    }
    fn rules(&self) -> &dyn RuleStore {
        self
    }
    fn targets(&self) -> &dyn TargetStore {
        self
    }
    fn task_logs(&self) -> &dyn TaskLogStore {
        self
    }

    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let client = self.client().await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PostgresTx {
            client: Some(client),
            done: false,
        }))
    }

    async fn healthy(&self) -> bool {
        match self.client().await {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }
}
