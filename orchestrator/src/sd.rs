//! Narrow registration interface toward the service-discovery subsystem.
//!
//! The real subsystem is an external collaborator; the watcher only needs
//! register/deregister on RUNNING <-> STOPPED transitions.

use async_trait::async_trait;
use stevedore_model::Task;

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register_task(&self, task: &Task) -> anyhow::Result<()>;
    async fn deregister_task(&self, task: &Task) -> anyhow::Result<()>;
}

/// Default binding when no service-discovery collaborator is wired in.
pub struct NoopServiceRegistry;

#[async_trait]
impl ServiceRegistry for NoopServiceRegistry {
    async fn register_task(&self, task: &Task) -> anyhow::Result<()> {
        tracing::debug!(task = %task.task_arn, "service discovery register (noop)");
        Ok(())
    }

    async fn deregister_task(&self, task: &Task) -> anyhow::Result<()> {
        tracing::debug!(task = %task.task_arn, "service discovery deregister (noop)");
        Ok(())
    }
}
