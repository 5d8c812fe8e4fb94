//! Projection of persisted ECS state onto Kubernetes and back.
//!
//! Converters build Pods, Deployments, and Services from tasks and task
//! sets; the coordinator applies them and keeps the coordinates persisted;
//! watchers and reconcilers carry Kubernetes state back into the stores.

pub mod convert;
pub mod coordinator;
pub mod error;
pub mod logs;
pub mod project;
pub mod reconcile;
pub mod sd;
pub mod watcher;

pub use coordinator::{Coordinator, KubeAccess};
pub use error::{Error, Result};
pub use sd::{NoopServiceRegistry, ServiceRegistry};
pub use watcher::WatcherRegistry;
