use serde::Serialize;
use stevedore_model::{LaunchType, TaskDefinitionStatus, TaskStatus};

/// Common list-page knobs. `max_results` defaults to 100 and is clamped to
/// `1..=100`; `next_token` is the opaque cursor from the previous page.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub max_results: Option<i32>,
    pub next_token: Option<String>,
}

impl PageRequest {
    pub fn limit(&self) -> usize {
        self.max_results.unwrap_or(100).clamp(1, 100) as usize
    }
}

/// One page of results plus the cursor for the next one (when truncated).
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_token: self.next_token,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskFilter {
    pub cluster_arn: String,
    /// Matches tasks whose `startedBy` is `ecs-svc/<service>`.
    pub service_name: Option<String>,
    pub family: Option<String>,
    pub started_by: Option<String>,
    pub launch_type: Option<LaunchType>,
    pub desired_status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceFilter {
    pub cluster_arn: String,
    pub launch_type: Option<LaunchType>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskDefinitionFilter {
    pub family_prefix: Option<String>,
    pub status: Option<TaskDefinitionStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FamilyFilter {
    pub family_prefix: Option<String>,
    pub status: Option<TaskDefinitionStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerInstanceFilter {
    pub cluster_arn: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AttributeFilter {
    pub cluster_arn: Option<String>,
    pub target_type: String,
    pub attribute_name: Option<String>,
    pub attribute_value: Option<String>,
}

/// Empty filters still need a fingerprint so their tokens validate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NoFilter {}
