//! ARN construction and parsing.
//!
//! Constructors are deterministic; parsers tolerate both bare names and full
//! ARNs wherever the cloud API does. Disambiguation is by `arn:` prefix
//! first, then by the slash structure of the resource path.

use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ArnError {
    #[error("malformed ARN: {0}")]
    Malformed(String),

    #[error("expected {expected} ARN, got: {got}")]
    WrongResource { expected: &'static str, got: String },
}

/// The (region, account) pair stamped into every allocated ARN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub region: String,
    pub account_id: String,
}

impl Identity {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    fn ecs(&self, resource: &str) -> String {
        format!(
            "arn:aws:ecs:{}:{}:{}",
            self.region, self.account_id, resource
        )
    }

    fn elb(&self, resource: &str) -> String {
        format!(
            "arn:aws:elasticloadbalancing:{}:{}:{}",
            self.region, self.account_id, resource
        )
    }

    pub fn cluster_arn(&self, name: &str) -> String {
        self.ecs(&format!("cluster/{}", name))
    }

    /// Long-format task ARN carrying the cluster name in the path.
    pub fn task_arn(&self, cluster: &str, task_id: &str) -> String {
        self.ecs(&format!("task/{}/{}", cluster, task_id))
    }

    pub fn service_arn(&self, cluster: &str, service_name: &str) -> String {
        self.ecs(&format!("service/{}/{}", cluster, service_name))
    }

    pub fn task_definition_arn(&self, family: &str, revision: i32) -> String {
        self.ecs(&format!("task-definition/{}:{}", family, revision))
    }

    pub fn container_instance_arn(&self, cluster: &str, id: &str) -> String {
        self.ecs(&format!("container-instance/{}/{}", cluster, id))
    }

    pub fn task_set_arn(&self, cluster: &str, service: &str, id: &str) -> String {
        self.ecs(&format!("task-set/{}/{}/{}", cluster, service, id))
    }

    pub fn load_balancer_arn(&self, name: &str, suffix: &str) -> String {
        self.elb(&format!("loadbalancer/app/{}/{}", name, suffix))
    }

    pub fn target_group_arn(&self, name: &str, suffix: &str) -> String {
        self.elb(&format!("targetgroup/{}/{}", name, suffix))
    }

    pub fn listener_arn(&self, lb_name: &str, lb_suffix: &str, suffix: &str) -> String {
        self.elb(&format!("listener/app/{}/{}/{}", lb_name, lb_suffix, suffix))
    }

    pub fn rule_arn(
        &self,
        lb_name: &str,
        lb_suffix: &str,
        listener_suffix: &str,
        suffix: &str,
    ) -> String {
        self.elb(&format!(
            "listener-rule/app/{}/{}/{}/{}",
            lb_name, lb_suffix, listener_suffix, suffix
        ))
    }
}

pub fn is_arn(s: &str) -> bool {
    s.starts_with("arn:")
}

/// Split an ARN into its resource type and resource path.
///
/// `arn:aws:ecs:us-east-1:0000:task/default/abc` -> `("task", "default/abc")`.
pub fn resource_of(arn: &str) -> Result<(&str, &str), ArnError> {
    let resource = arn
        .splitn(6, ':')
        .nth(5)
        .ok_or_else(|| ArnError::Malformed(arn.to_string()))?;
    match resource.split_once('/') {
        Some((ty, path)) => Ok((ty, path)),
        None => Err(ArnError::Malformed(arn.to_string())),
    }
}

/// Resolve a cluster identifier (bare name or full ARN) to the cluster name.
pub fn cluster_name(identifier: &str) -> &str {
    last_path_segment(identifier)
}

/// Resolve a task identifier (bare id or full ARN) to the task id.
pub fn task_id(identifier: &str) -> &str {
    last_path_segment(identifier)
}

/// Resolve a service identifier (bare name or full ARN) to the service name.
pub fn service_name(identifier: &str) -> &str {
    last_path_segment(identifier)
}

/// Resolve a container-instance identifier to its id.
pub fn container_instance_id(identifier: &str) -> &str {
    last_path_segment(identifier)
}

fn last_path_segment(identifier: &str) -> &str {
    if is_arn(identifier) {
        identifier.rsplit('/').next().unwrap_or(identifier)
    } else {
        identifier
    }
}

/// Split a task-definition identifier into family and optional revision.
///
/// Accepts `web`, `web:3`, and full task-definition ARNs.
pub fn family_and_revision(identifier: &str) -> Result<(String, Option<i32>), ArnError> {
    let name = if is_arn(identifier) {
        let (ty, path) = resource_of(identifier)?;
        if ty != "task-definition" {
            return Err(ArnError::WrongResource {
                expected: "task-definition",
                got: identifier.to_string(),
            });
        }
        path
    } else {
        identifier
    };
    match name.rsplit_once(':') {
        Some((family, rev)) => {
            let revision = rev
                .parse::<i32>()
                .map_err(|_| ArnError::Malformed(identifier.to_string()))?;
            Ok((family.to_string(), Some(revision)))
        }
        None => Ok((name.to_string(), None)),
    }
}

// The thread-local generator is cryptographically secure, which the
// suffixes rely on for global uniqueness.
fn random_hex(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// 8 lower-hex chars for ELBv2-style resource suffixes.
pub fn random_suffix() -> String {
    random_hex(4)
}

/// 32 lower-hex chars, the shape of a long-format task id.
pub fn random_task_id() -> String {
    random_hex(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident() -> Identity {
        Identity::new("us-east-1", "000000000000")
    }

    #[test]
    fn test_cluster_arn_shape() {
        assert_eq!(
            ident().cluster_arn("test"),
            "arn:aws:ecs:us-east-1:000000000000:cluster/test"
        );
    }

    #[test]
    fn test_resource_of() {
        let arn = ident().task_arn("default", "abc123");
        let (ty, path) = resource_of(&arn).unwrap();
        assert_eq!(ty, "task");
        assert_eq!(path, "default/abc123");
    }

    #[test]
    fn test_cluster_name_accepts_both_forms() {
        assert_eq!(cluster_name("default"), "default");
        assert_eq!(cluster_name(&ident().cluster_arn("default")), "default");
    }

    #[test]
    fn test_family_and_revision() {
        assert_eq!(family_and_revision("web").unwrap(), ("web".into(), None));
        assert_eq!(
            family_and_revision("web:3").unwrap(),
            ("web".into(), Some(3))
        );
        let arn = ident().task_definition_arn("web", 7);
        assert_eq!(family_and_revision(&arn).unwrap(), ("web".into(), Some(7)));
    }

    #[test]
    fn test_family_and_revision_rejects_wrong_resource() {
        let arn = ident().cluster_arn("default");
        assert!(family_and_revision(&arn).is_err());
    }

    #[test]
    fn test_random_suffix_shape() {
        let s = random_suffix();
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
        assert_ne!(random_suffix(), random_suffix());
    }

    #[test]
    fn test_random_task_id_shape() {
        assert_eq!(random_task_id().len(), 32);
    }
}
