use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::TargetHealthState;

/// An application load balancer. There is no dataplane behind it; the
/// record exists so listeners, rules, and target groups can hang off it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancer {
    pub load_balancer_arn: String,
    pub load_balancer_name: String,
    pub dns_name: String,
    pub scheme: String,
    #[serde(rename = "Type")]
    pub lb_type: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    pub region: String,
    pub account_id: String,
    #[serde(rename = "CreatedTime")]
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetGroup {
    pub target_group_arn: String,
    pub target_group_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    pub target_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_protocol: Option<String>,
    #[serde(default)]
    pub load_balancer_arns: Vec<String>,
    pub region: String,
    pub account_id: String,
    #[serde(rename = "CreatedTime")]
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Listener {
    pub listener_arn: String,
    pub load_balancer_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default)]
    pub default_actions: Vec<RuleAction>,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

/// A routing rule on a listener. Priority is a stable field; rule order
/// within a listener is priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rule {
    pub rule_arn: String,
    pub listener_arn: String,
    /// `"default"` for the listener's default rule, otherwise an integer.
    pub priority: String,
    #[serde(default)]
    pub conditions: Vec<serde_json::Value>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default)]
    pub is_default: bool,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleAction {
    #[serde(rename = "Type")]
    pub action_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_group_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
}

/// A registered target inside a target group. Health is synthesized since
/// there is no true dataplane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Target {
    pub target_group_arn: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default)]
    pub health: TargetHealthState,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl Rule {
    pub fn priority_value(&self) -> i32 {
        self.priority.parse().unwrap_or(i32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rule_sorts_last() {
        let mk = |p: &str| Rule {
            rule_arn: String::new(),
            listener_arn: String::new(),
            priority: p.into(),
            conditions: vec![],
            actions: vec![],
            is_default: p == "default",
            region: String::new(),
            account_id: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 0,
        };
        let mut rules = vec![mk("default"), mk("10"), mk("2")];
        rules.sort_by_key(|r| r.priority_value());
        assert_eq!(rules[0].priority, "2");
        assert_eq!(rules[1].priority, "10");
        assert_eq!(rules[2].priority, "default");
    }
}
