//! Typed inputs for the query-protocol operations. The adapter flattens
//! `Param.member.N.Field` pairs into these before calling the core.

use stevedore_model::RuleAction;

#[derive(Debug, Clone, Default)]
pub struct CreateLoadBalancerInput {
    pub name: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub scheme: Option<String>,
    pub lb_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DescribeLoadBalancersInput {
    pub arns: Vec<String>,
    pub names: Vec<String>,
    pub page_size: Option<i32>,
    pub marker: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateTargetGroupInput {
    pub name: String,
    pub protocol: Option<String>,
    pub port: Option<i32>,
    pub vpc_id: Option<String>,
    pub target_type: Option<String>,
    pub health_check_path: Option<String>,
    pub health_check_protocol: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DescribeTargetGroupsInput {
    pub arns: Vec<String>,
    pub names: Vec<String>,
    pub load_balancer_arn: Option<String>,
    pub page_size: Option<i32>,
    pub marker: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateListenerInput {
    pub load_balancer_arn: String,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub default_actions: Vec<RuleAction>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateRuleInput {
    pub listener_arn: String,
    pub priority: i32,
    pub conditions: Vec<serde_json::Value>,
    pub actions: Vec<RuleAction>,
}

#[derive(Debug, Clone, Default)]
pub struct TargetDescription {
    pub id: String,
    pub port: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterTargetsInput {
    pub target_group_arn: String,
    pub targets: Vec<TargetDescription>,
}
