//! ELBv2 query-protocol adapter: form decoding, operation dispatch, XML
//! response rendering.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use stevedore_elbv2::api::*;
use stevedore_elbv2::{ElbError, Elbv2};
use stevedore_model::RuleAction;
use uuid::Uuid;

use crate::query::QueryParams;
use crate::xml;

/// Actions this wire serves; anything else on a form body falls through to
/// the upstream proxy.
pub const ACTIONS: [&str; 21] = [
    "AddTags",
    "RemoveTags",
    "DescribeTags",
    "CreateLoadBalancer",
    "DescribeLoadBalancers",
    "DeleteLoadBalancer",
    "CreateTargetGroup",
    "DescribeTargetGroups",
    "DeleteTargetGroup",
    "CreateListener",
    "DescribeListeners",
    "DeleteListener",
    "CreateRule",
    "DescribeRules",
    "DeleteRule",
    "ModifyListener",
    "ModifyRule",
    "SetRulePriorities",
    "RegisterTargets",
    "DeregisterTargets",
    "DescribeTargetHealth",
];

pub fn is_elbv2_action(action: &str) -> bool {
    ACTIONS.contains(&action)
}

pub async fn handle(elbv2: &Elbv2, params: QueryParams) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let action = params.get("Action").unwrap_or_default().to_string();
    match dispatch(elbv2, &action, &params).await {
        Ok(result) => xml_response(
            StatusCode::OK,
            xml::response_envelope(&action, &result, &request_id),
        ),
        Err(e) => xml_response(
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::BAD_REQUEST),
            xml::error_envelope(e.wire_code(), &e.to_string(), &request_id),
        ),
    }
}

fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

fn encode<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ElbError> {
    serde_json::to_value(value).map_err(|e| ElbError::Internal(e.to_string()))
}

async fn dispatch(
    elbv2: &Elbv2,
    action: &str,
    p: &QueryParams,
) -> Result<serde_json::Value, ElbError> {
    match action {
        "CreateLoadBalancer" => {
            let lb = elbv2
                .create_load_balancer(CreateLoadBalancerInput {
                    name: p.get_string("Name").unwrap_or_default(),
                    subnets: p.members("Subnets"),
                    security_groups: p.members("SecurityGroups"),
                    scheme: p.get_string("Scheme"),
                    lb_type: p.get_string("Type"),
                })
                .await?;
            Ok(json!({"LoadBalancers": [encode(&lb)?]}))
        }
        "DescribeLoadBalancers" => {
            let (lbs, marker) = elbv2
                .describe_load_balancers(DescribeLoadBalancersInput {
                    arns: p.members("LoadBalancerArns"),
                    names: p.members("Names"),
                    page_size: p.get_i32("PageSize"),
                    marker: p.get_string("Marker"),
                })
                .await?;
            let mut result = json!({"LoadBalancers": encode(&lbs)?});
            if let Some(marker) = marker {
                result["NextMarker"] = json!(marker);
            }
            Ok(result)
        }
        "DeleteLoadBalancer" => {
            elbv2
                .delete_load_balancer(&require(p, "LoadBalancerArn")?)
                .await?;
            Ok(json!({}))
        }
        "CreateTargetGroup" => {
            let tg = elbv2
                .create_target_group(CreateTargetGroupInput {
                    name: p.get_string("Name").unwrap_or_default(),
                    protocol: p.get_string("Protocol"),
                    port: p.get_i32("Port"),
                    vpc_id: p.get_string("VpcId"),
                    target_type: p.get_string("TargetType"),
                    health_check_path: p.get_string("HealthCheckPath"),
                    health_check_protocol: p.get_string("HealthCheckProtocol"),
                })
                .await?;
            Ok(json!({"TargetGroups": [encode(&tg)?]}))
        }
        "DescribeTargetGroups" => {
            let (tgs, marker) = elbv2
                .describe_target_groups(DescribeTargetGroupsInput {
                    arns: p.members("TargetGroupArns"),
                    names: p.members("Names"),
                    load_balancer_arn: p.get_string("LoadBalancerArn"),
                    page_size: p.get_i32("PageSize"),
                    marker: p.get_string("Marker"),
                })
                .await?;
            let mut result = json!({"TargetGroups": encode(&tgs)?});
            if let Some(marker) = marker {
                result["NextMarker"] = json!(marker);
            }
            Ok(result)
        }
        "DeleteTargetGroup" => {
            elbv2
                .delete_target_group(&require(p, "TargetGroupArn")?)
                .await?;
            Ok(json!({}))
        }
        "CreateListener" => {
            let listener = elbv2
                .create_listener(CreateListenerInput {
                    load_balancer_arn: require(p, "LoadBalancerArn")?,
                    port: p.get_i32("Port"),
                    protocol: p.get_string("Protocol"),
                    default_actions: actions_from(p, "DefaultActions"),
                })
                .await?;
            Ok(json!({"Listeners": [encode(&listener)?]}))
        }
        "DescribeListeners" => {
            let listeners = elbv2
                .describe_listeners(p.get("LoadBalancerArn"), &p.members("ListenerArns"))
                .await?;
            Ok(json!({"Listeners": encode(&listeners)?}))
        }
        "DeleteListener" => {
            elbv2.delete_listener(&require(p, "ListenerArn")?).await?;
            Ok(json!({}))
        }
        "CreateRule" => {
            let rule = elbv2
                .create_rule(CreateRuleInput {
                    listener_arn: require(p, "ListenerArn")?,
                    priority: p.get_i32("Priority").unwrap_or(0),
                    conditions: conditions_from(p),
                    actions: actions_from(p, "Actions"),
                })
                .await?;
            Ok(json!({"Rules": [encode(&rule)?]}))
        }
        "DescribeRules" => {
            let rules = elbv2
                .describe_rules(p.get("ListenerArn"), &p.members("RuleArns"))
                .await?;
            Ok(json!({"Rules": encode(&rules)?}))
        }
        "DeleteRule" => {
            elbv2.delete_rule(&require(p, "RuleArn")?).await?;
            Ok(json!({}))
        }
        // Faithful no-ops: the source serves these as empty envelopes.
        "ModifyListener" | "ModifyRule" | "SetRulePriorities" | "AddTags" | "RemoveTags" => {
            Ok(json!({}))
        }
        "DescribeTags" => Ok(json!({"TagDescriptions": []})),
        "RegisterTargets" => {
            elbv2
                .register_targets(RegisterTargetsInput {
                    target_group_arn: require(p, "TargetGroupArn")?,
                    targets: p
                        .member_objects("Targets")
                        .iter()
                        .map(|t| TargetDescription {
                            id: t.get_string("Id").unwrap_or_default(),
                            port: t.get_i32("Port"),
                        })
                        .collect(),
                })
                .await?;
            Ok(json!({}))
        }
        "DeregisterTargets" => {
            let ids: Vec<String> = p
                .member_objects("Targets")
                .iter()
                .filter_map(|t| t.get_string("Id"))
                .collect();
            elbv2
                .deregister_targets(&require(p, "TargetGroupArn")?, &ids)
                .await?;
            Ok(json!({}))
        }
        "DescribeTargetHealth" => {
            let targets = elbv2
                .describe_target_health(&require(p, "TargetGroupArn")?)
                .await?;
            let descriptions: Vec<serde_json::Value> = targets
                .iter()
                .map(|t| {
                    json!({
                        "Target": {"Id": t.id, "Port": t.port},
                        "TargetHealth": {"State": t.health},
                    })
                })
                .collect();
            Ok(json!({"TargetHealthDescriptions": descriptions}))
        }
        other => Err(ElbError::Validation(format!(
            "unsupported action {}",
            other
        ))),
    }
}

fn require(p: &QueryParams, key: &str) -> Result<String, ElbError> {
    p.get_string(key)
        .ok_or_else(|| ElbError::Validation(format!("{} is required", key)))
}

fn actions_from(p: &QueryParams, key: &str) -> Vec<RuleAction> {
    p.member_objects(key)
        .iter()
        .enumerate()
        .map(|(i, a)| RuleAction {
            action_type: a.get_string("Type").unwrap_or_default(),
            target_group_arn: a.get_string("TargetGroupArn"),
            order: a.get_i32("Order").or(Some(i as i32 + 1)),
        })
        .collect()
}

fn conditions_from(p: &QueryParams) -> Vec<serde_json::Value> {
    p.member_objects("Conditions")
        .iter()
        .map(|c| {
            json!({
                "Field": c.get_string("Field"),
                "Values": c.members("Values"),
            })
        })
        .collect()
}
