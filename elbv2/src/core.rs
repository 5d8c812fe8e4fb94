//! ELBv2 operation semantics. There is no dataplane behind these records;
//! target health is synthesized and the stubbed modify operations return
//! empty envelopes, matching the source system's behaviour.

use std::sync::Arc;

use chrono::Utc;
use stevedore_model::{
    Identity, Listener, LoadBalancer, Rule, Target, TargetGroup, TargetHealthState, arn,
};
use stevedore_store::{PageRequest, Storage, StoreError};

use crate::api::*;
use crate::error::{ElbError, Result};

pub struct Elbv2 {
    storage: Arc<dyn Storage>,
    identity: Identity,
}

impl Elbv2 {
    pub fn new(storage: Arc<dyn Storage>, identity: Identity) -> Self {
        Self { storage, identity }
    }

    pub async fn create_load_balancer(
        &self,
        input: CreateLoadBalancerInput,
    ) -> Result<LoadBalancer> {
        if input.name.is_empty() {
            return Err(ElbError::Validation("Name is required".into()));
        }
        let now = Utc::now();
        let suffix = arn::random_suffix();
        let lb = LoadBalancer {
            load_balancer_arn: self.identity.load_balancer_arn(&input.name, &suffix),
            load_balancer_name: input.name.clone(),
            dns_name: format!(
                "{}-{}.{}.elb.localhost",
                input.name, suffix, self.identity.region
            ),
            scheme: input
                .scheme
                .unwrap_or_else(|| "internet-facing".to_string()),
            lb_type: input.lb_type.unwrap_or_else(|| "application".to_string()),
            state: "active".to_string(),
            vpc_id: None,
            subnets: input.subnets,
            security_groups: input.security_groups,
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        match self.storage.load_balancers().create(&lb).await {
            Ok(()) => Ok(lb),
            Err(StoreError::Conflict(_)) => {
                Err(ElbError::DuplicateLoadBalancerName(input.name))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn describe_load_balancers(
        &self,
        input: DescribeLoadBalancersInput,
    ) -> Result<(Vec<LoadBalancer>, Option<String>)> {
        if !input.arns.is_empty() || !input.names.is_empty() {
            let mut found = Vec::new();
            for arn in &input.arns {
                found.push(
                    self.storage
                        .load_balancers()
                        .get_by_arn(arn)
                        .await?
                        .ok_or_else(|| ElbError::LoadBalancerNotFound(arn.clone()))?,
                );
            }
            for name in &input.names {
                found.push(
                    self.storage
                        .load_balancers()
                        .get_by_name(name)
                        .await?
                        .ok_or_else(|| ElbError::LoadBalancerNotFound(name.clone()))?,
                );
            }
            return Ok((found, None));
        }
        let page = self
            .storage
            .load_balancers()
            .list(&PageRequest {
                max_results: input.page_size,
                next_token: input.marker,
            })
            .await?;
        Ok((page.items, page.next_token))
    }

    pub async fn delete_load_balancer(&self, arn: &str) -> Result<()> {
        for listener in self.storage.listeners().list_by_load_balancer(arn).await? {
            self.storage.listeners().delete(&listener.listener_arn).await?;
        }
        match self.storage.load_balancers().delete(arn).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(ElbError::LoadBalancerNotFound(arn.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_target_group(&self, input: CreateTargetGroupInput) -> Result<TargetGroup> {
        if input.name.is_empty() {
            return Err(ElbError::Validation("Name is required".into()));
        }
        let now = Utc::now();
        let tg = TargetGroup {
            target_group_arn: self
                .identity
                .target_group_arn(&input.name, &arn::random_suffix()),
            target_group_name: input.name.clone(),
            protocol: input.protocol,
            port: input.port,
            vpc_id: input.vpc_id,
            target_type: input.target_type.unwrap_or_else(|| "ip".to_string()),
            health_check_path: input.health_check_path,
            health_check_protocol: input.health_check_protocol,
            load_balancer_arns: vec![],
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        match self.storage.target_groups().create(&tg).await {
            Ok(()) => Ok(tg),
            Err(StoreError::Conflict(_)) => Err(ElbError::DuplicateTargetGroupName(input.name)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn describe_target_groups(
        &self,
        input: DescribeTargetGroupsInput,
    ) -> Result<(Vec<TargetGroup>, Option<String>)> {
        if !input.arns.is_empty() || !input.names.is_empty() {
            let mut found = Vec::new();
            for arn in &input.arns {
                found.push(
                    self.storage
                        .target_groups()
                        .get_by_arn(arn)
                        .await?
                        .ok_or_else(|| ElbError::TargetGroupNotFound(arn.clone()))?,
                );
            }
            for name in &input.names {
                found.push(
                    self.storage
                        .target_groups()
                        .get_by_name(name)
                        .await?
                        .ok_or_else(|| ElbError::TargetGroupNotFound(name.clone()))?,
                );
            }
            return Ok((found, None));
        }
        let page = self
            .storage
            .target_groups()
            .list(&PageRequest {
                max_results: input.page_size,
                next_token: input.marker,
            })
            .await?;
        let items = match input.load_balancer_arn.as_deref() {
            Some(lb_arn) => page
                .items
                .into_iter()
                .filter(|tg| tg.load_balancer_arns.iter().any(|a| a == lb_arn))
                .collect(),
            None => page.items,
        };
        Ok((items, page.next_token))
    }

    pub async fn delete_target_group(&self, arn: &str) -> Result<()> {
        match self.storage.target_groups().delete(arn).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(ElbError::TargetGroupNotFound(arn.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_listener(&self, input: CreateListenerInput) -> Result<Listener> {
        let lb = self
            .storage
            .load_balancers()
            .get_by_arn(&input.load_balancer_arn)
            .await?
            .ok_or_else(|| ElbError::LoadBalancerNotFound(input.load_balancer_arn.clone()))?;
        let lb_suffix = lb
            .load_balancer_arn
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let now = Utc::now();
        let listener = Listener {
            listener_arn: self.identity.listener_arn(
                &lb.load_balancer_name,
                &lb_suffix,
                &arn::random_suffix(),
            ),
            load_balancer_arn: lb.load_balancer_arn.clone(),
            port: input.port,
            protocol: input.protocol,
            default_actions: input.default_actions,
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.storage.listeners().create(&listener).await?;
        Ok(listener)
    }

    pub async fn describe_listeners(
        &self,
        load_balancer_arn: Option<&str>,
        listener_arns: &[String],
    ) -> Result<Vec<Listener>> {
        if !listener_arns.is_empty() {
            let mut found = Vec::new();
            for arn in listener_arns {
                found.push(
                    self.storage
                        .listeners()
                        .get(arn)
                        .await?
                        .ok_or_else(|| ElbError::ListenerNotFound(arn.clone()))?,
                );
            }
            return Ok(found);
        }
        let lb_arn = load_balancer_arn.ok_or_else(|| {
            ElbError::Validation("LoadBalancerArn or ListenerArns is required".into())
        })?;
        Ok(self.storage.listeners().list_by_load_balancer(lb_arn).await?)
    }

    pub async fn delete_listener(&self, arn: &str) -> Result<()> {
        match self.storage.listeners().delete(arn).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(ElbError::ListenerNotFound(arn.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Rule priority is the stable ordering field within a listener.
    pub async fn create_rule(&self, input: CreateRuleInput) -> Result<Rule> {
        let listener = self
            .storage
            .listeners()
            .get(&input.listener_arn)
            .await?
            .ok_or_else(|| ElbError::ListenerNotFound(input.listener_arn.clone()))?;
        if input.priority < 1 {
            return Err(ElbError::Validation("Priority must be positive".into()));
        }
        let existing = self
            .storage
            .rules()
            .list_by_listener(&listener.listener_arn)
            .await?;
        if existing
            .iter()
            .any(|r| r.priority_value() == input.priority)
        {
            return Err(ElbError::Validation(format!(
                "Priority {} is already in use",
                input.priority
            )));
        }

        // Recover the lb/listener suffix path segments from the listener ARN.
        let mut segments = listener.listener_arn.rsplit('/');
        let listener_suffix = segments.next().unwrap_or_default().to_string();
        let lb_suffix = segments.next().unwrap_or_default().to_string();
        let lb_name = segments.next().unwrap_or_default().to_string();

        let now = Utc::now();
        let rule = Rule {
            rule_arn: self.identity.rule_arn(
                &lb_name,
                &lb_suffix,
                &listener_suffix,
                &arn::random_suffix(),
            ),
            listener_arn: listener.listener_arn.clone(),
            priority: input.priority.to_string(),
            conditions: input.conditions,
            actions: input.actions,
            is_default: false,
            region: self.identity.region.clone(),
            account_id: self.identity.account_id.clone(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.storage.rules().create(&rule).await?;
        Ok(rule)
    }

    pub async fn describe_rules(
        &self,
        listener_arn: Option<&str>,
        rule_arns: &[String],
    ) -> Result<Vec<Rule>> {
        if !rule_arns.is_empty() {
            let mut found = Vec::new();
            for arn in rule_arns {
                found.push(
                    self.storage
                        .rules()
                        .get(arn)
                        .await?
                        .ok_or_else(|| ElbError::RuleNotFound(arn.clone()))?,
                );
            }
            return Ok(found);
        }
        let listener_arn = listener_arn
            .ok_or_else(|| ElbError::Validation("ListenerArn or RuleArns is required".into()))?;
        Ok(self.storage.rules().list_by_listener(listener_arn).await?)
    }

    pub async fn delete_rule(&self, arn: &str) -> Result<()> {
        match self.storage.rules().delete(arn).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(ElbError::RuleNotFound(arn.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Registered targets default to `healthy`; upstream health is
    /// synthesized since there is no true dataplane.
    pub async fn register_targets(&self, input: RegisterTargetsInput) -> Result<()> {
        self.require_target_group(&input.target_group_arn).await?;
        let now = Utc::now();
        let targets: Vec<Target> = input
            .targets
            .into_iter()
            .map(|t| Target {
                target_group_arn: input.target_group_arn.clone(),
                id: t.id,
                port: t.port,
                health: TargetHealthState::Healthy,
                region: self.identity.region.clone(),
                account_id: self.identity.account_id.clone(),
                created_at: now,
                updated_at: now,
                version: 0,
            })
            .collect();
        self.storage.targets().register(&targets).await?;
        Ok(())
    }

    pub async fn deregister_targets(
        &self,
        target_group_arn: &str,
        ids: &[String],
    ) -> Result<()> {
        self.require_target_group(target_group_arn).await?;
        self.storage
            .targets()
            .deregister(target_group_arn, ids)
            .await?;
        Ok(())
    }

    /// One description per registered target.
    pub async fn describe_target_health(&self, target_group_arn: &str) -> Result<Vec<Target>> {
        self.require_target_group(target_group_arn).await?;
        Ok(self.storage.targets().list_by_group(target_group_arn).await?)
    }

    async fn require_target_group(&self, arn: &str) -> Result<TargetGroup> {
        self.storage
            .target_groups()
            .get_by_arn(arn)
            .await?
            .ok_or_else(|| ElbError::TargetGroupNotFound(arn.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stevedore_store::MemoryStorage;

    fn elb() -> Elbv2 {
        Elbv2::new(
            Arc::new(MemoryStorage::new()),
            Identity::new("us-east-1", "000000000000"),
        )
    }

    #[tokio::test]
    async fn test_duplicate_lb_name_conflicts() {
        let elb = elb();
        elb.create_load_balancer(CreateLoadBalancerInput {
            name: "web".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        let err = elb
            .create_load_balancer(CreateLoadBalancerInput {
                name: "web".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ElbError::DuplicateLoadBalancerName(_)));
    }

    #[tokio::test]
    async fn test_listener_and_rule_lifecycle() {
        let elb = elb();
        let lb = elb
            .create_load_balancer(CreateLoadBalancerInput {
                name: "web".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let listener = elb
            .create_listener(CreateListenerInput {
                load_balancer_arn: lb.load_balancer_arn.clone(),
                port: Some(80),
                protocol: Some("HTTP".into()),
                default_actions: vec![],
            })
            .await
            .unwrap();

        for priority in [20, 5] {
            elb.create_rule(CreateRuleInput {
                listener_arn: listener.listener_arn.clone(),
                priority,
                conditions: vec![],
                actions: vec![],
            })
            .await
            .unwrap();
        }
        // Stable priority order
        let rules = elb
            .describe_rules(Some(&listener.listener_arn), &[])
            .await
            .unwrap();
        assert_eq!(rules[0].priority, "5");
        assert_eq!(rules[1].priority, "20");

        // Reusing a priority is rejected
        let err = elb
            .create_rule(CreateRuleInput {
                listener_arn: listener.listener_arn.clone(),
                priority: 5,
                conditions: vec![],
                actions: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ElbError::Validation(_)));

        // Deleting the load balancer cascades listeners and rules
        elb.delete_load_balancer(&lb.load_balancer_arn).await.unwrap();
        let err = elb
            .describe_listeners(None, &[listener.listener_arn.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, ElbError::ListenerNotFound(_)));
    }

    #[tokio::test]
    async fn test_targets_default_healthy() {
        let elb = elb();
        let tg = elb
            .create_target_group(CreateTargetGroupInput {
                name: "tg".into(),
                port: Some(8080),
                ..Default::default()
            })
            .await
            .unwrap();
        elb.register_targets(RegisterTargetsInput {
            target_group_arn: tg.target_group_arn.clone(),
            targets: vec![
                TargetDescription {
                    id: "10.0.0.1".into(),
                    port: Some(8080),
                },
                TargetDescription {
                    id: "10.0.0.2".into(),
                    port: Some(8080),
                },
            ],
        })
        .await
        .unwrap();

        let health = elb
            .describe_target_health(&tg.target_group_arn)
            .await
            .unwrap();
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|t| t.health == TargetHealthState::Healthy));

        elb.deregister_targets(&tg.target_group_arn, &["10.0.0.1".into()])
            .await
            .unwrap();
        assert_eq!(
            elb.describe_target_health(&tg.target_group_arn)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
