use bigdecimal::BigDecimal;
use ec2_runner_common::{InstanceId, ProvisionRequest, ProvisionResult, RunnerError, SpotRequestId};
use ec2_runner_providers::boot_script::{build_runner_boot_script, encode_user_data};
use ec2_runner_providers::inventory::{LaunchSpec, SpotRequestState};
use ec2_runner_providers::tags::{tag_specifications, ResourceKind};
use ec2_runner_providers::ComputeProvider;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::logger;
use crate::state_machine::{ProvisionAttempt, ProvisionPhase};

/// Budget for waiting on a spot request to become `active`.
#[derive(Debug, Clone, Copy)]
pub struct SpotPollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for SpotPollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_attempts: 10,
        }
    }
}

/// How `await_running` ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    Running,
    /// Spot request not active within budget. The identifier is still returned.
    SoftTimeout { attempts: u32 },
}

pub struct InstanceProvisioner<'a> {
    compute: &'a dyn ComputeProvider,
    spot_poll: SpotPollPolicy,
}

impl<'a> InstanceProvisioner<'a> {
    pub fn new(compute: &'a dyn ComputeProvider, spot_poll: SpotPollPolicy) -> Self {
        Self { compute, spot_poll }
    }

    fn launch_spec(req: &ProvisionRequest, kind: ResourceKind) -> LaunchSpec {
        let script = build_runner_boot_script(&req.repository, &req.registration_token, &req.label);
        LaunchSpec {
            image_id: req.image_id.clone(),
            instance_type: req.instance_type.clone(),
            subnet_id: req.subnet_id.clone(),
            security_group_id: req.security_group_id.clone(),
            iam_instance_profile: req.iam_role_name.clone(),
            user_data: encode_user_data(&script),
            tag_specifications: tag_specifications(&req.tags, kind),
            instance_count: req.count,
        }
    }

    pub async fn provision_on_demand(&self, req: &ProvisionRequest) -> Result<ProvisionResult, RunnerError> {
        let log = logger::log_event_with_metadata(
            "PROVIDER_CREATE",
            req.label.as_str(),
            Some(serde_json::json!({
                "strategy": "ondemand",
                "instance_type": req.instance_type,
                "image_id": req.image_id,
                "region": req.region,
            })),
        );
        let spec = Self::launch_spec(req, ResourceKind::Instance);
        let result = self
            .compute
            .run_instance(&spec)
            .await
            .map_err(|e| RunnerError::ProvisioningFailed(format!("AWS EC2 instance starting error: {}", e)));
        log.finish(&result);

        let instance_id = InstanceId::new(result?);
        tracing::info!("[provisioner] AWS EC2 instance {} is started", instance_id);
        Ok(ProvisionResult::OnDemand { instance_id })
    }

    pub async fn provision_spot(
        &self,
        req: &ProvisionRequest,
        bid_price: &BigDecimal,
    ) -> Result<ProvisionResult, RunnerError> {
        let bid = bid_price.to_string();
        let log = logger::log_event_with_metadata(
            "PROVIDER_CREATE",
            req.label.as_str(),
            Some(serde_json::json!({
                "strategy": "spot",
                "instance_type": req.instance_type,
                "image_id": req.image_id,
                "region": req.region,
                "bid_price": bid,
            })),
        );
        let spec = Self::launch_spec(req, ResourceKind::SpotInstancesRequest);
        let result = self
            .compute
            .request_spot_instance(&spec, &bid)
            .await
            .map_err(|e| RunnerError::ProvisioningFailed(format!("AWS EC2 spot request error: {}", e)));
        log.finish(&result);

        let request_id = SpotRequestId::new(result?);
        tracing::info!("[provisioner] spot request {} submitted at {}", request_id, bid);
        Ok(ProvisionResult::Spot { request_id })
    }

    /// Wait until the resource is usable.
    ///
    /// On-demand delegates to the provider's blocking waiter and fails with
    /// `ProvisioningTimeout`. Spot polls the request and gives up softly.
    pub async fn await_running(&self, result: &ProvisionResult) -> Result<Readiness, RunnerError> {
        match result {
            ProvisionResult::OnDemand { instance_id } => {
                let mut attempt = ProvisionAttempt::new(instance_id.as_str());
                attempt.advance(ProvisionPhase::Pending, "instance created");
                match self.compute.wait_until_running(instance_id.as_str()).await {
                    Ok(()) => {
                        attempt.advance(ProvisionPhase::Running, "instance running");
                        tracing::info!("[provisioner] AWS EC2 instance {} is up and running", instance_id);
                        Ok(Readiness::Running)
                    }
                    Err(e) => {
                        attempt.advance(ProvisionPhase::Failed, "instance never reached running");
                        tracing::error!("[provisioner] AWS EC2 instance {} initialization error", instance_id);
                        Err(RunnerError::ProvisioningTimeout {
                            instance_id: instance_id.to_string(),
                            reason: e.to_string(),
                        })
                    }
                }
            }
            ProvisionResult::Spot { request_id } => match self.poll_spot_request(request_id).await {
                Ok(()) => Ok(Readiness::Running),
                Err(RunnerError::SpotPollSoftTimeout { request_id, attempts }) => {
                    tracing::warn!(
                        "[provisioner] spot request {} is not active after {} checks, continuing",
                        request_id,
                        attempts
                    );
                    Ok(Readiness::SoftTimeout { attempts })
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Poll the spot request until `active`. Exhausting the budget yields `SpotPollSoftTimeout`.
    async fn poll_spot_request(&self, request_id: &SpotRequestId) -> Result<(), RunnerError> {
        let policy = self.spot_poll;
        let max_attempts = policy.max_attempts.max(1);
        let deadline = Instant::now() + policy.interval * max_attempts;
        let mut attempt = ProvisionAttempt::new(request_id.as_str());
        let mut checks = 0u32;

        tracing::info!(
            "[provisioner] checking every {}s if spot request {} is active",
            policy.interval.as_secs(),
            request_id
        );

        loop {
            checks += 1;
            match self.compute.describe_spot_request(request_id.as_str()).await {
                Ok(req) if req.state == SpotRequestState::Active => {
                    attempt.advance(ProvisionPhase::Pending, "spot request evaluated");
                    attempt.advance(ProvisionPhase::Running, "spot request active");
                    tracing::info!(
                        "[provisioner] spot request {} is active (instance={:?})",
                        request_id,
                        req.instance_id
                    );
                    return Ok(());
                }
                Ok(req) if req.state.is_terminal() => {
                    attempt.advance(ProvisionPhase::Failed, req.state.as_str());
                    return Err(RunnerError::ProvisioningFailed(format!(
                        "spot request {} is {} (status={})",
                        request_id,
                        req.state.as_str(),
                        req.status_code.as_deref().unwrap_or("unknown")
                    )));
                }
                Ok(req) => {
                    attempt.advance(ProvisionPhase::Pending, "spot request open");
                    tracing::info!(
                        "[provisioner] spot request {} state={} status={} (check {}/{})",
                        request_id,
                        req.state.as_str(),
                        req.status_code.as_deref().unwrap_or("-"),
                        checks,
                        max_attempts
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "[provisioner] describe spot request {} failed (check {}/{}): {}",
                        request_id,
                        checks,
                        max_attempts,
                        e
                    );
                }
            }

            if checks >= max_attempts || Instant::now() >= deadline {
                return Err(RunnerError::SpotPollSoftTimeout {
                    request_id: request_id.to_string(),
                    attempts: checks,
                });
            }
            sleep(policy.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec2_runner_common::{Label, Repository, Strategy, Tag};
    use ec2_runner_providers::mock::{ComputeCall, MockCompute};
    use std::str::FromStr;

    fn request(tags: Vec<Tag>) -> ProvisionRequest {
        ProvisionRequest {
            image_id: "ami-123".into(),
            instance_type: "m5.large".into(),
            subnet_id: "subnet-1".into(),
            security_group_id: "sg-1".into(),
            iam_role_name: Some("runner-role".into()),
            tags,
            label: Label::parse("k3x9q").unwrap(),
            registration_token: "REGTOKEN".into(),
            strategy: Strategy::Spot,
            count: 1,
            region: "us-east-1".into(),
            repository: Repository::parse("acme/widgets").unwrap(),
        }
    }

    fn team_tag() -> Vec<Tag> {
        vec![Tag {
            key: "team".into(),
            value: "ci".into(),
        }]
    }

    #[tokio::test]
    async fn on_demand_tags_instance_and_embeds_script() {
        let compute = MockCompute::new();
        let p = InstanceProvisioner::new(&compute, SpotPollPolicy::default());
        let result = p.provision_on_demand(&request(team_tag())).await.unwrap();
        assert_eq!(result.strategy(), Strategy::OnDemand);
        assert!(result.resource_id().starts_with("i-"));

        match &compute.calls()[0] {
            ComputeCall::RunInstance(spec) => {
                assert_eq!(spec.tag_specifications.len(), 1);
                assert_eq!(spec.tag_specifications[0].resource_type, ResourceKind::Instance);
                assert_eq!(spec.iam_instance_profile.as_deref(), Some("runner-role"));
                let req = request(vec![]);
                let script = build_runner_boot_script(&req.repository, "REGTOKEN", &req.label);
                assert_eq!(spec.user_data, encode_user_data(&script));
                assert!(!spec.user_data.contains("REGTOKEN"));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn spot_tags_spot_request_and_bids() {
        let compute = MockCompute::new();
        let p = InstanceProvisioner::new(&compute, SpotPollPolicy::default());
        let bid = BigDecimal::from_str("0.0412").unwrap();
        let result = p.provision_spot(&request(team_tag()), &bid).await.unwrap();
        assert_eq!(result.strategy(), Strategy::Spot);
        assert!(result.resource_id().starts_with("sir-"));

        match &compute.calls()[0] {
            ComputeCall::RequestSpot { spec, bid_price } => {
                assert_eq!(bid_price, "0.0412");
                assert_eq!(
                    spec.tag_specifications[0].resource_type.as_str(),
                    "spot-instances-request"
                );
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_tags_send_no_specification_on_either_path() {
        let compute = MockCompute::new();
        let p = InstanceProvisioner::new(&compute, SpotPollPolicy::default());
        p.provision_on_demand(&request(vec![])).await.unwrap();
        p.provision_spot(&request(vec![]), &BigDecimal::from_str("0.1").unwrap())
            .await
            .unwrap();
        for call in compute.calls() {
            match call {
                ComputeCall::RunInstance(spec) | ComputeCall::RequestSpot { spec, .. } => {
                    assert!(spec.tag_specifications.is_empty())
                }
                other => panic!("unexpected call {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn create_failure_is_provisioning_failed() {
        let compute = MockCompute::new().with_run_error("InsufficientInstanceCapacity");
        let p = InstanceProvisioner::new(&compute, SpotPollPolicy::default());
        let err = p.provision_on_demand(&request(vec![])).await.unwrap_err();
        assert!(matches!(err, RunnerError::ProvisioningFailed(_)));
    }

    #[tokio::test]
    async fn on_demand_wait_failure_is_timeout() {
        let compute = MockCompute::new().with_wait_error("max attempts exceeded");
        let p = InstanceProvisioner::new(&compute, SpotPollPolicy::default());
        let result = ProvisionResult::OnDemand {
            instance_id: InstanceId::new("i-1"),
        };
        let err = p.await_running(&result).await.unwrap_err();
        assert!(matches!(err, RunnerError::ProvisioningTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn spot_becomes_active_on_third_check() {
        let compute = MockCompute::new().with_spot_states(vec![
            SpotRequestState::Open,
            SpotRequestState::Open,
            SpotRequestState::Active,
        ]);
        let p = InstanceProvisioner::new(&compute, SpotPollPolicy::default());
        let result = ProvisionResult::Spot {
            request_id: SpotRequestId::new("sir-1"),
        };
        let started = Instant::now();
        assert_eq!(p.await_running(&result).await.unwrap(), Readiness::Running);
        assert_eq!(compute.describe_count(), 3);
        // Two sleeps between three checks.
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn spot_soft_timeout_after_ten_checks() {
        let compute = MockCompute::new().with_spot_describe_error("throttled");
        let p = InstanceProvisioner::new(&compute, SpotPollPolicy::default());
        let result = ProvisionResult::Spot {
            request_id: SpotRequestId::new("sir-1"),
        };
        let readiness = p.await_running(&result).await.unwrap();
        assert_eq!(readiness, Readiness::SoftTimeout { attempts: 10 });
        assert_eq!(compute.describe_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn spot_terminal_state_fails() {
        let compute =
            MockCompute::new().with_spot_states(vec![SpotRequestState::Open, SpotRequestState::Cancelled]);
        let p = InstanceProvisioner::new(&compute, SpotPollPolicy::default());
        let result = ProvisionResult::Spot {
            request_id: SpotRequestId::new("sir-1"),
        };
        let err = p.await_running(&result).await.unwrap_err();
        assert!(matches!(err, RunnerError::ProvisioningFailed(_)));
        assert_eq!(compute.describe_count(), 2);
    }
}
