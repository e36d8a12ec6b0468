use ec2_runner_common::{Label, ProvisionRequest, ProvisionResult, RunnerError, Strategy, Tag, Worker};
use ec2_runner_providers::{ComputeProvider, ControlPlane};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::logger;
use crate::price_oracle::{choose_strategy, OnDemandPriceTable, PriceOracle};
use crate::provisioner::{InstanceProvisioner, Readiness, SpotPollPolicy};
use crate::registration::{RegistrationPolicy, RegistrationWaiter};
use crate::state_machine::{StartEpisode, StartPhase};
use crate::teardown::{DeregisterOutcome, TeardownCoordinator};

/// Inputs of a `start` episode. Label and registration token are produced by `start` itself.
#[derive(Debug, Clone)]
pub struct StartSpec {
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub iam_role_name: Option<String>,
    pub tags: Vec<Tag>,
    pub strategy: Strategy,
    pub count: u32,
    pub region: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub label: Label,
    pub result: ProvisionResult,
    pub readiness: Readiness,
    pub worker: Worker,
}

/// A failed `start`. Carries the resource created before the failure, if any,
/// so the caller can still publish it and release it with `stop`.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct StartFailure {
    pub label: Label,
    pub result: Option<ProvisionResult>,
    pub source: RunnerError,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub spot_poll: SpotPollPolicy,
    pub registration: RegistrationPolicy,
}

pub struct Orchestrator {
    compute: Arc<dyn ComputeProvider>,
    control_plane: Arc<dyn ControlPlane>,
    prices: OnDemandPriceTable,
    timings: Timings,
}

impl Orchestrator {
    pub fn new(
        compute: Arc<dyn ComputeProvider>,
        control_plane: Arc<dyn ControlPlane>,
        prices: OnDemandPriceTable,
    ) -> Self {
        Self {
            compute,
            control_plane,
            prices,
            timings: Timings::default(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Acquire a worker for `label`, wait until it runs and registers.
    ///
    /// The label is generated by the caller before any remote call so a failed
    /// episode can still be released with `stop`.
    pub async fn start(&self, spec: &StartSpec, label: Label) -> Result<StartOutcome, StartFailure> {
        let mut episode = StartEpisode::new(label.as_str());
        let log = logger::log_event_with_metadata(
            "START_RUNNER",
            label.as_str(),
            Some(serde_json::json!({
                "repository": self.control_plane.repository().to_string(),
                "instance_type": spec.instance_type,
                "runner_type": spec.strategy.as_str(),
                "region": spec.region,
            })),
        );
        let outcome = self.run_start(spec, label, &mut episode).await;
        log.finish(&outcome);
        outcome
    }

    async fn run_start(
        &self,
        spec: &StartSpec,
        label: Label,
        episode: &mut StartEpisode,
    ) -> Result<StartOutcome, StartFailure> {
        let failed = |result: Option<&ProvisionResult>, source: RunnerError| StartFailure {
            label: label.clone(),
            result: result.cloned(),
            source,
        };

        if spec.count > 1 {
            tracing::warn!(
                "[orchestrator] count={} requested, only one runner per episode is supported; launching 1",
                spec.count
            );
        }
        let count = 1;

        let registration_token = self
            .control_plane
            .registration_token()
            .await
            .map_err(|e| failed(None, RunnerError::RemoteQuery(format!("GitHub registration token: {}", e))))?;
        tracing::info!("[orchestrator] GitHub registration token is received");
        episode.advance(StartPhase::TokenAcquired, "registration token received");

        let request = ProvisionRequest {
            image_id: spec.image_id.clone(),
            instance_type: spec.instance_type.clone(),
            subnet_id: spec.subnet_id.clone(),
            security_group_id: spec.security_group_id.clone(),
            iam_role_name: spec.iam_role_name.clone(),
            tags: spec.tags.clone(),
            label: label.clone(),
            registration_token,
            strategy: spec.strategy,
            count,
            region: spec.region.clone(),
            repository: self.control_plane.repository().clone(),
        };

        let provisioner = InstanceProvisioner::new(self.compute.as_ref(), self.timings.spot_poll);
        let provisioned = match spec.strategy {
            Strategy::OnDemand => provisioner.provision_on_demand(&request).await,
            Strategy::Spot => {
                let oracle = PriceOracle::new(self.compute.as_ref(), &self.prices);
                let spot_price = oracle
                    .current_spot_price(&spec.instance_type)
                    .await
                    .map_err(|e| failed(None, e))?;
                let on_demand_price = oracle.on_demand_price(&spec.instance_type);
                let chosen = choose_strategy(&spot_price, &on_demand_price);
                let reason = format!("spot={} ondemand={} -> {}", spot_price, on_demand_price, chosen);
                tracing::info!("[orchestrator] price comparison for {}: {}", spec.instance_type, reason);
                episode.advance(StartPhase::PriceCompared, &reason);
                match chosen {
                    Strategy::Spot => provisioner.provision_spot(&request, &spot_price).await,
                    Strategy::OnDemand => provisioner.provision_on_demand(&request).await,
                }
            }
        };
        let result = provisioned.map_err(|e| failed(None, e))?;
        episode.advance(StartPhase::Provisioned, result.resource_id());

        let readiness = provisioner.await_running(&result).await.map_err(|e| {
            tracing::error!(
                "[orchestrator] {} {} did not come up; release it with mode=stop label={}",
                result.strategy(),
                result.resource_id(),
                label
            );
            failed(Some(&result), e)
        })?;

        let waiter = RegistrationWaiter::new(self.control_plane.as_ref(), self.timings.registration);
        let worker = waiter
            .await_registration(&label)
            .await
            .map_err(|e| failed(Some(&result), e))?;
        episode.advance(StartPhase::Confirmed, "runner online");

        Ok(StartOutcome {
            label,
            result,
            readiness,
            worker,
        })
    }

    /// Release the compute resource, then deregister the worker.
    ///
    /// Deregistration runs even if termination failed; the first error wins.
    pub async fn stop(&self, label: &Label, result: &ProvisionResult) -> Result<DeregisterOutcome, RunnerError> {
        let teardown = TeardownCoordinator::new(self.compute.as_ref(), self.control_plane.as_ref());
        let terminated = teardown.terminate(result, label).await;
        let deregistered = teardown.deregister(label).await;
        match (terminated, deregistered) {
            (Err(e), other) => {
                if let Err(second) = other {
                    tracing::error!("[orchestrator] deregistration also failed: {}", second);
                }
                Err(e)
            }
            (Ok(()), outcome) => outcome,
        }
    }
}
