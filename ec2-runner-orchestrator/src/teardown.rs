use ec2_runner_common::{Label, ProvisionResult, RunnerError};
use ec2_runner_providers::{ComputeProvider, ControlPlane};

use crate::logger;
use crate::registration::{RegistrationPolicy, RegistrationWaiter, WorkerLookup};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeregisterOutcome {
    Removed { id: u64, name: String },
    /// No worker carried the label. Not an error.
    NotFound,
}

pub struct TeardownCoordinator<'a> {
    compute: &'a dyn ComputeProvider,
    control_plane: &'a dyn ControlPlane,
}

impl<'a> TeardownCoordinator<'a> {
    pub fn new(compute: &'a dyn ComputeProvider, control_plane: &'a dyn ControlPlane) -> Self {
        Self {
            compute,
            control_plane,
        }
    }

    /// Release the compute resource recorded by `start`.
    ///
    /// A spot request is cancelled first, then any instance it launched is terminated.
    pub async fn terminate(&self, result: &ProvisionResult, label: &Label) -> Result<(), RunnerError> {
        let log = logger::log_event_with_metadata(
            "PROVIDER_TERMINATE",
            label.as_str(),
            Some(serde_json::json!({
                "strategy": result.strategy().as_str(),
                "resource_id": result.resource_id(),
            })),
        );
        let outcome = match result {
            ProvisionResult::OnDemand { instance_id } => self
                .compute
                .terminate_instance(instance_id.as_str())
                .await
                .map(|_| tracing::info!("[teardown] AWS EC2 instance {} is terminated", instance_id))
                .map_err(|e| {
                    RunnerError::Teardown(format!("AWS EC2 instance {} termination error: {}", instance_id, e))
                }),
            ProvisionResult::Spot { request_id } => self.terminate_spot(request_id.as_str()).await,
        };
        log.finish(&outcome);
        outcome
    }

    async fn terminate_spot(&self, request_id: &str) -> Result<(), RunnerError> {
        self.compute
            .cancel_spot_request(request_id)
            .await
            .map_err(|e| RunnerError::Teardown(format!("spot request {} cancellation error: {}", request_id, e)))?;
        tracing::info!("[teardown] spot request {} is cancelled", request_id);

        let request = self.compute.describe_spot_request(request_id).await.map_err(|e| {
            RunnerError::Teardown(format!(
                "spot request {} could not be described after cancellation: {}",
                request_id, e
            ))
        })?;

        match request.instance_id {
            Some(instance_id) => {
                self.compute.terminate_instance(&instance_id).await.map_err(|e| {
                    RunnerError::Teardown(format!(
                        "AWS EC2 instance {} (spot request {}) termination error: {}",
                        instance_id, request_id, e
                    ))
                })?;
                tracing::info!(
                    "[teardown] AWS EC2 instance {} from spot request {} is terminated",
                    instance_id,
                    request_id
                );
            }
            None => logger::log_quick(
                "PROVIDER_TERMINATE",
                request_id,
                Some("spot request was never fulfilled, no instance to terminate"),
            ),
        }
        Ok(())
    }

    /// Remove the worker with `label` from the control plane. Missing worker is success.
    pub async fn deregister(&self, label: &Label) -> Result<DeregisterOutcome, RunnerError> {
        let log = logger::log_event("DEREGISTER_WORKER", label.as_str());
        let waiter = RegistrationWaiter::new(self.control_plane, RegistrationPolicy::default());
        let outcome = match waiter.find_worker(label).await {
            WorkerLookup::Found(worker) => self
                .control_plane
                .delete_worker(worker.id)
                .await
                .map(|_| {
                    tracing::info!("[teardown] GitHub self-hosted runner {} is removed", worker.name);
                    DeregisterOutcome::Removed {
                        id: worker.id,
                        name: worker.name.clone(),
                    }
                })
                .map_err(|e| {
                    RunnerError::Teardown(format!("GitHub self-hosted runner {} removal error: {}", worker.name, e))
                }),
            WorkerLookup::NotFound => {
                tracing::info!(
                    "[teardown] GitHub self-hosted runner with label {} is not found, so the removal is skipped",
                    label
                );
                Ok(DeregisterOutcome::NotFound)
            }
            WorkerLookup::QueryFailed(e) => Err(RunnerError::RemoteQuery(format!(
                "listing runners for {}: {}",
                self.control_plane.repository(),
                e
            ))),
        };
        log.finish(&outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec2_runner_common::{InstanceId, Repository, SpotRequestId, Worker, WorkerStatus};
    use ec2_runner_providers::inventory::SpotRequestState;
    use ec2_runner_providers::mock::{ComputeCall, ListOutcome, MockCompute, MockControlPlane};

    fn label() -> Label {
        Label::parse("k3x9q").unwrap()
    }

    fn control_plane() -> MockControlPlane {
        MockControlPlane::new(Repository::parse("acme/widgets").unwrap())
    }

    #[tokio::test]
    async fn on_demand_terminates_instance() {
        let compute = MockCompute::new();
        let cp = control_plane();
        let t = TeardownCoordinator::new(&compute, &cp);
        let result = ProvisionResult::OnDemand {
            instance_id: InstanceId::new("i-0abc"),
        };
        t.terminate(&result, &label()).await.unwrap();
        assert_eq!(compute.calls(), vec![ComputeCall::TerminateInstance("i-0abc".into())]);
    }

    #[tokio::test]
    async fn spot_cancels_then_terminates_fulfilled_instance() {
        let compute = MockCompute::new()
            .with_spot_states(vec![SpotRequestState::Active])
            .with_spot_instance("i-spot1");
        let cp = control_plane();
        let t = TeardownCoordinator::new(&compute, &cp);
        let result = ProvisionResult::Spot {
            request_id: SpotRequestId::new("sir-1"),
        };
        t.terminate(&result, &label()).await.unwrap();
        assert_eq!(
            compute.calls(),
            vec![
                ComputeCall::CancelSpot("sir-1".into()),
                ComputeCall::DescribeSpot("sir-1".into()),
                ComputeCall::TerminateInstance("i-spot1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn unfulfilled_spot_only_cancels() {
        let compute = MockCompute::new();
        let cp = control_plane();
        let t = TeardownCoordinator::new(&compute, &cp);
        let result = ProvisionResult::Spot {
            request_id: SpotRequestId::new("sir-1"),
        };
        t.terminate(&result, &label()).await.unwrap();
        assert!(!compute
            .calls()
            .iter()
            .any(|c| matches!(c, ComputeCall::TerminateInstance(_))));
    }

    #[tokio::test]
    async fn terminate_failure_is_teardown_error() {
        let compute = MockCompute::new().with_cancel_error("InvalidSpotInstanceRequestID.NotFound");
        let cp = control_plane();
        let t = TeardownCoordinator::new(&compute, &cp);
        let result = ProvisionResult::Spot {
            request_id: SpotRequestId::new("sir-1"),
        };
        let err = t.terminate(&result, &label()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Teardown(_)));
    }

    #[tokio::test]
    async fn deregister_removes_matching_worker() {
        let compute = MockCompute::new();
        let cp = control_plane().with_workers(vec![Worker {
            id: 42,
            name: "ip-10-0-0-42".into(),
            status: WorkerStatus::Online,
            labels: vec!["k3x9q".into()],
        }]);
        let t = TeardownCoordinator::new(&compute, &cp);
        let outcome = t.deregister(&label()).await.unwrap();
        assert_eq!(
            outcome,
            DeregisterOutcome::Removed {
                id: 42,
                name: "ip-10-0-0-42".into()
            }
        );
        assert_eq!(cp.deleted(), vec![42]);
    }

    #[tokio::test]
    async fn deregister_missing_worker_is_ok() {
        let compute = MockCompute::new();
        let cp = control_plane();
        let t = TeardownCoordinator::new(&compute, &cp);
        assert_eq!(t.deregister(&label()).await.unwrap(), DeregisterOutcome::NotFound);
        assert!(cp.deleted().is_empty());
    }

    #[tokio::test]
    async fn deregister_listing_failure_is_remote_query_error() {
        let compute = MockCompute::new();
        let cp = control_plane().with_list_script(vec![ListOutcome::Error("502".into())]);
        let t = TeardownCoordinator::new(&compute, &cp);
        let err = t.deregister(&label()).await.unwrap_err();
        assert!(matches!(err, RunnerError::RemoteQuery(_)));
    }
}
