// Integration tests for the stop episode.

mod common;

use common::{control_plane_with_online_runner, label, orchestrator, price_table, repo};
use ec2_runner_common::{InstanceId, ProvisionResult, RunnerError, SpotRequestId};
use ec2_runner_orchestrator::teardown::DeregisterOutcome;
use ec2_runner_providers::inventory::SpotRequestState;
use ec2_runner_providers::mock::{ComputeCall, MockCompute, MockControlPlane};
use std::sync::Arc;

fn on_demand() -> ProvisionResult {
    ProvisionResult::OnDemand {
        instance_id: InstanceId::new("i-0abc"),
    }
}

#[tokio::test]
async fn test_stop_on_demand() {
    let compute = Arc::new(MockCompute::new());
    let cp = Arc::new(control_plane_with_online_runner());
    let orch = orchestrator(&compute, &cp, price_table("m5.large", "0.096"));

    let outcome = orch.stop(&label(), &on_demand()).await.unwrap();
    assert!(matches!(outcome, DeregisterOutcome::Removed { id: 101, .. }));
    assert_eq!(compute.calls(), vec![ComputeCall::TerminateInstance("i-0abc".into())]);
    assert_eq!(cp.deleted(), vec![101]);
}

#[tokio::test]
async fn test_stop_spot_cancels_then_terminates() {
    let compute = Arc::new(
        MockCompute::new()
            .with_spot_states(vec![SpotRequestState::Active])
            .with_spot_instance("i-0spot"),
    );
    let cp = Arc::new(control_plane_with_online_runner());
    let orch = orchestrator(&compute, &cp, price_table("m5.large", "0.096"));

    let result = ProvisionResult::Spot {
        request_id: SpotRequestId::new("sir-0abc"),
    };
    orch.stop(&label(), &result).await.unwrap();
    let calls = compute.calls();
    assert_eq!(calls.first(), Some(&ComputeCall::CancelSpot("sir-0abc".into())));
    assert_eq!(calls.last(), Some(&ComputeCall::TerminateInstance("i-0spot".into())));
}

#[tokio::test]
async fn test_stop_deregisters_after_terminate_failure() {
    let compute = Arc::new(MockCompute::new().with_terminate_error("UnauthorizedOperation"));
    let cp = Arc::new(control_plane_with_online_runner());
    let orch = orchestrator(&compute, &cp, price_table("m5.large", "0.096"));

    let err = orch.stop(&label(), &on_demand()).await.unwrap_err();
    assert!(matches!(err, RunnerError::Teardown(_)));
    assert_eq!(cp.deleted(), vec![101]);
}

#[tokio::test]
async fn test_stop_without_registered_runner() {
    let compute = Arc::new(MockCompute::new());
    let cp = Arc::new(MockControlPlane::new(repo()));
    let orch = orchestrator(&compute, &cp, price_table("m5.large", "0.096"));

    let outcome = orch.stop(&label(), &on_demand()).await.unwrap();
    assert_eq!(outcome, DeregisterOutcome::NotFound);
}

#[tokio::test]
async fn test_stop_runner_removal_failure() {
    let compute = Arc::new(MockCompute::new());
    let cp = Arc::new(control_plane_with_online_runner().with_delete_error("500"));
    let orch = orchestrator(&compute, &cp, price_table("m5.large", "0.096"));

    let err = orch.stop(&label(), &on_demand()).await.unwrap_err();
    assert!(matches!(err, RunnerError::Teardown(_)));
    assert_eq!(compute.calls().len(), 1);
}
