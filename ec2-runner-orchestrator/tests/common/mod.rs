// Shared fixtures for orchestrator integration tests. Everything runs against the in-memory providers.
#![allow(dead_code)]

use bigdecimal::BigDecimal;
use ec2_runner_common::{Label, Repository, Strategy, Tag, Worker, WorkerStatus};
use ec2_runner_orchestrator::price_oracle::OnDemandPriceTable;
use ec2_runner_orchestrator::{Orchestrator, StartSpec};
use ec2_runner_providers::mock::{MockCompute, MockControlPlane};
use ec2_runner_providers::{ComputeProvider, ControlPlane};
use std::str::FromStr;
use std::sync::Arc;

pub const LABEL: &str = "k3x9q";

pub fn label() -> Label {
    Label::parse(LABEL).unwrap()
}

pub fn repo() -> Repository {
    Repository::parse("acme/widgets").unwrap()
}

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn worker(id: u64, label: &str, status: WorkerStatus) -> Worker {
    Worker {
        id,
        name: format!("ip-10-0-1-{}", id),
        status,
        labels: vec!["self-hosted".into(), "Linux".into(), "X64".into(), label.into()],
    }
}

pub fn control_plane_with_online_runner() -> MockControlPlane {
    MockControlPlane::new(repo()).with_workers(vec![worker(101, LABEL, WorkerStatus::Online)])
}

pub fn start_spec(strategy: Strategy) -> StartSpec {
    StartSpec {
        image_id: "ami-0abcdef1234567890".into(),
        instance_type: "m5.large".into(),
        subnet_id: "subnet-0123".into(),
        security_group_id: "sg-0123".into(),
        iam_role_name: None,
        tags: vec![Tag {
            key: "Team".into(),
            value: "ci".into(),
        }],
        strategy,
        count: 1,
        region: "us-east-1".into(),
    }
}

pub fn price_table(instance_type: &str, price: &str) -> OnDemandPriceTable {
    OnDemandPriceTable::from_entries(vec![(instance_type, dec(price))], dec("0.10"))
}

pub fn orchestrator(
    compute: &Arc<MockCompute>,
    control_plane: &Arc<MockControlPlane>,
    prices: OnDemandPriceTable,
) -> Orchestrator {
    let compute: Arc<dyn ComputeProvider> = compute.clone();
    let control_plane: Arc<dyn ControlPlane> = control_plane.clone();
    Orchestrator::new(compute, control_plane, prices)
}
