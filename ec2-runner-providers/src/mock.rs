//! In-memory providers with scripted responses, for tests and dry runs.

use crate::{inventory, ComputeProvider, ControlPlane};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ec2_runner_common::{Repository, Worker};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Every call the compute mock received, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum ComputeCall {
    RunInstance(inventory::LaunchSpec),
    WaitUntilRunning(String),
    TerminateInstance(String),
    RequestSpot {
        spec: inventory::LaunchSpec,
        bid_price: String,
    },
    DescribeSpot(String),
    CancelSpot(String),
    SpotPriceHistory(String),
}

#[derive(Default)]
struct ComputeState {
    calls: Vec<ComputeCall>,
    spot_prices: Vec<String>,
    price_history_error: Option<String>,
    // Each describe pops one entry; once drained the request stays `open`.
    spot_script: VecDeque<std::result::Result<inventory::SpotRequestState, String>>,
    spot_instance_id: Option<String>,
    run_error: Option<String>,
    wait_error: Option<String>,
    terminate_error: Option<String>,
    cancel_error: Option<String>,
}

pub struct MockCompute {
    state: Mutex<ComputeState>,
    seq: AtomicU64,
}

impl Default for MockCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompute {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ComputeState::default()),
            seq: AtomicU64::new(1),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut ComputeState)) -> Self {
        if let Ok(mut s) = self.state.lock() {
            f(&mut s);
        }
        self
    }

    pub fn with_spot_prices(self, prices: &[&str]) -> Self {
        let prices = prices.iter().map(|p| p.to_string()).collect();
        self.with_state(|s| s.spot_prices = prices)
    }

    pub fn with_price_history_error(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_state(|s| s.price_history_error = Some(msg))
    }

    /// Queue spot request states returned by successive describe calls.
    pub fn with_spot_states(self, states: Vec<inventory::SpotRequestState>) -> Self {
        self.with_state(|s| s.spot_script.extend(states.into_iter().map(Ok)))
    }

    /// Queue a describe failure.
    pub fn with_spot_describe_error(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_state(|s| s.spot_script.push_back(Err(msg)))
    }

    /// Instance reported once the spot request is active.
    pub fn with_spot_instance(self, instance_id: &str) -> Self {
        let id = instance_id.to_string();
        self.with_state(|s| s.spot_instance_id = Some(id))
    }

    pub fn with_run_error(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_state(|s| s.run_error = Some(msg))
    }

    pub fn with_wait_error(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_state(|s| s.wait_error = Some(msg))
    }

    pub fn with_terminate_error(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_state(|s| s.terminate_error = Some(msg))
    }

    pub fn with_cancel_error(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_state(|s| s.cancel_error = Some(msg))
    }

    pub fn calls(&self) -> Vec<ComputeCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn describe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ComputeCall::DescribeSpot(_)))
            .count()
    }

    fn record(&self, call: ComputeCall) -> Result<std::sync::MutexGuard<'_, ComputeState>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("MockCompute: state lock poisoned"))?;
        state.calls.push(call);
        Ok(state)
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}mock{:08x}", prefix, self.seq.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ComputeProvider for MockCompute {
    async fn run_instance(&self, spec: &inventory::LaunchSpec) -> Result<String> {
        let state = self.record(ComputeCall::RunInstance(spec.clone()))?;
        if let Some(e) = &state.run_error {
            return Err(anyhow::anyhow!("MockCompute: {}", e));
        }
        drop(state);
        Ok(self.next_id("i-"))
    }

    async fn wait_until_running(&self, instance_id: &str) -> Result<()> {
        let state = self.record(ComputeCall::WaitUntilRunning(instance_id.to_string()))?;
        match &state.wait_error {
            Some(e) => Err(anyhow::anyhow!("MockCompute: {}", e)),
            None => Ok(()),
        }
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let state = self.record(ComputeCall::TerminateInstance(instance_id.to_string()))?;
        match &state.terminate_error {
            Some(e) => Err(anyhow::anyhow!("MockCompute: {}", e)),
            None => Ok(()),
        }
    }

    async fn request_spot_instance(
        &self,
        spec: &inventory::LaunchSpec,
        bid_price: &str,
    ) -> Result<String> {
        let state = self.record(ComputeCall::RequestSpot {
            spec: spec.clone(),
            bid_price: bid_price.to_string(),
        })?;
        if let Some(e) = &state.run_error {
            return Err(anyhow::anyhow!("MockCompute: {}", e));
        }
        drop(state);
        Ok(self.next_id("sir-"))
    }

    async fn describe_spot_request(&self, request_id: &str) -> Result<inventory::SpotRequest> {
        let mut state = self.record(ComputeCall::DescribeSpot(request_id.to_string()))?;
        let next = state
            .spot_script
            .pop_front()
            .unwrap_or(Ok(inventory::SpotRequestState::Open));
        let spot_state = next.map_err(|e| anyhow::anyhow!("MockCompute: {}", e))?;
        let instance_id = if spot_state == inventory::SpotRequestState::Active {
            state.spot_instance_id.clone()
        } else {
            None
        };
        Ok(inventory::SpotRequest {
            request_id: request_id.to_string(),
            status_code: Some(match spot_state {
                inventory::SpotRequestState::Active => "fulfilled".to_string(),
                _ => "pending-evaluation".to_string(),
            }),
            state: spot_state,
            instance_id,
        })
    }

    async fn cancel_spot_request(&self, request_id: &str) -> Result<()> {
        let state = self.record(ComputeCall::CancelSpot(request_id.to_string()))?;
        match &state.cancel_error {
            Some(e) => Err(anyhow::anyhow!("MockCompute: {}", e)),
            None => Ok(()),
        }
    }

    async fn spot_price_history(
        &self,
        instance_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<inventory::SpotPricePoint>> {
        let state = self.record(ComputeCall::SpotPriceHistory(instance_type.to_string()))?;
        if let Some(e) = &state.price_history_error {
            return Err(anyhow::anyhow!("MockCompute: {}", e));
        }
        Ok(state
            .spot_prices
            .iter()
            .enumerate()
            .map(|(i, p)| inventory::SpotPricePoint {
                instance_type: instance_type.to_string(),
                availability_zone: format!("mock-zone-{}", i),
                price: p.clone(),
                timestamp: Some(since),
            })
            .collect())
    }
}

/// Outcome of one `list_workers` call.
#[derive(Clone, Debug)]
pub enum ListOutcome {
    Workers(Vec<Worker>),
    Error(String),
}

#[derive(Default)]
struct ControlPlaneState {
    token_error: Option<String>,
    // Each list pops one entry; once drained `steady` is returned.
    list_script: VecDeque<ListOutcome>,
    steady: Vec<Worker>,
    delete_error: Option<String>,
    deleted: Vec<u64>,
    list_calls: usize,
    token_calls: usize,
}

pub struct MockControlPlane {
    repository: Repository,
    state: Mutex<ControlPlaneState>,
}

impl MockControlPlane {
    pub fn new(repository: Repository) -> Self {
        Self {
            repository,
            state: Mutex::new(ControlPlaneState::default()),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut ControlPlaneState)) -> Self {
        if let Ok(mut s) = self.state.lock() {
            f(&mut s);
        }
        self
    }

    pub fn with_token_error(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_state(|s| s.token_error = Some(msg))
    }

    pub fn with_list_script(self, script: Vec<ListOutcome>) -> Self {
        self.with_state(|s| s.list_script.extend(script))
    }

    /// Workers returned once the script is drained.
    pub fn with_workers(self, workers: Vec<Worker>) -> Self {
        self.with_state(|s| s.steady = workers)
    }

    pub fn with_delete_error(self, msg: &str) -> Self {
        let msg = msg.to_string();
        self.with_state(|s| s.delete_error = Some(msg))
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().map(|s| s.list_calls).unwrap_or(0)
    }

    pub fn token_calls(&self) -> usize {
        self.state.lock().map(|s| s.token_calls).unwrap_or(0)
    }

    pub fn deleted(&self) -> Vec<u64> {
        self.state.lock().map(|s| s.deleted.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ControlPlaneState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("MockControlPlane: state lock poisoned"))
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    fn repository(&self) -> &Repository {
        &self.repository
    }

    async fn registration_token(&self) -> Result<String> {
        let mut state = self.lock()?;
        state.token_calls += 1;
        match &state.token_error {
            Some(e) => Err(anyhow::anyhow!("MockControlPlane: {}", e)),
            None => Ok(format!("MOCKTOKEN{}", state.token_calls)),
        }
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        let mut state = self.lock()?;
        state.list_calls += 1;
        match state.list_script.pop_front() {
            Some(ListOutcome::Workers(w)) => Ok(w),
            Some(ListOutcome::Error(e)) => Err(anyhow::anyhow!("MockControlPlane: {}", e)),
            None => Ok(state.steady.clone()),
        }
    }

    async fn delete_worker(&self, worker_id: u64) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(e) = &state.delete_error {
            return Err(anyhow::anyhow!("MockControlPlane: {}", e));
        }
        state.deleted.push(worker_id);
        state.steady.retain(|w| w.id != worker_id);
        Ok(())
    }
}
