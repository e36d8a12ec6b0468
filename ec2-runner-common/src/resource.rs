use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{RunnerError, Strategy};

/// EC2 instance id (`i-...`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct InstanceId(String);

/// EC2 spot instance request id (`sir-...`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SpotRequestId(String);

impl InstanceId {
    pub const PREFIX: &'static str = "i-";

    pub fn new(raw: impl Into<String>) -> Self {
        InstanceId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SpotRequestId {
    pub const PREFIX: &'static str = "sir-";

    pub fn new(raw: impl Into<String>) -> Self {
        SpotRequestId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SpotRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The compute resource acquired by `start`. The identifier only has meaning
/// under its own strategy, so the two always travel together.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ProvisionResult {
    OnDemand { instance_id: InstanceId },
    Spot { request_id: SpotRequestId },
}

impl ProvisionResult {
    pub fn strategy(&self) -> Strategy {
        match self {
            ProvisionResult::OnDemand { .. } => Strategy::OnDemand,
            ProvisionResult::Spot { .. } => Strategy::Spot,
        }
    }

    /// Identifier for the caller's output slot. Never feed this back without the strategy.
    pub fn resource_id(&self) -> &str {
        match self {
            ProvisionResult::OnDemand { instance_id } => instance_id.as_str(),
            ProvisionResult::Spot { request_id } => request_id.as_str(),
        }
    }

    /// Rebuild from the values a previous `start` emitted.
    ///
    /// The id shape must agree with the strategy: a `sir-` id claimed as
    /// on-demand (or an `i-` id claimed as spot) is rejected.
    pub fn from_parts(strategy: Strategy, resource_id: &str) -> Result<Self, RunnerError> {
        let id = resource_id.trim();
        if id.is_empty() {
            return Err(RunnerError::Configuration(
                "resource identifier is empty".to_string(),
            ));
        }
        match strategy {
            Strategy::OnDemand if id.starts_with(InstanceId::PREFIX) => {
                Ok(ProvisionResult::OnDemand {
                    instance_id: InstanceId::new(id),
                })
            }
            Strategy::Spot if id.starts_with(SpotRequestId::PREFIX) => Ok(ProvisionResult::Spot {
                request_id: SpotRequestId::new(id),
            }),
            _ => Err(RunnerError::Configuration(format!(
                "resource identifier '{}' does not belong to a {} resource",
                id, strategy
            ))),
        }
    }
}
