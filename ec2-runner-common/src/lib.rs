use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod resource;

pub use error::RunnerError;
pub use resource::{InstanceId, ProvisionResult, SpotRequestId};

// --- Enums ---

/// How the compute resource for an episode is acquired.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    OnDemand, // Immediate, fixed price
    Spot,     // Bid-priced, reclaimable
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::OnDemand => "ondemand",
            Strategy::Spot => "spot",
        }
    }

    /// Parse the `runner-type` input. Empty means on-demand.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "ondemand" | "on-demand" | "on_demand" => Some(Strategy::OnDemand),
            "spot" => Some(Strategy::Spot),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Registering, // Anything the control plane reports that is neither online nor offline
    Online,
    Offline,
}

impl WorkerStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "online" => WorkerStatus::Online,
            "offline" => WorkerStatus::Offline,
            _ => WorkerStatus::Registering,
        }
    }
}

// --- Entities ---

/// A self-hosted runner as the control plane reports it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Worker {
    pub id: u64,
    pub name: String,
    pub status: WorkerStatus,
    pub labels: Vec<String>,
}

impl Worker {
    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.iter().any(|l| l == label.as_str())
    }

    pub fn is_online(&self) -> bool {
        self.status == WorkerStatus::Online
    }
}

/// Generic resource tag, encoded per resource kind by the provider layer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Tag {
    /// Parse the `aws-resource-tags` input: a JSON list of `{"Key": .., "Value": ..}`.
    /// Empty input is an empty list.
    pub fn parse_list(raw: &str) -> Result<Vec<Tag>, RunnerError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(raw).map_err(|e| {
            RunnerError::Configuration(format!("aws-resource-tags is not a valid tag list: {}", e))
        })
    }
}

pub const LABEL_LEN: usize = 5;
const LABEL_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random token joining one compute resource to its registered worker.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let token: String = (0..LABEL_LEN)
            .map(|_| LABEL_ALPHABET[rng.gen_range(0..LABEL_ALPHABET.len())] as char)
            .collect();
        Label(token)
    }

    /// Wrap a label carried over from a previous `start` episode.
    pub fn parse(raw: &str) -> Result<Self, RunnerError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RunnerError::Configuration("label is empty".to_string()));
        }
        if raw.chars().any(|c| c.is_whitespace() || c == ',') {
            return Err(RunnerError::Configuration(format!(
                "label '{}' must not contain whitespace or commas",
                raw
            )));
        }
        Ok(Label(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// GitHub repository the runner registers into.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub repo: String,
}

impl Repository {
    /// Parse `owner/repo` (the `GITHUB_REPOSITORY` format).
    pub fn parse(raw: &str) -> Result<Self, RunnerError> {
        let (owner, repo) = raw
            .trim()
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
            .ok_or_else(|| {
                RunnerError::Configuration(format!(
                    "repository '{}' is not in owner/repo form",
                    raw
                ))
            })?;
        Ok(Repository {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Everything needed to acquire one worker. Built once from configuration.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub iam_role_name: Option<String>,
    pub tags: Vec<Tag>,
    pub label: Label,
    pub registration_token: String,
    pub strategy: Strategy,
    pub count: u32,
    pub region: String,
    pub repository: Repository,
}
