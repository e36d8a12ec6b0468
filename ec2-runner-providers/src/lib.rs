use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ec2_runner_common::{Repository, Worker};

pub mod boot_script;
pub mod tags;

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Launch exactly one on-demand instance. Returns the instance id.
    async fn run_instance(&self, spec: &inventory::LaunchSpec) -> Result<String>;

    /// Block until the instance reports `running`.
    /// Implementations own the polling budget; exhausting it is an error.
    async fn wait_until_running(&self, instance_id: &str) -> Result<()>;

    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;

    /// Submit a one-time spot request. Returns the spot request id.
    async fn request_spot_instance(
        &self,
        spec: &inventory::LaunchSpec,
        bid_price: &str,
    ) -> Result<String>;

    async fn describe_spot_request(&self, request_id: &str) -> Result<inventory::SpotRequest>;

    async fn cancel_spot_request(&self, request_id: &str) -> Result<()>;

    /// Spot prices for the class since `since`, Linux/UNIX platform, all zones of the region.
    async fn spot_price_history(
        &self,
        instance_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<inventory::SpotPricePoint>>;
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    fn repository(&self) -> &Repository;

    /// Short-lived token a new runner uses to register itself.
    async fn registration_token(&self) -> Result<String>;

    /// All self-hosted runners of the repository (every page).
    async fn list_workers(&self) -> Result<Vec<Worker>>;

    async fn delete_worker(&self, worker_id: u64) -> Result<()>;
}

pub mod inventory {
    use crate::tags::TagSpecification;
    use chrono::{DateTime, Utc};

    /// Launch parameters shared by the on-demand and spot paths.
    #[derive(Clone, Debug, PartialEq)]
    pub struct LaunchSpec {
        pub image_id: String,
        pub instance_type: String,
        pub subnet_id: String,
        pub security_group_id: String,
        pub iam_instance_profile: Option<String>,
        /// Base64-encoded boot script.
        pub user_data: String,
        pub tag_specifications: Vec<TagSpecification>,
        pub instance_count: u32,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct SpotPricePoint {
        pub instance_type: String,
        pub availability_zone: String,
        /// Decimal string as the provider returns it.
        pub price: String,
        pub timestamp: Option<DateTime<Utc>>,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum SpotRequestState {
        Open,
        Active,
        Closed,
        Cancelled,
        Failed,
        Unknown(String),
    }

    impl SpotRequestState {
        pub fn parse(raw: &str) -> Self {
            match raw.trim().to_ascii_lowercase().as_str() {
                "open" => SpotRequestState::Open,
                "active" => SpotRequestState::Active,
                "closed" => SpotRequestState::Closed,
                "cancelled" => SpotRequestState::Cancelled,
                "failed" => SpotRequestState::Failed,
                other => SpotRequestState::Unknown(other.to_string()),
            }
        }

        /// States a request never leaves.
        pub fn is_terminal(&self) -> bool {
            matches!(
                self,
                SpotRequestState::Closed | SpotRequestState::Cancelled | SpotRequestState::Failed
            )
        }

        pub fn as_str(&self) -> &str {
            match self {
                SpotRequestState::Open => "open",
                SpotRequestState::Active => "active",
                SpotRequestState::Closed => "closed",
                SpotRequestState::Cancelled => "cancelled",
                SpotRequestState::Failed => "failed",
                SpotRequestState::Unknown(s) => s.as_str(),
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct SpotRequest {
        pub request_id: String,
        pub state: SpotRequestState,
        /// Provider status code, e.g. `fulfilled` or `price-too-low`.
        pub status_code: Option<String>,
        /// Instance launched for the request, once fulfilled.
        pub instance_id: Option<String>,
    }
}

#[cfg(feature = "aws")]
pub mod aws;

#[cfg(feature = "aws")]
pub mod sigv4;

#[cfg(feature = "github")]
pub mod github;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(test)]
mod tests {
    use super::inventory::SpotRequestState;

    #[test]
    fn spot_state_parse() {
        assert_eq!(SpotRequestState::parse("active"), SpotRequestState::Active);
        assert_eq!(SpotRequestState::parse("OPEN"), SpotRequestState::Open);
        assert!(SpotRequestState::parse("cancelled").is_terminal());
        assert!(!SpotRequestState::parse("open").is_terminal());
        assert_eq!(
            SpotRequestState::parse("weird"),
            SpotRequestState::Unknown("weird".into())
        );
    }
}
