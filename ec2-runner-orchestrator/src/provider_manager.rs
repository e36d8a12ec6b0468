use ec2_runner_common::{Label, RunnerError};
use ec2_runner_providers::{ComputeProvider, ControlPlane};
use std::sync::Arc;

use crate::settings::{CommonSettings, ProviderKind};

pub struct Providers {
    pub compute: Arc<dyn ComputeProvider>,
    pub control_plane: Arc<dyn ControlPlane>,
}

pub struct ProviderManager;

impl ProviderManager {
    /// Build both adapters. `label` seeds the mock control plane so dry runs register.
    pub fn build(common: &CommonSettings, label: &Label) -> Result<Providers, RunnerError> {
        match common.provider {
            ProviderKind::Aws => Self::build_remote(common),
            ProviderKind::Mock => Self::build_mock(common, label),
        }
    }

    #[cfg(all(feature = "provider-aws", feature = "provider-github"))]
    fn build_remote(common: &CommonSettings) -> Result<Providers, RunnerError> {
        use ec2_runner_providers::aws::Ec2Provider;
        use ec2_runner_providers::github::GitHubControlPlane;
        use ec2_runner_providers::sigv4::Credentials;

        let access_key_id = non_empty_var("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| RunnerError::Configuration("AWS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_access_key = non_empty_var("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| RunnerError::Configuration("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;
        let credentials = Credentials {
            access_key_id,
            secret_access_key,
            session_token: non_empty_var("AWS_SESSION_TOKEN"),
        };

        let mut compute = Ec2Provider::new(common.region.clone(), credentials)
            .map_err(|e| RunnerError::Configuration(format!("EC2 client: {}", e)))?;
        if let Some(endpoint) = non_empty_var("AWS_ENDPOINT_URL_EC2") {
            compute = compute.with_endpoint(endpoint);
        }

        let mut control_plane = GitHubControlPlane::new(common.github_token.clone(), common.repository.clone())
            .map_err(|e| RunnerError::Configuration(format!("GitHub client: {}", e)))?;
        // Set by the Actions runner, points at GHES when applicable.
        if let Some(api) = non_empty_var("GITHUB_API_URL") {
            control_plane = control_plane.with_api_base(api);
        }

        tracing::info!(
            "[provider_manager] using AWS EC2 in {} and GitHub repository {}",
            common.region,
            common.repository
        );
        Ok(Providers {
            compute: Arc::new(compute),
            control_plane: Arc::new(control_plane),
        })
    }

    #[cfg(not(all(feature = "provider-aws", feature = "provider-github")))]
    fn build_remote(_common: &CommonSettings) -> Result<Providers, RunnerError> {
        Err(RunnerError::Configuration(
            "provider 'aws' requires the provider-aws and provider-github features".to_string(),
        ))
    }

    #[cfg(feature = "provider-mock")]
    fn build_mock(common: &CommonSettings, label: &Label) -> Result<Providers, RunnerError> {
        use ec2_runner_common::{Worker, WorkerStatus};
        use ec2_runner_providers::inventory::SpotRequestState;
        use ec2_runner_providers::mock::{MockCompute, MockControlPlane};

        let compute = MockCompute::new()
            .with_spot_prices(&["0.035", "0.038"])
            .with_spot_states(vec![SpotRequestState::Active])
            .with_spot_instance("i-mockspot");
        let control_plane = MockControlPlane::new(common.repository.clone()).with_workers(vec![Worker {
            id: 1,
            name: format!("mock-{}", label),
            status: WorkerStatus::Online,
            labels: vec!["self-hosted".to_string(), label.to_string()],
        }]);
        tracing::warn!("[provider_manager] using in-memory mock providers, nothing is launched");
        Ok(Providers {
            compute: Arc::new(compute),
            control_plane: Arc::new(control_plane),
        })
    }

    #[cfg(not(feature = "provider-mock"))]
    fn build_mock(_common: &CommonSettings, _label: &Label) -> Result<Providers, RunnerError> {
        Err(RunnerError::Configuration(
            "provider 'mock' requires the provider-mock feature".to_string(),
        ))
    }
}

#[cfg(all(feature = "provider-aws", feature = "provider-github"))]
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
