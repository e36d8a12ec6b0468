use thiserror::Error;

/// Failure modes of a start or stop episode.
///
/// Everything except `SpotPollSoftTimeout` is fatal for the operation that
/// raised it and bubbles to the caller unmodified.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A required input is missing or malformed. No remote call was made.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A one-shot query (prices, registration token, runner listing) failed.
    #[error("remote query failed: {0}")]
    RemoteQuery(String),

    /// The create call was rejected, or the spot request ended in a terminal state.
    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),

    /// The on-demand instance never reached `running`.
    #[error("instance {instance_id} did not reach the running state: {reason}")]
    ProvisioningTimeout { instance_id: String, reason: String },

    /// The spot request never became `active` within the poll budget.
    /// Logged by the provisioner, never returned from `start`.
    #[error("spot request {request_id} is not active after {attempts} checks")]
    SpotPollSoftTimeout { request_id: String, attempts: u32 },

    #[error(
        "A timeout of {minutes} minutes is exceeded. Your AWS EC2 instance was not able to register itself in GitHub as a new self-hosted runner."
    )]
    RegistrationTimeout { minutes: u64 },

    /// Termination, cancellation or deregistration call failed.
    #[error("teardown failed: {0}")]
    Teardown(String),
}

impl RunnerError {
    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::Configuration(_) => "CONFIGURATION_ERROR",
            RunnerError::RemoteQuery(_) => "REMOTE_QUERY_ERROR",
            RunnerError::ProvisioningFailed(_) => "PROVISIONING_FAILED",
            RunnerError::ProvisioningTimeout { .. } => "PROVISIONING_TIMEOUT",
            RunnerError::SpotPollSoftTimeout { .. } => "SPOT_POLL_SOFT_TIMEOUT",
            RunnerError::RegistrationTimeout { .. } => "REGISTRATION_TIMEOUT",
            RunnerError::Teardown(_) => "TEARDOWN_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_timeout_mentions_minutes() {
        let msg = RunnerError::RegistrationTimeout { minutes: 5 }.to_string();
        assert!(msg.contains("5 minutes"), "{}", msg);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(RunnerError::Configuration("x".into()).code(), "CONFIGURATION_ERROR");
        assert_eq!(
            RunnerError::SpotPollSoftTimeout {
                request_id: "sir-1".into(),
                attempts: 10
            }
            .code(),
            "SPOT_POLL_SOFT_TIMEOUT"
        );
        assert_eq!(RunnerError::Teardown("boom".into()).code(), "TEARDOWN_ERROR");
    }
}
