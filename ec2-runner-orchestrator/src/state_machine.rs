use std::fmt;

/// Phases of a `start` episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    Init,
    TokenAcquired,
    PriceCompared,
    Provisioned,
    Confirmed,
}

impl StartPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartPhase::Init => "init",
            StartPhase::TokenAcquired => "token_acquired",
            StartPhase::PriceCompared => "price_compared",
            StartPhase::Provisioned => "provisioned",
            StartPhase::Confirmed => "confirmed",
        }
    }

    /// Whether `self -> next` is a legal step. PriceCompared is only visited in spot mode.
    pub fn can_advance_to(&self, next: StartPhase) -> bool {
        matches!(
            (self, next),
            (StartPhase::Init, StartPhase::TokenAcquired)
                | (StartPhase::TokenAcquired, StartPhase::PriceCompared)
                | (StartPhase::TokenAcquired, StartPhase::Provisioned)
                | (StartPhase::PriceCompared, StartPhase::Provisioned)
                | (StartPhase::Provisioned, StartPhase::Confirmed)
        )
    }
}

/// Phases of one provisioning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionPhase {
    Requested,
    Pending,
    Running,
    Failed,
}

impl ProvisionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionPhase::Requested => "requested",
            ProvisionPhase::Pending => "pending",
            ProvisionPhase::Running => "running",
            ProvisionPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisionPhase::Running | ProvisionPhase::Failed)
    }

    pub fn can_advance_to(&self, next: ProvisionPhase) -> bool {
        matches!(
            (self, next),
            (ProvisionPhase::Requested, ProvisionPhase::Pending)
                | (ProvisionPhase::Requested, ProvisionPhase::Failed)
                | (ProvisionPhase::Pending, ProvisionPhase::Running)
                | (ProvisionPhase::Pending, ProvisionPhase::Failed)
        )
    }
}

impl fmt::Display for StartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ProvisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record a state transition.
fn log_state_transition(scope: &str, label: &str, from_status: &str, to_status: &str, reason: &str) {
    tracing::info!(
        scope,
        label,
        from = from_status,
        to = to_status,
        reason,
        "[state_machine] {}: {} -> {}",
        scope,
        from_status,
        to_status
    );
}

/// Tracks the current phase of a start episode and logs every move.
#[derive(Debug)]
pub struct StartEpisode {
    label: String,
    phase: StartPhase,
}

impl StartEpisode {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            phase: StartPhase::Init,
        }
    }

    pub fn phase(&self) -> StartPhase {
        self.phase
    }

    /// Move to `next`. Illegal moves are logged and ignored (returns false).
    pub fn advance(&mut self, next: StartPhase, reason: &str) -> bool {
        if !self.phase.can_advance_to(next) {
            tracing::warn!(
                "[state_machine] start: ignoring illegal transition {} -> {} (label={})",
                self.phase,
                next,
                self.label
            );
            return false;
        }
        log_state_transition("start", &self.label, self.phase.as_str(), next.as_str(), reason);
        self.phase = next;
        true
    }
}

/// Tracks one provisioning attempt.
#[derive(Debug)]
pub struct ProvisionAttempt {
    resource_id: String,
    phase: ProvisionPhase,
}

impl ProvisionAttempt {
    pub fn new(resource_id: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            phase: ProvisionPhase::Requested,
        }
    }

    pub fn phase(&self) -> ProvisionPhase {
        self.phase
    }

    pub fn advance(&mut self, next: ProvisionPhase, reason: &str) -> bool {
        if self.phase == next {
            return true;
        }
        if !self.phase.can_advance_to(next) {
            tracing::warn!(
                "[state_machine] provision: ignoring illegal transition {} -> {} ({})",
                self.phase,
                next,
                self.resource_id
            );
            return false;
        }
        log_state_transition(
            "provision",
            &self.resource_id,
            self.phase.as_str(),
            next.as_str(),
            reason,
        );
        self.phase = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_path_with_and_without_price_comparison() {
        let mut spot = StartEpisode::new("abcde");
        assert!(spot.advance(StartPhase::TokenAcquired, "token"));
        assert!(spot.advance(StartPhase::PriceCompared, "spot mode"));
        assert!(spot.advance(StartPhase::Provisioned, "spot"));
        assert!(spot.advance(StartPhase::Confirmed, "online"));

        let mut on_demand = StartEpisode::new("abcde");
        assert!(on_demand.advance(StartPhase::TokenAcquired, "token"));
        assert!(on_demand.advance(StartPhase::Provisioned, "ondemand"));
        assert_eq!(on_demand.phase(), StartPhase::Provisioned);
    }

    #[test]
    fn start_rejects_skipping_token() {
        let mut ep = StartEpisode::new("abcde");
        assert!(!ep.advance(StartPhase::Provisioned, "too early"));
        assert_eq!(ep.phase(), StartPhase::Init);
    }

    #[test]
    fn provision_terminal_states() {
        let mut a = ProvisionAttempt::new("i-1");
        assert!(a.advance(ProvisionPhase::Pending, "created"));
        assert!(a.advance(ProvisionPhase::Pending, "still pending"));
        assert!(a.advance(ProvisionPhase::Running, "running"));
        assert!(a.phase().is_terminal());
        assert!(!a.advance(ProvisionPhase::Failed, "too late"));

        let mut b = ProvisionAttempt::new("sir-1");
        assert!(b.advance(ProvisionPhase::Failed, "rejected"));
        assert!(!b.advance(ProvisionPhase::Running, "no"));
    }
}
