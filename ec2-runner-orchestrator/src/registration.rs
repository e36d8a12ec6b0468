use ec2_runner_common::{Label, RunnerError, Worker};
use ec2_runner_providers::ControlPlane;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::logger;

#[derive(Debug, Clone, Copy)]
pub struct RegistrationPolicy {
    /// Initial wait before the first poll, while the instance boots.
    pub quiet_period: Duration,
    pub interval: Duration,
    pub timeout_minutes: u64,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_secs(30),
            interval: Duration::from_secs(10),
            timeout_minutes: 5,
        }
    }
}

impl RegistrationPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    /// Polls allowed within the timeout, at least one.
    pub fn max_polls(&self) -> u32 {
        let interval = self.interval.as_secs().max(1);
        ((self.timeout().as_secs() / interval) as u32).max(1)
    }
}

/// Result of a single lookup. Failures are reported, never raised.
#[derive(Debug, Clone)]
pub enum WorkerLookup {
    Found(Worker),
    NotFound,
    QueryFailed(String),
}

pub struct RegistrationWaiter<'a> {
    control_plane: &'a dyn ControlPlane,
    policy: RegistrationPolicy,
}

impl<'a> RegistrationWaiter<'a> {
    pub fn new(control_plane: &'a dyn ControlPlane, policy: RegistrationPolicy) -> Self {
        Self {
            control_plane,
            policy,
        }
    }

    /// Find the worker carrying `label`.
    pub async fn find_worker(&self, label: &Label) -> WorkerLookup {
        match self.control_plane.list_workers().await {
            Ok(workers) => match workers.into_iter().find(|w| w.has_label(label)) {
                Some(w) => WorkerLookup::Found(w),
                None => WorkerLookup::NotFound,
            },
            Err(e) => {
                tracing::warn!(
                    "[registration] listing runners for {} failed: {}",
                    self.control_plane.repository(),
                    e
                );
                WorkerLookup::QueryFailed(e.to_string())
            }
        }
    }

    /// Wait until the worker with `label` is online.
    pub async fn await_registration(&self, label: &Label) -> Result<Worker, RunnerError> {
        let policy = self.policy;
        let max_polls = policy.max_polls();
        let log = logger::log_event_with_metadata(
            "AWAIT_REGISTRATION",
            label.as_str(),
            Some(serde_json::json!({
                "repository": self.control_plane.repository().to_string(),
                "timeout_minutes": policy.timeout_minutes,
                "max_polls": max_polls,
            })),
        );

        tracing::info!(
            "[registration] waiting {}s before polling for runner '{}'",
            policy.quiet_period.as_secs(),
            label
        );
        sleep(policy.quiet_period).await;

        let deadline = Instant::now() + policy.timeout();
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.find_worker(label).await {
                WorkerLookup::Found(worker) if worker.is_online() => {
                    tracing::info!(
                        "[registration] runner {} (id={}) is online after {} polls",
                        worker.name,
                        worker.id,
                        polls
                    );
                    log.success();
                    return Ok(worker);
                }
                WorkerLookup::Found(worker) => {
                    tracing::info!(
                        "[registration] runner {} is {:?}, poll {}/{}",
                        worker.name,
                        worker.status,
                        polls,
                        max_polls
                    );
                }
                WorkerLookup::NotFound => {
                    tracing::info!(
                        "[registration] runner '{}' not registered yet, poll {}/{}",
                        label,
                        polls,
                        max_polls
                    );
                }
                WorkerLookup::QueryFailed(_) => {}
            }

            if polls >= max_polls || Instant::now() >= deadline {
                break;
            }
            sleep(policy.interval).await;
        }

        let err = RunnerError::RegistrationTimeout {
            minutes: policy.timeout_minutes,
        };
        log.failed(&err.to_string());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec2_runner_common::{Repository, WorkerStatus};
    use ec2_runner_providers::mock::{ListOutcome, MockControlPlane};

    fn worker(id: u64, label: &str, status: WorkerStatus) -> Worker {
        Worker {
            id,
            name: format!("ip-10-0-0-{}", id),
            status,
            labels: vec!["self-hosted".into(), "linux".into(), label.into()],
        }
    }

    fn repo() -> Repository {
        Repository::parse("acme/widgets").unwrap()
    }

    #[test]
    fn default_policy_allows_thirty_polls() {
        assert_eq!(RegistrationPolicy::default().max_polls(), 30);
    }

    #[tokio::test]
    async fn find_worker_by_label() {
        let cp = MockControlPlane::new(repo()).with_workers(vec![
            worker(1, "aaaaa", WorkerStatus::Online),
            worker(2, "bbbbb", WorkerStatus::Offline),
        ]);
        let waiter = RegistrationWaiter::new(&cp, RegistrationPolicy::default());
        match waiter.find_worker(&Label::parse("bbbbb").unwrap()).await {
            WorkerLookup::Found(w) => assert_eq!(w.id, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            waiter.find_worker(&Label::parse("zzzzz").unwrap()).await,
            WorkerLookup::NotFound
        ));
    }

    #[tokio::test]
    async fn find_worker_reports_query_failure() {
        let cp = MockControlPlane::new(repo()).with_list_script(vec![ListOutcome::Error("502".into())]);
        let waiter = RegistrationWaiter::new(&cp, RegistrationPolicy::default());
        assert!(matches!(
            waiter.find_worker(&Label::parse("aaaaa").unwrap()).await,
            WorkerLookup::QueryFailed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn online_on_third_poll() {
        let label = Label::parse("k3x9q").unwrap();
        let cp = MockControlPlane::new(repo())
            .with_list_script(vec![
                ListOutcome::Workers(vec![]),
                ListOutcome::Workers(vec![worker(7, "k3x9q", WorkerStatus::Offline)]),
            ])
            .with_workers(vec![worker(7, "k3x9q", WorkerStatus::Online)]);
        let waiter = RegistrationWaiter::new(&cp, RegistrationPolicy::default());
        let started = Instant::now();
        let w = waiter.await_registration(&label).await.unwrap();
        assert_eq!(w.id, 7);
        assert_eq!(cp.list_calls(), 3);
        // Quiet period, then two intervals between three polls.
        assert!(started.elapsed() >= Duration::from_secs(50));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn query_failures_do_not_abort_polling() {
        let label = Label::parse("k3x9q").unwrap();
        let cp = MockControlPlane::new(repo())
            .with_list_script(vec![
                ListOutcome::Error("rate limited".into()),
                ListOutcome::Error("rate limited".into()),
            ])
            .with_workers(vec![worker(7, "k3x9q", WorkerStatus::Online)]);
        let waiter = RegistrationWaiter::new(&cp, RegistrationPolicy::default());
        assert!(waiter.await_registration(&label).await.is_ok());
        assert_eq!(cp.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_registers_times_out_after_thirty_polls() {
        let label = Label::parse("k3x9q").unwrap();
        let cp = MockControlPlane::new(repo());
        let waiter = RegistrationWaiter::new(&cp, RegistrationPolicy::default());
        let err = waiter.await_registration(&label).await.unwrap_err();
        assert!(matches!(err, RunnerError::RegistrationTimeout { minutes: 5 }));
        assert!(err.to_string().starts_with("A timeout of 5 minutes is exceeded."));
        assert_eq!(cp.list_calls(), 30);
    }
}
