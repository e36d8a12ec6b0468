use std::time::Instant;
use uuid::Uuid;

/// An in-flight action (provision, await, teardown) whose completion is
/// logged with its duration under the same id.
pub struct ActionLog {
    pub id: Uuid,
    action_type: &'static str,
    started: Instant,
}

/// Log the start of an action.
pub fn log_event(action_type: &'static str, label: &str) -> ActionLog {
    log_event_with_metadata(action_type, label, None)
}

/// Log the start of an action with metadata (context info)
pub fn log_event_with_metadata(
    action_type: &'static str,
    label: &str,
    metadata: Option<serde_json::Value>,
) -> ActionLog {
    let id = Uuid::new_v4();
    match metadata {
        Some(m) => tracing::info!(
            log_id = %id,
            action = action_type,
            label,
            status = "in_progress",
            metadata = %m,
            "[ec2-runner] {}", action_type
        ),
        None => tracing::info!(
            log_id = %id,
            action = action_type,
            label,
            status = "in_progress",
            "[ec2-runner] {}", action_type
        ),
    }
    ActionLog {
        id,
        action_type,
        started: Instant::now(),
    }
}

impl ActionLog {
    pub fn duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Log completion with duration
    pub fn complete(self, status: &str, error_message: Option<&str>) {
        let duration_ms = self.duration_ms();
        match error_message {
            Some(err) => tracing::error!(
                log_id = %self.id,
                action = self.action_type,
                status,
                duration_ms,
                error = err,
                "[ec2-runner] {} {}", self.action_type, status
            ),
            None => tracing::info!(
                log_id = %self.id,
                action = self.action_type,
                status,
                duration_ms,
                "[ec2-runner] {} {}", self.action_type, status
            ),
        }
    }

    pub fn success(self) {
        self.complete("success", None)
    }

    pub fn failed(self, error_message: &str) {
        self.complete("failed", Some(error_message))
    }

    /// Close from an operation's result.
    pub fn finish<T, E: std::fmt::Display>(self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.success(),
            Err(e) => self.failed(&e.to_string()),
        }
    }
}

/// Quick log for one-off events (like skipped steps)
pub fn log_quick(action_type: &'static str, label: &str, details: Option<&str>) {
    tracing::info!(
        action = action_type,
        label,
        status = "success",
        details = details.unwrap_or(""),
        "[ec2-runner] {}", action_type
    );
}
