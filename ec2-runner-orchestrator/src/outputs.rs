use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use ec2_runner_common::{Label, ProvisionResult};

use crate::services::{StartFailure, StartOutcome};

/// Sink for step outputs.
pub enum OutputSink {
    /// Append `name=value` lines to the file named by `GITHUB_OUTPUT`.
    File(PathBuf),
    /// Legacy `::set-output` workflow commands on stdout.
    Stdout,
}

impl OutputSink {
    pub fn from_env() -> Self {
        match std::env::var("GITHUB_OUTPUT") {
            Ok(path) if !path.trim().is_empty() => OutputSink::File(PathBuf::from(path.trim())),
            _ => OutputSink::Stdout,
        }
    }

    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        match self {
            OutputSink::File(path) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening output file {}", path.display()))?;
                writeln!(file, "{}={}", name, value)
                    .with_context(|| format!("writing output '{}' to {}", name, path.display()))?;
            }
            OutputSink::Stdout => println!("::set-output name={}::{}", name, value),
        }
        tracing::info!("[outputs] {}={}", name, value);
        Ok(())
    }

    /// Publish `label`, `ec2-instance-id` and `runner-type`.
    pub fn publish_resource(&self, label: &Label, result: &ProvisionResult) -> Result<()> {
        self.set("label", label.as_str())?;
        self.set("ec2-instance-id", result.resource_id())?;
        self.set("runner-type", result.strategy().as_str())?;
        Ok(())
    }

    pub fn publish_start(&self, outcome: &StartOutcome) -> Result<()> {
        self.publish_resource(&outcome.label, &outcome.result)
    }

    /// Publish whatever a failed start left behind. Returns whether anything was written.
    pub fn publish_failure(&self, failure: &StartFailure) -> Result<bool> {
        match &failure.result {
            Some(result) => {
                self.publish_resource(&failure.label, result)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Report a fatal error as a workflow command.
pub fn report_error(message: &str) {
    println!("::error::{}", message.replace('\n', "%0A"));
}
