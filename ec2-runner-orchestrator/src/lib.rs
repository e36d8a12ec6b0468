//! Provision an ephemeral EC2 instance, register it as a GitHub self-hosted
//! runner, and tear both down afterwards.

pub mod logger;
pub mod outputs;
pub mod price_oracle;
pub mod provider_manager;
pub mod provisioner;
pub mod registration;
pub mod services;
pub mod settings;
pub mod state_machine;
pub mod teardown;

pub use services::{Orchestrator, StartFailure, StartOutcome, StartSpec, Timings};
