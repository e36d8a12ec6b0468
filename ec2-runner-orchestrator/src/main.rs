use anyhow::Result;
use ec2_runner_common::Label;
use ec2_runner_orchestrator::outputs::{report_error, OutputSink};
use ec2_runner_orchestrator::price_oracle::OnDemandPriceTable;
use ec2_runner_orchestrator::provider_manager::ProviderManager;
use ec2_runner_orchestrator::settings::{EnvInputs, Settings};
use ec2_runner_orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        tracing::error!("[ec2-runner] {:#}", e);
        report_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let settings = Settings::load(&EnvInputs).map_err(|e| {
        tracing::error!(code = e.code(), "[ec2-runner] invalid inputs");
        e
    })?;

    match settings {
        Settings::Start(s) => {
            let label = Label::generate();
            let providers = ProviderManager::build(&s.common, &label)?;
            let orchestrator = Orchestrator::new(providers.compute, providers.control_plane, s.prices);
            let sink = OutputSink::from_env();
            let outcome = match orchestrator.start(&s.spec, label).await {
                Ok(outcome) => outcome,
                Err(failure) => {
                    // Let a later stop step release what was already created.
                    if sink.publish_failure(&failure)? {
                        tracing::error!(
                            code = failure.source.code(),
                            "[ec2-runner] start failed after provisioning, outputs published for stop"
                        );
                    }
                    return Err(failure.into());
                }
            };
            sink.publish_start(&outcome)?;
            tracing::debug!("[ec2-runner] start outcome: {}", serde_json::to_string(&outcome)?);
            tracing::info!(
                "[ec2-runner] runner {} is ready on {} ({})",
                outcome.label,
                outcome.result.resource_id(),
                outcome.result.strategy()
            );
        }
        Settings::Stop(s) => {
            let providers = ProviderManager::build(&s.common, &s.label)?;
            let orchestrator =
                Orchestrator::new(providers.compute, providers.control_plane, OnDemandPriceTable::builtin());
            orchestrator.stop(&s.label, &s.result).await?;
            tracing::info!("[ec2-runner] runner {} is released", s.label);
        }
    }
    Ok(())
}
