use ec2_runner_common::{Label, ProvisionResult, Repository, RunnerError, Strategy, Tag};
use std::collections::HashMap;
use std::env;
use std::fs;

use crate::price_oracle::OnDemandPriceTable;
use crate::services::StartSpec;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Where action inputs and process environment come from.
pub trait InputSource {
    /// Action input by its declared name (`github-token`, `ec2-image-id`, ...).
    fn input(&self, name: &str) -> Option<String>;

    /// Raw environment variable.
    fn var(&self, name: &str) -> Option<String>;
}

/// `INPUT_<NAME>` variables, the way the Actions runner passes inputs.
pub struct EnvInputs;

pub fn input_var_name(name: &str) -> String {
    format!("INPUT_{}", name.trim().replace(' ', "_").to_uppercase())
}

impl InputSource for EnvInputs {
    fn input(&self, name: &str) -> Option<String> {
        env::var(input_var_name(name)).ok()
    }

    fn var(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }
}

/// Fixed inputs, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MapInputs {
    pub inputs: HashMap<String, String>,
    pub vars: HashMap<String, String>,
}

impl MapInputs {
    pub fn with_input(mut self, name: &str, value: &str) -> Self {
        self.inputs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }
}

impl InputSource for MapInputs {
    fn input(&self, name: &str) -> Option<String> {
        self.inputs.get(name).cloned()
    }

    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Aws,
    Mock,
}

impl ProviderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "aws" | "ec2" => Some(ProviderKind::Aws),
            "mock" => Some(ProviderKind::Mock),
            _ => None,
        }
    }
}

/// Settings shared by both modes.
#[derive(Debug, Clone)]
pub struct CommonSettings {
    pub repository: Repository,
    pub github_token: String,
    pub region: String,
    pub provider: ProviderKind,
}

#[derive(Debug, Clone)]
pub struct StartSettings {
    pub common: CommonSettings,
    pub spec: StartSpec,
    pub prices: OnDemandPriceTable,
}

#[derive(Debug, Clone)]
pub struct StopSettings {
    pub common: CommonSettings,
    pub label: Label,
    pub result: ProvisionResult,
}

#[derive(Debug, Clone)]
pub enum Settings {
    Start(StartSettings),
    Stop(StopSettings),
}

impl Settings {
    pub fn common(&self) -> &CommonSettings {
        match self {
            Settings::Start(s) => &s.common,
            Settings::Stop(s) => &s.common,
        }
    }

    /// Read and validate every input. No remote call is made.
    pub fn load(source: &dyn InputSource) -> Result<Settings, RunnerError> {
        let mode = required(source, "mode")?;
        let common = load_common(source)?;
        match mode.to_ascii_lowercase().as_str() {
            "start" => load_start(source, common).map(Settings::Start),
            "stop" => load_stop(source, common).map(Settings::Stop),
            other => Err(RunnerError::Configuration(format!(
                "wrong mode '{}', allowed values: start, stop",
                other
            ))),
        }
    }
}

fn optional(source: &dyn InputSource, name: &str) -> Option<String> {
    source
        .input(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(source: &dyn InputSource, name: &str) -> Result<String, RunnerError> {
    optional(source, name).ok_or_else(|| RunnerError::Configuration(format!("input '{}' is required", name)))
}

fn load_common(source: &dyn InputSource) -> Result<CommonSettings, RunnerError> {
    let github_token = required(source, "github-token")?;
    let repository = source
        .var("GITHUB_REPOSITORY")
        .ok_or_else(|| RunnerError::Configuration("GITHUB_REPOSITORY is not set".to_string()))
        .and_then(|r| Repository::parse(&r))?;
    let region = optional(source, "region")
        .or_else(|| source.var("AWS_REGION").filter(|v| !v.trim().is_empty()))
        .or_else(|| source.var("AWS_DEFAULT_REGION").filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    let provider_raw = optional(source, "provider").unwrap_or_default();
    let provider = ProviderKind::parse(&provider_raw).ok_or_else(|| {
        RunnerError::Configuration(format!(
            "wrong provider '{}', allowed values: aws, mock",
            provider_raw
        ))
    })?;
    Ok(CommonSettings {
        repository,
        github_token,
        region: region.trim().to_string(),
        provider,
    })
}

fn runner_type(source: &dyn InputSource) -> Result<Strategy, RunnerError> {
    let raw = optional(source, "runner-type").unwrap_or_default();
    Strategy::parse(&raw).ok_or_else(|| {
        RunnerError::Configuration(format!(
            "wrong runner-type '{}', allowed values: ondemand, spot",
            raw
        ))
    })
}

fn load_start(source: &dyn InputSource, common: CommonSettings) -> Result<StartSettings, RunnerError> {
    let image_id = required(source, "ec2-image-id")?;
    let instance_type = required(source, "ec2-instance-type")?;
    let subnet_id = required(source, "subnet-id")?;
    let security_group_id = required(source, "security-group-id")?;
    let iam_role_name = optional(source, "iam-role-name");
    let tags = match optional(source, "aws-resource-tags") {
        Some(raw) => Tag::parse_list(&raw)?,
        None => Vec::new(),
    };
    let strategy = runner_type(source)?;
    let count = match optional(source, "count") {
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|c| *c >= 1)
            .ok_or_else(|| RunnerError::Configuration(format!("count '{}' is not a positive integer", raw)))?,
        None => 1,
    };
    let prices = match optional(source, "on-demand-price-table") {
        Some(path) => {
            let raw = fs::read_to_string(&path).map_err(|e| {
                RunnerError::Configuration(format!("cannot read on-demand price table {}: {}", path, e))
            })?;
            OnDemandPriceTable::from_json(&raw)?
        }
        None => OnDemandPriceTable::builtin(),
    };

    Ok(StartSettings {
        spec: StartSpec {
            image_id,
            instance_type,
            subnet_id,
            security_group_id,
            iam_role_name,
            tags,
            strategy,
            count,
            region: common.region.clone(),
        },
        common,
        prices,
    })
}

fn load_stop(source: &dyn InputSource, common: CommonSettings) -> Result<StopSettings, RunnerError> {
    let label = Label::parse(&required(source, "label")?)?;
    let resource_id = required(source, "ec2-instance-id")?;
    let strategy = runner_type(source)?;
    let result = ProvisionResult::from_parts(strategy, &resource_id)?;
    Ok(StopSettings { common, label, result })
}
