use crate::sigv4::{self, Credentials};
use crate::tags::TagSpecification;
use crate::{inventory, ComputeProvider};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;

const EC2_API_VERSION: &str = "2016-11-15";
const SPOT_PLATFORM: &str = "Linux/UNIX";

/// Polling budget for `wait_until_running`. Defaults mirror the SDK's
/// `instanceRunning` waiter: 40 checks, 15 s apart.
#[derive(Clone, Copy, Debug)]
pub struct RunningWaiter {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RunningWaiter {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_attempts: 40,
        }
    }
}

pub struct Ec2Provider {
    client: Client,
    region: String,
    endpoint: String,
    credentials: Credentials,
    waiter: RunningWaiter,
}

impl Ec2Provider {
    pub fn new(region: String, credentials: Credentials) -> Result<Self> {
        // No overall timeout by default in reqwest: a stalled EC2 call would hang the episode.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        let region = region.trim().to_string();
        let endpoint = format!("https://ec2.{}.amazonaws.com/", region);
        Ok(Self {
            client,
            region,
            endpoint,
            credentials,
            waiter: RunningWaiter::default(),
        })
    }

    /// Point at a different endpoint (VPC endpoint, LocalStack).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn host(&self) -> String {
        self.endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    }

    async fn call(&self, action: &str, mut params: Vec<(String, String)>) -> Result<String> {
        params.insert(0, ("Action".to_string(), action.to_string()));
        params.insert(1, ("Version".to_string(), EC2_API_VERSION.to_string()));
        let body = sigv4::form_body(&params);
        let signed = sigv4::sign(
            &self.credentials,
            &self.region,
            "ec2",
            &self.host(),
            &body,
            Utc::now(),
        );

        tracing::debug!("[ec2] POST {} action={}", self.endpoint, action);

        let mut req = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, sigv4::FORM_CONTENT_TYPE)
            .header("x-amz-date", &signed.amz_date)
            .header(reqwest::header::AUTHORIZATION, &signed.authorization);
        if let Some(token) = &signed.security_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req.body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = parse_error(&text).unwrap_or_else(|| text.clone());
            tracing::error!("[ec2] {} failed: status={} {}", action, status.as_u16(), detail);
            return Err(anyhow::anyhow!(
                "EC2 {} failed: status={} {}",
                action,
                status.as_u16(),
                detail
            ));
        }
        Ok(resp.text().await?)
    }

    async fn instance_state(&self, instance_id: &str) -> Result<Option<String>> {
        let xml = self
            .call(
                "DescribeInstances",
                vec![("InstanceId.1".to_string(), instance_id.to_string())],
            )
            .await?;
        let parsed: DescribeInstancesResponse = quick_xml::de::from_str(&xml)?;
        Ok(parsed
            .reservation_set
            .items
            .into_iter()
            .flat_map(|r| r.instances_set.items)
            .find(|i| i.instance_id == instance_id)
            .map(|i| i.instance_state.name))
    }
}

#[async_trait]
impl ComputeProvider for Ec2Provider {
    async fn run_instance(&self, spec: &inventory::LaunchSpec) -> Result<String> {
        let mut params = vec![
            ("ImageId".to_string(), spec.image_id.clone()),
            ("InstanceType".to_string(), spec.instance_type.clone()),
            ("MinCount".to_string(), "1".to_string()),
            ("MaxCount".to_string(), "1".to_string()),
            ("UserData".to_string(), spec.user_data.clone()),
            ("SubnetId".to_string(), spec.subnet_id.clone()),
            ("SecurityGroupId.1".to_string(), spec.security_group_id.clone()),
        ];
        if let Some(profile) = &spec.iam_instance_profile {
            params.push(("IamInstanceProfile.Name".to_string(), profile.clone()));
        }
        params.extend(tag_params(&spec.tag_specifications));

        let xml = self.call("RunInstances", params).await?;
        let parsed: RunInstancesResponse = quick_xml::de::from_str(&xml)?;
        let instance_id = parsed
            .instances_set
            .items
            .into_iter()
            .next()
            .map(|i| i.instance_id)
            .ok_or_else(|| anyhow::anyhow!("No instance id in RunInstances response"))?;
        tracing::info!("[ec2] instance {} is started", instance_id);
        Ok(instance_id)
    }

    async fn wait_until_running(&self, instance_id: &str) -> Result<()> {
        for attempt in 1..=self.waiter.max_attempts {
            match self.instance_state(instance_id).await {
                Ok(Some(state)) if state == "running" => {
                    tracing::info!("[ec2] instance {} is up and running", instance_id);
                    return Ok(());
                }
                Ok(Some(state))
                    if matches!(
                        state.as_str(),
                        "shutting-down" | "terminated" | "stopping" | "stopped"
                    ) =>
                {
                    return Err(anyhow::anyhow!(
                        "instance {} entered state '{}' while waiting for running",
                        instance_id,
                        state
                    ));
                }
                Ok(state) => {
                    tracing::debug!(
                        "[ec2] instance {} state={:?} (check {}/{})",
                        instance_id,
                        state,
                        attempt,
                        self.waiter.max_attempts
                    );
                }
                // Freshly created ids can be briefly unknown to DescribeInstances.
                Err(e) if e.to_string().contains("InvalidInstanceID.NotFound") => {
                    tracing::debug!("[ec2] instance {} not visible yet", instance_id);
                }
                Err(e) => return Err(e),
            }
            if attempt < self.waiter.max_attempts {
                sleep(self.waiter.interval).await;
            }
        }
        Err(anyhow::anyhow!(
            "instance {} not running after {} checks",
            instance_id,
            self.waiter.max_attempts
        ))
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        self.call(
            "TerminateInstances",
            vec![("InstanceId.1".to_string(), instance_id.to_string())],
        )
        .await?;
        tracing::info!("[ec2] instance {} is terminated", instance_id);
        Ok(())
    }

    async fn request_spot_instance(
        &self,
        spec: &inventory::LaunchSpec,
        bid_price: &str,
    ) -> Result<String> {
        let mut params = vec![
            ("SpotPrice".to_string(), bid_price.to_string()),
            ("InstanceCount".to_string(), spec.instance_count.to_string()),
            ("Type".to_string(), "one-time".to_string()),
            ("LaunchSpecification.ImageId".to_string(), spec.image_id.clone()),
            (
                "LaunchSpecification.InstanceType".to_string(),
                spec.instance_type.clone(),
            ),
            ("LaunchSpecification.UserData".to_string(), spec.user_data.clone()),
            ("LaunchSpecification.SubnetId".to_string(), spec.subnet_id.clone()),
            (
                "LaunchSpecification.SecurityGroupId.1".to_string(),
                spec.security_group_id.clone(),
            ),
        ];
        if let Some(profile) = &spec.iam_instance_profile {
            params.push((
                "LaunchSpecification.IamInstanceProfile.Name".to_string(),
                profile.clone(),
            ));
        }
        params.extend(tag_params(&spec.tag_specifications));

        let xml = self.call("RequestSpotInstances", params).await?;
        let parsed: SpotRequestsResponse = quick_xml::de::from_str(&xml)?;
        let request_id = parsed
            .spot_instance_request_set
            .items
            .into_iter()
            .next()
            .map(|r| r.spot_instance_request_id)
            .ok_or_else(|| anyhow::anyhow!("No request id in RequestSpotInstances response"))?;
        tracing::info!("[ec2] spot request {} submitted (bid={})", request_id, bid_price);
        Ok(request_id)
    }

    async fn describe_spot_request(&self, request_id: &str) -> Result<inventory::SpotRequest> {
        let xml = self
            .call(
                "DescribeSpotInstanceRequests",
                vec![("SpotInstanceRequestId.1".to_string(), request_id.to_string())],
            )
            .await?;
        let parsed: SpotRequestsResponse = quick_xml::de::from_str(&xml)?;
        let item = parsed
            .spot_instance_request_set
            .items
            .into_iter()
            .find(|r| r.spot_instance_request_id == request_id)
            .ok_or_else(|| anyhow::anyhow!("spot request {} not found", request_id))?;
        Ok(inventory::SpotRequest {
            request_id: item.spot_instance_request_id,
            state: inventory::SpotRequestState::parse(&item.state),
            status_code: item.status.map(|s| s.code),
            instance_id: item.instance_id.filter(|s| !s.is_empty()),
        })
    }

    async fn cancel_spot_request(&self, request_id: &str) -> Result<()> {
        self.call(
            "CancelSpotInstanceRequests",
            vec![("SpotInstanceRequestId.1".to_string(), request_id.to_string())],
        )
        .await?;
        tracing::info!("[ec2] spot request {} is cancelled", request_id);
        Ok(())
    }

    async fn spot_price_history(
        &self,
        instance_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<inventory::SpotPricePoint>> {
        let mut points = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("InstanceType.1".to_string(), instance_type.to_string()),
                ("ProductDescription.1".to_string(), SPOT_PLATFORM.to_string()),
                (
                    "StartTime".to_string(),
                    since.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
            ];
            if let Some(token) = &next_token {
                params.push(("NextToken".to_string(), token.clone()));
            }
            let xml = self.call("DescribeSpotPriceHistory", params).await?;
            let parsed: SpotPriceHistoryResponse = quick_xml::de::from_str(&xml)?;
            points.extend(parsed.spot_price_history_set.items.into_iter().map(|p| {
                inventory::SpotPricePoint {
                    instance_type: p.instance_type,
                    availability_zone: p.availability_zone.unwrap_or_default(),
                    price: p.spot_price,
                    timestamp: p
                        .timestamp
                        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                        .map(|t| t.with_timezone(&Utc)),
                }
            }));
            next_token = parsed.next_token.filter(|t| !t.is_empty());
            if next_token.is_none() {
                break;
            }
        }
        Ok(points)
    }
}

/// Flatten tag specifications into `TagSpecification.N.*` query parameters.
pub fn tag_params(specs: &[TagSpecification]) -> Vec<(String, String)> {
    let mut params = Vec::new();
    for (i, spec) in specs.iter().enumerate() {
        let n = i + 1;
        params.push((
            format!("TagSpecification.{}.ResourceType", n),
            spec.resource_type.as_str().to_string(),
        ));
        for (j, tag) in spec.tags.iter().enumerate() {
            let m = j + 1;
            params.push((format!("TagSpecification.{}.Tag.{}.Key", n, m), tag.key.clone()));
            params.push((
                format!("TagSpecification.{}.Tag.{}.Value", n, m),
                tag.value.clone(),
            ));
        }
    }
    params
}

fn parse_error(xml: &str) -> Option<String> {
    let parsed: ErrorResponse = quick_xml::de::from_str(xml).ok()?;
    let err = parsed.errors.error.into_iter().next()?;
    Some(format!("{}: {}", err.code, err.message))
}

// --- EC2 XML responses (only the fields we read) ---

#[derive(Deserialize, Debug)]
struct ItemSet<T> {
    #[serde(rename = "item", default = "Vec::new")]
    items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Deserialize, Debug)]
struct RunInstancesResponse {
    #[serde(rename = "instancesSet", default)]
    instances_set: ItemSet<InstanceItem>,
}

#[derive(Deserialize, Debug)]
struct InstanceItem {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(rename = "instanceState", default)]
    instance_state: InstanceState,
}

#[derive(Deserialize, Debug, Default)]
struct InstanceState {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize, Debug)]
struct DescribeInstancesResponse {
    #[serde(rename = "reservationSet", default)]
    reservation_set: ItemSet<ReservationItem>,
}

#[derive(Deserialize, Debug)]
struct ReservationItem {
    #[serde(rename = "instancesSet", default)]
    instances_set: ItemSet<InstanceItem>,
}

#[derive(Deserialize, Debug)]
struct SpotRequestsResponse {
    #[serde(rename = "spotInstanceRequestSet", default)]
    spot_instance_request_set: ItemSet<SpotRequestItem>,
}

#[derive(Deserialize, Debug)]
struct SpotRequestItem {
    #[serde(rename = "spotInstanceRequestId")]
    spot_instance_request_id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: Option<SpotStatus>,
    #[serde(rename = "instanceId", default)]
    instance_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SpotStatus {
    #[serde(default)]
    code: String,
}

#[derive(Deserialize, Debug)]
struct SpotPriceHistoryResponse {
    #[serde(rename = "spotPriceHistorySet", default)]
    spot_price_history_set: ItemSet<SpotPriceItem>,
    #[serde(rename = "nextToken", default)]
    next_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SpotPriceItem {
    #[serde(rename = "instanceType")]
    instance_type: String,
    #[serde(rename = "spotPrice")]
    spot_price: String,
    #[serde(rename = "availabilityZone", default)]
    availability_zone: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorResponse {
    #[serde(rename = "Errors")]
    errors: ErrorList,
}

#[derive(Deserialize, Debug)]
struct ErrorList {
    #[serde(rename = "Error", default)]
    error: Vec<ErrorItem>,
}

#[derive(Deserialize, Debug)]
struct ErrorItem {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}
