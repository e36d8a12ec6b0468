use bigdecimal::BigDecimal;
use chrono::{Duration as ChronoDuration, Utc};
use ec2_runner_common::{RunnerError, Strategy};
use ec2_runner_providers::ComputeProvider;
use std::collections::HashMap;
use std::str::FromStr;

/// Spot history window used for the bid estimate.
pub const SPOT_HISTORY_MINUTES: i64 = 30;

/// Used for classes missing from the table. Only ever a comparison ceiling.
pub const DEFAULT_ON_DEMAND_PRICE: &str = "0.10";

// us-east-1, Linux, USD per hour.
const BUILTIN_ON_DEMAND_PRICES: &[(&str, &str)] = &[
    ("t3.micro", "0.0104"),
    ("t3.small", "0.0208"),
    ("t3.medium", "0.0416"),
    ("t3.large", "0.0832"),
    ("t3.xlarge", "0.1664"),
    ("t3.2xlarge", "0.3328"),
    ("t4g.medium", "0.0336"),
    ("t4g.large", "0.0672"),
    ("m5.large", "0.096"),
    ("m5.xlarge", "0.192"),
    ("m5.2xlarge", "0.384"),
    ("m5.4xlarge", "0.768"),
    ("m6i.large", "0.096"),
    ("m6i.xlarge", "0.192"),
    ("m6g.large", "0.077"),
    ("c5.large", "0.085"),
    ("c5.xlarge", "0.17"),
    ("c5.2xlarge", "0.34"),
    ("c5.4xlarge", "0.68"),
    ("c6i.large", "0.085"),
    ("c6i.xlarge", "0.17"),
    ("c6g.large", "0.068"),
    ("r5.large", "0.126"),
    ("r5.xlarge", "0.252"),
];

/// Immutable class -> on-demand price lookup. Built once, passed by reference.
#[derive(Debug, Clone)]
pub struct OnDemandPriceTable {
    prices: HashMap<String, BigDecimal>,
    default_price: BigDecimal,
}

impl OnDemandPriceTable {
    pub fn from_entries<I, K>(entries: I, default_price: BigDecimal) -> Self
    where
        I: IntoIterator<Item = (K, BigDecimal)>,
        K: Into<String>,
    {
        Self {
            prices: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            default_price,
        }
    }

    pub fn builtin() -> Self {
        let entries = BUILTIN_ON_DEMAND_PRICES.iter().filter_map(|(class, price)| {
            BigDecimal::from_str(price).ok().map(|p| (*class, p))
        });
        Self::from_entries(entries, default_on_demand_price())
    }

    /// Parse a JSON object of `{"<class>": "<price>"}`. Prices may be strings or numbers.
    pub fn from_json(raw: &str) -> Result<Self, RunnerError> {
        let map: HashMap<String, serde_json::Value> = serde_json::from_str(raw).map_err(|e| {
            RunnerError::Configuration(format!("on-demand price table is not a JSON object: {}", e))
        })?;
        let mut prices = HashMap::with_capacity(map.len());
        for (class, value) in map {
            let text = match &value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(RunnerError::Configuration(format!(
                        "on-demand price for '{}' is not a number: {}",
                        class, other
                    )))
                }
            };
            let price = parse_price(&text).map_err(|_| {
                RunnerError::Configuration(format!(
                    "on-demand price for '{}' is not a decimal: {}",
                    class, text
                ))
            })?;
            prices.insert(class, price);
        }
        Ok(Self {
            prices,
            default_price: default_on_demand_price(),
        })
    }

    pub fn price(&self, instance_class: &str) -> BigDecimal {
        self.prices
            .get(instance_class.trim())
            .cloned()
            .unwrap_or_else(|| self.default_price.clone())
    }

    pub fn contains(&self, instance_class: &str) -> bool {
        self.prices.contains_key(instance_class.trim())
    }
}

fn default_on_demand_price() -> BigDecimal {
    // Constant literal, always parses.
    BigDecimal::from_str(DEFAULT_ON_DEMAND_PRICE).unwrap_or_default()
}

pub fn parse_price(raw: &str) -> Result<BigDecimal, bigdecimal::ParseBigDecimalError> {
    BigDecimal::from_str(raw.trim())
}

/// Spot is used only when it is strictly cheaper than on-demand (numeric comparison).
pub fn choose_strategy(spot_price: &BigDecimal, on_demand_price: &BigDecimal) -> Strategy {
    if on_demand_price > spot_price {
        Strategy::Spot
    } else {
        Strategy::OnDemand
    }
}

pub struct PriceOracle<'a> {
    compute: &'a dyn ComputeProvider,
    table: &'a OnDemandPriceTable,
}

impl<'a> PriceOracle<'a> {
    pub fn new(compute: &'a dyn ComputeProvider, table: &'a OnDemandPriceTable) -> Self {
        Self { compute, table }
    }

    /// Highest spot price seen for the class over the last 30 minutes.
    pub async fn current_spot_price(&self, instance_class: &str) -> Result<BigDecimal, RunnerError> {
        let since = Utc::now() - ChronoDuration::minutes(SPOT_HISTORY_MINUTES);
        let history = self
            .compute
            .spot_price_history(instance_class, since)
            .await
            .map_err(|e| {
                RunnerError::RemoteQuery(format!(
                    "spot price history for {}: {}",
                    instance_class, e
                ))
            })?;

        let mut max: Option<BigDecimal> = None;
        for point in &history {
            let price = parse_price(&point.price).map_err(|_| {
                RunnerError::RemoteQuery(format!(
                    "unparsable spot price '{}' for {} in {}",
                    point.price, instance_class, point.availability_zone
                ))
            })?;
            if max.as_ref().map_or(true, |m| price > *m) {
                max = Some(price);
            }
        }

        let max = max.ok_or_else(|| {
            RunnerError::RemoteQuery(format!(
                "no spot price history for {} in the last {} minutes",
                instance_class, SPOT_HISTORY_MINUTES
            ))
        })?;
        tracing::info!("[price_oracle] spot price for {}: {} ({} samples)", instance_class, max, history.len());
        Ok(max)
    }

    pub fn on_demand_price(&self, instance_class: &str) -> BigDecimal {
        if !self.table.contains(instance_class) {
            tracing::warn!(
                "[price_oracle] no on-demand price for {}, using default {}",
                instance_class,
                DEFAULT_ON_DEMAND_PRICE
            );
        }
        self.table.price(instance_class)
    }
}
