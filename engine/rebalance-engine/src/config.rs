use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Configuration for one product's rebalance cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Run the weekly cycle at all
    pub enabled: bool,

    /// Day of the week the cycle runs (UTC), e.g. "Mon"
    pub weekday: String,

    /// Time of day the cycle runs (UTC), "HH:MM"
    pub time_utc: String,

    /// Collateral base per index token added on top of the measured growth
    pub collateral_base: f64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weekday: "Mon".to_string(),
            time_utc: "00:00".to_string(),
            collateral_base: 100.0,
        }
    }
}

impl RebalanceConfig {
    pub fn weekday(&self) -> Result<Weekday, String> {
        self.weekday
            .parse::<Weekday>()
            .map_err(|_| format!("Invalid rebalance weekday: {}", self.weekday))
    }

    pub fn time_utc(&self) -> Result<NaiveTime, String> {
        NaiveTime::parse_from_str(&self.time_utc, "%H:%M")
            .map_err(|e| format!("Invalid rebalance time '{}': {}", self.time_utc, e))
    }

    pub fn validate(&self) -> Result<(), String> {
        self.weekday()?;
        self.time_utc()?;

        if !self.collateral_base.is_finite() || self.collateral_base < 0.0 {
            return Err("Collateral base must be a non-negative number".to_string());
        }

        Ok(())
    }
}
