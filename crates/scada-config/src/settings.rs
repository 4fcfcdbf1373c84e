use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Typed view of the merged configuration.
///
/// Every section and field has a default, so an empty config is a valid
/// production config pointing at the public AEMO WEM endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub source: SourceSettings,
    pub aggregation: AggregationSettings,
    pub market: MarketSettings,
    pub orchestrator: OrchestratorSettings,
    pub store: StoreSettings,
}

impl IngestSettings {
    pub fn validate(&self) -> Result<()> {
        if self.source.current_timeout_secs == 0 || self.source.historical_timeout_secs == 0 {
            bail!("source timeouts must be > 0");
        }
        if self.source.retry.max_attempts == 0 {
            bail!("source.retry.max_attempts must be >= 1 (1 = no retry)");
        }
        if self.orchestrator.max_in_flight == 0 {
            bail!("orchestrator.max_in_flight must be >= 1");
        }
        if self.orchestrator.skip_min_buckets == 0 || self.orchestrator.skip_min_buckets > 48 {
            bail!("orchestrator.skip_min_buckets must be in 1..=48");
        }
        if self.store.upsert_batch_size == 0 {
            bail!("store.upsert_batch_size must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub current_base_url: String,
    pub historical_base_url: String,
    pub current_timeout_secs: u64,
    pub historical_timeout_secs: u64,
    /// Sleep after every network fetch. Politeness only.
    pub politeness_delay_ms: u64,
    /// File-name patterns tried, in order, when the primary current-day URL is 404.
    /// `{date}` expands to `YYYY-MM-DD`, `{compact}` to `YYYYMMDD`.
    pub current_fallback_patterns: Vec<String>,
    pub retry: RetrySettings,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            current_base_url:
                "https://data.wa.aemo.com.au/public/market-data/wemde/facilityScada/current/"
                    .to_string(),
            historical_base_url:
                "https://data.wa.aemo.com.au/public/market-data/wemde/facilityScada/previous/"
                    .to_string(),
            current_timeout_secs: 60,
            historical_timeout_secs: 120,
            politeness_delay_ms: 500,
            current_fallback_patterns: vec![
                "SCADA{compact}.json".to_string(),
                "facilityScada-{compact}.json".to_string(),
                "facilityScada-{date}.json".to_string(),
            ],
            retry: RetrySettings::default(),
        }
    }
}

/// Bounded retry around the source client only. One attempt means no retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 2_000,
        }
    }
}

/// Aggregation convention per delivery channel: `mean` (MW rate) or `sum` (5-minute energy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub current: String,
    pub historical: String,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            current: "mean".to_string(),
            historical: "mean".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    /// IANA zone that defines the trading day.
    pub timezone: String,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            timezone: "Australia/Perth".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Distinct half-hourly buckets already persisted for a date before it is skipped.
    pub skip_min_buckets: u32,
    /// Concurrent date-units. 1 processes dates strictly in order.
    pub max_in_flight: usize,
    pub progress_every_days: u32,
    /// Write each batch summary to the audit table.
    pub persist_summary: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            skip_min_buckets: 40,
            max_in_flight: 1,
            progress_every_days: 7,
            persist_summary: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub upsert_batch_size: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            upsert_batch_size: 1_000,
        }
    }
}
