//! scada-runtime
//!
//! Batch orchestration over trading dates and backfill of missing daily peaks.
//! Everything external (source, registry store, SCADA store) is injected as a
//! trait object, so the same code runs against Postgres and the in-memory
//! testkit.

pub mod backfill;
pub mod orchestrator;

pub use backfill::{Backfill, BackfillSummary};
pub use orchestrator::{
    BatchPeriod, BatchSummary, CancelToken, DateOutcome, Orchestrator, RunOptions, Stage,
    UnitState, YearSummary,
};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Days, NaiveDate};

use scada_config::{IngestSettings, SourceSettings};
use scada_md::aggregate::AggregationConvention;
use scada_md::source::{AemoWemConfig, AemoWemSource, RetryPolicy, RetryingSource, ScadaSource};
use scada_md::store::ScadaStore;
use scada_md::{Channel, MarketCalendar};

/// Typed runtime knobs derived from [`IngestSettings`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub calendar: MarketCalendar,
    pub current_convention: AggregationConvention,
    pub historical_convention: AggregationConvention,
    pub skip_min_buckets: i64,
    pub max_in_flight: usize,
    pub politeness_delay: Duration,
    pub progress_every_days: usize,
    pub persist_summary: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            calendar: MarketCalendar::perth(),
            current_convention: AggregationConvention::Mean,
            historical_convention: AggregationConvention::Mean,
            skip_min_buckets: 40,
            max_in_flight: 1,
            politeness_delay: Duration::from_millis(500),
            progress_every_days: 7,
            persist_summary: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_settings(s: &IngestSettings) -> Result<Self> {
        Ok(Self {
            calendar: MarketCalendar::parse(&s.market.timezone)?,
            current_convention: AggregationConvention::parse(&s.aggregation.current)
                .context("aggregation.current")?,
            historical_convention: AggregationConvention::parse(&s.aggregation.historical)
                .context("aggregation.historical")?,
            skip_min_buckets: i64::from(s.orchestrator.skip_min_buckets),
            max_in_flight: s.orchestrator.max_in_flight.max(1),
            politeness_delay: Duration::from_millis(s.source.politeness_delay_ms),
            progress_every_days: s.orchestrator.progress_every_days as usize,
            persist_summary: s.orchestrator.persist_summary,
        })
    }

    pub fn convention_for(&self, channel: Channel) -> AggregationConvention {
        match channel {
            Channel::Current => self.current_convention,
            Channel::Historical => self.historical_convention,
        }
    }
}

/// The production source: AEMO WEM over HTTP, wrapped in bounded retry only
/// when more than one attempt is configured.
pub fn build_source(s: &SourceSettings) -> Arc<dyn ScadaSource> {
    let source = AemoWemSource::new(AemoWemConfig {
        current_base_url: s.current_base_url.clone(),
        historical_base_url: s.historical_base_url.clone(),
        current_timeout: Duration::from_secs(s.current_timeout_secs),
        historical_timeout: Duration::from_secs(s.historical_timeout_secs),
        current_fallback_patterns: s.current_fallback_patterns.clone(),
    });

    if s.retry.max_attempts > 1 {
        Arc::new(RetryingSource::new(
            source,
            RetryPolicy {
                max_attempts: s.retry.max_attempts,
                backoff: Duration::from_millis(s.retry.backoff_ms),
            },
        ))
    } else {
        Arc::new(source)
    }
}

/// Dates in `start..=end` with no half-hourly rows at all.
pub async fn missing_dates(
    store: &dyn ScadaStore,
    calendar: &MarketCalendar,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NaiveDate>> {
    let all = date_range(start, end)?;
    let present: BTreeSet<NaiveDate> = store
        .dates_with_half_hourly(calendar, start, end)
        .await?
        .into_iter()
        .collect();
    Ok(all.into_iter().filter(|d| !present.contains(d)).collect())
}

// ---------------------------------------------------------------------------
// Date helpers
// ---------------------------------------------------------------------------

/// Inclusive range of calendar dates.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
    if end < start {
        bail!("end date {end} is before start date {start}");
    }
    Ok(start.iter_days().take_while(|d| *d <= end).collect())
}

pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .with_context(|| format!("invalid month {year}-{month:02}"))?;
    let next = first
        .checked_add_months(chrono::Months::new(1))
        .with_context(|| format!("month overflow after {year}-{month:02}"))?;
    let last = next
        .pred_opt()
        .with_context(|| format!("no last day for {year}-{month:02}"))?;
    Ok((first, last))
}

/// `n` days ending the day before `today`.
pub fn days_back(n: u32, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    if n == 0 {
        bail!("days-back must be >= 1");
    }
    let end = today
        .pred_opt()
        .with_context(|| format!("no day before {today}"))?;
    let start = end
        .checked_sub_days(Days::new(u64::from(n - 1)))
        .with_context(|| format!("days-back {n} underflows"))?;
    Ok((start, end))
}

/// `YYYY-MM`.
pub fn parse_year_month(s: &str) -> Result<(i32, u32)> {
    let (y, m) = s
        .trim()
        .split_once('-')
        .with_context(|| format!("expected YYYY-MM, got '{s}'"))?;
    let year: i32 = y.parse().with_context(|| format!("invalid year in '{s}'"))?;
    let month: u32 = m.parse().with_context(|| format!("invalid month in '{s}'"))?;
    month_bounds(year, month)?;
    Ok((year, month))
}
