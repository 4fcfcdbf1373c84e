//! Batch orchestrator over trading dates.
//!
//! One trading date is one unit of work with its own state machine:
//!
//! ```text
//! Pending -> Skipped
//! Pending -> Fetching -> Fetched -> Normalizing -> Aggregating -> Persisting -> Done
//! any non-terminal state -> Failed { stage }
//! Pending -> Cancelled
//! ```
//!
//! Errors never cross units: a failed date is recorded in the batch summary
//! and the next date proceeds. Up to `max_in_flight` units run concurrently;
//! outcomes are re-ordered by date before the summary is built. Cancellation
//! is checked when a unit starts, never inside one.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scada_md::aggregate::{aggregate, collapse_duplicates};
use scada_md::normalizer::Normalizer;
use scada_md::registry::FacilityRegistry;
use scada_md::renewable::peak_share;
use scada_md::source::ScadaSource;
use scada_md::store::{FacilityStore, ScadaStore};
use scada_md::Channel;

use crate::{date_range, days_back, month_bounds, RuntimeConfig};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Batch-level stop flag. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Unit state machine
// ---------------------------------------------------------------------------

/// Pipeline stage a unit failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ExistenceCheck,
    Fetching,
    Normalizing,
    Aggregating,
    Persisting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ExistenceCheck => "existence-check",
            Stage::Fetching => "fetching",
            Stage::Normalizing => "normalizing",
            Stage::Aggregating => "aggregating",
            Stage::Persisting => "persisting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Skipped,
    Fetching,
    Fetched,
    Normalizing,
    Aggregating,
    Persisting,
    Done,
    Failed { stage: Stage },
    Cancelled,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Skipped | UnitState::Done | UnitState::Failed { .. } | UnitState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: UnitState) -> bool {
        use UnitState::*;
        if self.is_terminal() {
            return false;
        }
        if let Failed { .. } = next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Skipped)
                | (Pending, Fetching)
                | (Pending, Cancelled)
                | (Fetching, Fetched)
                | (Fetched, Normalizing)
                | (Normalizing, Aggregating)
                | (Aggregating, Persisting)
                | (Persisting, Done)
        )
    }
}

/// Final result of one date-unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateOutcome {
    pub date: NaiveDate,
    pub state: UnitState,
    /// Rows written, or rows already present when skipped.
    pub records: u64,
    pub incomplete_buckets: u64,
    pub dropped_records: u64,
    /// Repeated `(instant, facility)` samples replaced by a later one.
    pub duplicate_samples: u64,
    pub peak_percentage: Option<f64>,
    pub error: Option<String>,
}

struct DateUnit {
    outcome: DateOutcome,
}

impl DateUnit {
    fn new(date: NaiveDate) -> Self {
        Self {
            outcome: DateOutcome {
                date,
                state: UnitState::Pending,
                records: 0,
                incomplete_buckets: 0,
                dropped_records: 0,
                duplicate_samples: 0,
                peak_percentage: None,
                error: None,
            },
        }
    }

    fn advance(&mut self, next: UnitState) {
        debug_assert!(
            self.outcome.state.can_transition_to(next),
            "illegal unit transition {:?} -> {:?}",
            self.outcome.state,
            next
        );
        tracing::trace!(date = %self.outcome.date, from = ?self.outcome.state, to = ?next, "unit transition");
        self.outcome.state = next;
    }

    fn fail(mut self, stage: Stage, err: anyhow::Error) -> DateOutcome {
        self.advance(UnitState::Failed { stage });
        let msg = format!("{}: {}: {:#}", self.outcome.date, stage.as_str(), err);
        tracing::error!(date = %self.outcome.date, stage = stage.as_str(), error = %format!("{err:#}"), "date failed");
        self.outcome.error = Some(msg);
        self.outcome
    }

    fn finish(self) -> DateOutcome {
        self.outcome
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchPeriod {
    Day { date: NaiveDate },
    Range { start: NaiveDate, end: NaiveDate },
    Month { year: i32, month: u32 },
    Year { year: i32 },
}

impl fmt::Display for BatchPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchPeriod::Day { date } => write!(f, "{date}"),
            BatchPeriod::Range { start, end } => write!(f, "{start}..{end}"),
            BatchPeriod::Month { year, month } => write!(f, "{year}-{month:02}"),
            BatchPeriod::Year { year } => write!(f, "{year}"),
        }
    }
}

/// Operator-facing result of one batch. Built even when every date failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub period: BatchPeriod,
    pub channel: Channel,
    pub forced: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_days: u64,
    pub successful_days: u64,
    pub skipped_days: u64,
    pub failed_days: u64,
    pub cancelled_days: u64,
    pub total_records: u64,
    pub incomplete_buckets: u64,
    pub dropped_records: u64,
    pub placeholders_created: u64,
    /// `"{date}: {stage}: {error}"`, ordered by date.
    pub errors: Vec<String>,
}

impl BatchSummary {
    #[allow(clippy::too_many_arguments)]
    pub fn from_outcomes(
        batch_id: Uuid,
        period: BatchPeriod,
        opts: RunOptions,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcomes: &[DateOutcome],
        placeholders_created: u64,
    ) -> Self {
        let mut s = Self {
            batch_id,
            period,
            channel: opts.channel,
            forced: opts.force,
            started_at,
            finished_at,
            total_days: outcomes.len() as u64,
            successful_days: 0,
            skipped_days: 0,
            failed_days: 0,
            cancelled_days: 0,
            total_records: 0,
            incomplete_buckets: 0,
            dropped_records: 0,
            placeholders_created,
            errors: Vec::new(),
        };

        for o in outcomes {
            match o.state {
                UnitState::Done => s.successful_days += 1,
                UnitState::Skipped => s.skipped_days += 1,
                UnitState::Failed { .. } => s.failed_days += 1,
                UnitState::Cancelled => s.cancelled_days += 1,
                _ => {}
            }
            s.total_records += o.records;
            s.incomplete_buckets += o.incomplete_buckets;
            s.dropped_records += o.dropped_records;
            if let Some(e) = &o.error {
                s.errors.push(e.clone());
            }
        }
        s
    }

    pub fn is_clean(&self) -> bool {
        self.failed_days == 0 && self.cancelled_days == 0
    }

    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = format!(
            "{rule}\n\
             Period: {} ({})\n\
             Total days: {}\n\
             Successful: {}\n\
             Skipped: {}\n\
             Failed: {}\n\
             Cancelled: {}\n\
             Total records: {}\n\
             Incomplete buckets: {}\n",
            self.period,
            self.channel.as_str(),
            self.total_days,
            self.successful_days,
            self.skipped_days,
            self.failed_days,
            self.cancelled_days,
            self.total_records,
            self.incomplete_buckets,
        );
        if !self.errors.is_empty() {
            out.push_str("Errors:\n");
            for e in &self.errors {
                out.push_str("  ");
                out.push_str(e);
                out.push('\n');
            }
        }
        out.push_str(&rule);
        out
    }

    fn log(&self) {
        tracing::info!(
            batch_id = %self.batch_id,
            period = %self.period,
            channel = self.channel.as_str(),
            total_days = self.total_days,
            successful_days = self.successful_days,
            skipped_days = self.skipped_days,
            failed_days = self.failed_days,
            cancelled_days = self.cancelled_days,
            total_records = self.total_records,
            incomplete_buckets = self.incomplete_buckets,
            placeholders_created = self.placeholders_created,
            "batch complete"
        );
    }
}

/// Twelve sequential month batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearSummary {
    pub year: i32,
    pub total_days: u64,
    pub successful_days: u64,
    pub skipped_days: u64,
    pub failed_days: u64,
    pub cancelled_days: u64,
    pub total_records: u64,
    pub months: Vec<BatchSummary>,
}

impl YearSummary {
    pub fn from_months(year: i32, months: Vec<BatchSummary>) -> Self {
        let mut s = Self {
            year,
            total_days: 0,
            successful_days: 0,
            skipped_days: 0,
            failed_days: 0,
            cancelled_days: 0,
            total_records: 0,
            months: Vec::new(),
        };
        for m in &months {
            s.total_days += m.total_days;
            s.successful_days += m.successful_days;
            s.skipped_days += m.skipped_days;
            s.failed_days += m.failed_days;
            s.cancelled_days += m.cancelled_days;
            s.total_records += m.total_records;
        }
        s.months = months;
        s
    }

    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = format!("{rule}\nYear {} summary\n", self.year);
        for m in &self.months {
            out.push_str(&format!(
                "  {}: {}/{} days ok, {} skipped, {} failed, {} records\n",
                m.period,
                m.successful_days,
                m.total_days,
                m.skipped_days,
                m.failed_days,
                m.total_records
            ));
        }
        out.push_str(&format!(
            "Total days: {}\nSuccessful: {}\nSkipped: {}\nFailed: {}\nCancelled: {}\nTotal records: {}\n{rule}",
            self.total_days,
            self.successful_days,
            self.skipped_days,
            self.failed_days,
            self.cancelled_days,
            self.total_records
        ));
        out
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub channel: Channel,
    /// Bypass the existence check and re-ingest.
    pub force: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            channel: Channel::Current,
            force: false,
        }
    }
}

pub struct Orchestrator {
    source: Arc<dyn ScadaSource>,
    store: Arc<dyn ScadaStore>,
    facilities: Arc<dyn FacilityStore>,
    normalizer: Normalizer,
    cfg: RuntimeConfig,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn ScadaSource>,
        store: Arc<dyn ScadaStore>,
        facilities: Arc<dyn FacilityStore>,
        cfg: RuntimeConfig,
    ) -> Self {
        Self {
            source,
            store,
            facilities,
            normalizer: Normalizer::new(cfg.calendar),
            cfg,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn run_date(&self, date: NaiveDate, opts: RunOptions) -> Result<BatchSummary> {
        self.run_dates(BatchPeriod::Day { date }, vec![date], opts)
            .await
    }

    pub async fn run_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        opts: RunOptions,
    ) -> Result<BatchSummary> {
        let dates = date_range(start, end)?;
        self.run_dates(BatchPeriod::Range { start, end }, dates, opts)
            .await
    }

    pub async fn run_month(&self, year: i32, month: u32, opts: RunOptions) -> Result<BatchSummary> {
        let (first, last) = month_bounds(year, month)?;
        let dates = date_range(first, last)?;
        self.run_dates(BatchPeriod::Month { year, month }, dates, opts)
            .await
    }

    /// Twelve month batches, in order. A month's failed dates do not stop the year.
    pub async fn run_year(&self, year: i32, opts: RunOptions) -> Result<YearSummary> {
        let mut months = Vec::with_capacity(12);
        for month in 1..=12 {
            months.push(self.run_month(year, month, opts).await?);
        }
        let summary = YearSummary::from_months(year, months);
        tracing::info!(
            year,
            total_days = summary.total_days,
            successful_days = summary.successful_days,
            skipped_days = summary.skipped_days,
            failed_days = summary.failed_days,
            total_records = summary.total_records,
            "year complete"
        );
        Ok(summary)
    }

    /// The `days` trading dates ending the day before `today`.
    pub async fn run_days_back(
        &self,
        days: u32,
        today: NaiveDate,
        opts: RunOptions,
    ) -> Result<BatchSummary> {
        let (start, end) = days_back(days, today)?;
        self.run_range(start, end, opts).await
    }

    /// Process `dates` and build the summary. Fails only when the facility
    /// registry cannot be loaded, before any date is touched.
    async fn run_dates(
        &self,
        period: BatchPeriod,
        dates: Vec<NaiveDate>,
        opts: RunOptions,
    ) -> Result<BatchSummary> {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();

        let registry = FacilityRegistry::load(self.facilities.clone())
            .await
            .context("batch aborted: facility registry unavailable")?;

        tracing::info!(
            batch_id = %batch_id,
            period = %period,
            days = dates.len(),
            source = self.source.source_name(),
            channel = opts.channel.as_str(),
            force = opts.force,
            max_in_flight = self.cfg.max_in_flight,
            "batch started"
        );

        let registry = &registry;
        let total = dates.len();
        let mut units = stream::iter(dates.into_iter().map(|d| self.run_unit(registry, d, opts)))
            .buffer_unordered(self.cfg.max_in_flight.max(1));

        let mut outcomes: Vec<DateOutcome> = Vec::with_capacity(total);
        let mut records_so_far = 0u64;
        while let Some(outcome) = units.next().await {
            records_so_far += outcome.records;
            outcomes.push(outcome);
            let every = self.cfg.progress_every_days;
            if every > 0 && outcomes.len() % every == 0 {
                tracing::info!(
                    processed = outcomes.len(),
                    total,
                    records = records_so_far,
                    "progress"
                );
            }
        }
        drop(units);
        outcomes.sort_by_key(|o| o.date);

        let summary = BatchSummary::from_outcomes(
            batch_id,
            period,
            opts,
            started_at,
            Utc::now(),
            &outcomes,
            registry.placeholders_created(),
        );
        summary.log();

        if self.cfg.persist_summary {
            self.persist_summary(&summary).await;
        }

        Ok(summary)
    }

    /// Audit write. The summary already exists; a failure here is only logged.
    async fn persist_summary(&self, summary: &BatchSummary) {
        let value = match serde_json::to_value(summary) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(batch_id = %summary.batch_id, error = %e, "batch summary not serializable");
                return;
            }
        };
        if let Err(e) = self
            .store
            .record_batch_summary(summary.batch_id, "ingest", &value)
            .await
        {
            tracing::warn!(batch_id = %summary.batch_id, error = %format!("{e:#}"), "batch summary not persisted");
        }
    }

    async fn pause(&self) {
        if !self.cfg.politeness_delay.is_zero() {
            tokio::time::sleep(self.cfg.politeness_delay).await;
        }
    }

    async fn run_unit(
        &self,
        registry: &FacilityRegistry,
        date: NaiveDate,
        opts: RunOptions,
    ) -> DateOutcome {
        let mut unit = DateUnit::new(date);

        if self.cancel.is_cancelled() {
            unit.advance(UnitState::Cancelled);
            tracing::info!(%date, "date cancelled before start");
            return unit.finish();
        }

        let window = match self.cfg.calendar.window(date) {
            Ok(w) => w,
            Err(e) => return unit.fail(Stage::ExistenceCheck, e),
        };

        if !opts.force {
            match self.store.day_coverage(&window).await {
                Ok(cov) if cov.distinct_buckets >= self.cfg.skip_min_buckets => {
                    unit.advance(UnitState::Skipped);
                    unit.outcome.records = u64::try_from(cov.records).unwrap_or(0);
                    tracing::info!(
                        %date,
                        buckets = cov.distinct_buckets,
                        records = cov.records,
                        "already ingested; skipping"
                    );
                    return unit.finish();
                }
                Ok(_) => {}
                Err(e) => return unit.fail(Stage::ExistenceCheck, e),
            }
        }

        unit.advance(UnitState::Fetching);
        let fetched = self.source.fetch(opts.channel, date).await;
        self.pause().await;
        let payload = match fetched {
            Ok(p) => p,
            Err(e) => return unit.fail(Stage::Fetching, e.into()),
        };
        unit.advance(UnitState::Fetched);

        unit.advance(UnitState::Normalizing);
        let (intervals, report) = match self.normalizer.parse(&payload, registry).await {
            Ok(v) => v,
            Err(e) => return unit.fail(Stage::Normalizing, e),
        };
        unit.outcome.dropped_records = report.dropped() as u64;

        unit.advance(UnitState::Aggregating);
        let (intervals, duplicates) = collapse_duplicates(intervals);
        unit.outcome.duplicate_samples = duplicates as u64;
        if duplicates > 0 {
            tracing::debug!(%date, duplicates, "repeated samples collapsed, last value kept");
        }
        let agg = aggregate(&intervals, self.cfg.convention_for(opts.channel));
        // The peak belongs to the trading day; samples outside its window still aggregate.
        let in_day: Vec<_> = intervals
            .iter()
            .filter(|iv| window.contains(iv.dispatch_at))
            .copied()
            .collect();
        let peak = peak_share(date, &in_day, &registry.classification());
        unit.outcome.incomplete_buckets = agg.report.incomplete_buckets as u64;
        if agg.report.incomplete_buckets > 0 {
            tracing::warn!(
                %date,
                incomplete_buckets = agg.report.incomplete_buckets,
                buckets = agg.report.buckets,
                "buckets with other than six samples"
            );
        }

        unit.advance(UnitState::Persisting);
        let counts = match self.store.upsert_half_hourly(&agg.records).await {
            Ok(c) => c,
            Err(e) => return unit.fail(Stage::Persisting, e),
        };
        match &peak {
            Some(p) => {
                if let Err(e) = self.store.upsert_daily_peak(p).await {
                    return unit.fail(Stage::Persisting, e);
                }
                unit.outcome.peak_percentage = Some(p.peak_percentage);
            }
            None => tracing::warn!(%date, "no positive generation; daily peak not written"),
        }

        unit.outcome.records = counts.written;
        unit.advance(UnitState::Done);
        tracing::info!(
            %date,
            samples = intervals.len(),
            written = counts.written,
            inserted = counts.inserted,
            updated = counts.updated,
            peak_percentage = ?unit.outcome.peak_percentage,
            "date ingested"
        );
        unit.finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
