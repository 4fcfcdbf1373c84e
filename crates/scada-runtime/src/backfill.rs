//! Backfill of missing daily renewable peaks from persisted half-hourly rows.
//!
//! Re-runnable: a date that already has a peak row is left untouched, and the
//! write itself is insert-if-absent so a concurrent ingest cannot be overwritten.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scada_md::renewable::{peak_share_half_hourly, FacilityClassification};
use scada_md::store::{FacilityStore, ScadaStore};
use scada_md::MarketCalendar;

use crate::{date_range, CancelToken};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillSummary {
    pub batch_id: Uuid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days_examined: u64,
    pub filled: u64,
    pub already_present: u64,
    pub no_half_hourly_data: u64,
    /// Half-hourly rows exist but none is positive.
    pub no_generation: u64,
    pub cancelled_days: u64,
    pub failed_days: u64,
    pub errors: Vec<String>,
}

impl BackfillSummary {
    fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            start,
            end,
            days_examined: 0,
            filled: 0,
            already_present: 0,
            no_half_hourly_data: 0,
            no_generation: 0,
            cancelled_days: 0,
            failed_days: 0,
            errors: Vec::new(),
        }
    }

    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = format!(
            "{rule}\n\
             Backfill {}..{}\n\
             Days examined: {}\n\
             Filled: {}\n\
             Already present: {}\n\
             No half-hourly data: {}\n\
             No generation: {}\n\
             Cancelled: {}\n\
             Failed: {}\n",
            self.start,
            self.end,
            self.days_examined,
            self.filled,
            self.already_present,
            self.no_half_hourly_data,
            self.no_generation,
            self.cancelled_days,
            self.failed_days,
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
}

enum DayResult {
    Filled(f64),
    AlreadyPresent,
    NoHalfHourly,
    NoGeneration,
}

pub struct Backfill {
    store: Arc<dyn ScadaStore>,
    facilities: Arc<dyn FacilityStore>,
    calendar: MarketCalendar,
    persist_summary: bool,
    cancel: CancelToken,
}

impl Backfill {
    pub fn new(
        store: Arc<dyn ScadaStore>,
        facilities: Arc<dyn FacilityStore>,
        calendar: MarketCalendar,
    ) -> Self {
        Self {
            store,
            facilities,
            calendar,
            persist_summary: true,
            cancel: CancelToken::new(),
        }
    }

    pub fn persist_summary(mut self, persist: bool) -> Self {
        self.persist_summary = persist;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Fails only when the facility classification cannot be loaded.
    pub async fn run(&self, start: NaiveDate, end: NaiveDate) -> Result<BackfillSummary> {
        let dates = date_range(start, end)?;

        // Retired facilities still classify historical rows.
        let facilities = self
            .facilities
            .list_all()
            .await
            .context("backfill aborted: facility classification unavailable")?;
        let classification = FacilityClassification::from_identities(facilities.iter());

        let with_data: BTreeSet<NaiveDate> = self
            .store
            .dates_with_half_hourly(&self.calendar, start, end)
            .await
            .context("backfill aborted: half-hourly coverage query failed")?
            .into_iter()
            .collect();

        tracing::info!(
            %start,
            %end,
            days = dates.len(),
            days_with_data = with_data.len(),
            facilities = classification.len(),
            "backfill started"
        );

        let mut summary = BackfillSummary::new(start, end);
        for date in dates {
            summary.days_examined += 1;

            if self.cancel.is_cancelled() {
                summary.cancelled_days += 1;
                continue;
            }
            if !with_data.contains(&date) {
                summary.no_half_hourly_data += 1;
                continue;
            }

            match self.fill_date(date, &classification).await {
                Ok(DayResult::Filled(pct)) => {
                    summary.filled += 1;
                    tracing::info!(%date, peak_percentage = pct, "daily peak backfilled");
                }
                Ok(DayResult::AlreadyPresent) => summary.already_present += 1,
                Ok(DayResult::NoHalfHourly) => summary.no_half_hourly_data += 1,
                Ok(DayResult::NoGeneration) => {
                    summary.no_generation += 1;
                    tracing::warn!(%date, "half-hourly rows have no positive generation");
                }
                Err(e) => {
                    summary.failed_days += 1;
                    let msg = format!("{date}: {e:#}");
                    tracing::error!(error = %msg, "backfill date failed");
                    summary.errors.push(msg);
                }
            }
        }

        tracing::info!(
            batch_id = %summary.batch_id,
            days_examined = summary.days_examined,
            filled = summary.filled,
            already_present = summary.already_present,
            no_half_hourly_data = summary.no_half_hourly_data,
            no_generation = summary.no_generation,
            failed_days = summary.failed_days,
            finished_at = %Utc::now(),
            "backfill complete"
        );

        if self.persist_summary {
            match serde_json::to_value(&summary) {
                Ok(v) => {
                    if let Err(e) = self
                        .store
                        .record_batch_summary(summary.batch_id, "backfill", &v)
                        .await
                    {
                        tracing::warn!(error = %format!("{e:#}"), "backfill summary not persisted");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "backfill summary not serializable"),
            }
        }

        Ok(summary)
    }

    async fn fill_date(
        &self,
        date: NaiveDate,
        classification: &FacilityClassification,
    ) -> Result<DayResult> {
        if self.store.has_daily_peak(date).await? {
            return Ok(DayResult::AlreadyPresent);
        }

        let window = self.calendar.window(date)?;
        let rows = self.store.load_half_hourly(&window).await?;
        if rows.is_empty() {
            return Ok(DayResult::NoHalfHourly);
        }

        let Some(peak) = peak_share_half_hourly(date, &rows, classification) else {
            return Ok(DayResult::NoGeneration);
        };

        if self.store.insert_daily_peak_if_absent(&peak).await? {
            Ok(DayResult::Filled(peak.peak_percentage))
        } else {
            Ok(DayResult::AlreadyPresent)
        }
    }
}
