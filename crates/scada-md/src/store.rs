//! Store contracts for the facility registry and the SCADA persistence sink.
//!
//! `scada-db` implements both for Postgres; `scada-testkit` has an in-memory
//! implementation for scenario tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DailyPeakShare, DayWindow, FacilityIdentity, HalfHourlyRecord, MarketCalendar};

/// Outcome of [`FacilityStore::create_with_defaults`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateFacility {
    Created(FacilityIdentity),
    /// The uniqueness constraint on the code rejected the insert: another
    /// writer created it first.
    AlreadyExists,
}

#[async_trait]
pub trait FacilityStore: Send + Sync {
    /// Cache warm-up source.
    async fn list_active(&self) -> Result<Vec<FacilityIdentity>>;

    /// Every facility including inactive ones. Backfill classification needs
    /// facilities that have since been retired.
    async fn list_all(&self) -> Result<Vec<FacilityIdentity>>;

    async fn find_by_code(&self, code: &str) -> Result<Option<FacilityIdentity>>;

    /// Insert a placeholder facility: `Unknown` technology, `UNKNOWN` fuel, active.
    async fn create_with_defaults(&self, code: &str) -> Result<CreateFacility>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub written: u64,
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertCounts {
    pub fn add(&mut self, other: UpsertCounts) {
        self.written += other.written;
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// What is already persisted for one trading day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCoverage {
    pub distinct_buckets: i64,
    pub records: i64,
}

#[async_trait]
pub trait ScadaStore: Send + Sync {
    /// Idempotent on `(interval_start, facility_id)`, last write wins. All rows
    /// land or none do.
    async fn upsert_half_hourly(&self, rows: &[HalfHourlyRecord]) -> Result<UpsertCounts>;

    /// Overwrites on `trading_date`.
    async fn upsert_daily_peak(&self, peak: &DailyPeakShare) -> Result<()>;

    /// Never overwrites. Returns `true` when the row was written.
    async fn insert_daily_peak_if_absent(&self, peak: &DailyPeakShare) -> Result<bool>;

    async fn day_coverage(&self, window: &DayWindow) -> Result<DayCoverage>;

    /// Rows in the window ordered by `(interval_start, facility_id)`.
    async fn load_half_hourly(&self, window: &DayWindow) -> Result<Vec<HalfHourlyRecord>>;

    async fn has_daily_peak(&self, trading_date: NaiveDate) -> Result<bool>;

    /// Trading dates in `start..=end` with at least one half-hourly row, ascending.
    async fn dates_with_half_hourly(
        &self,
        calendar: &MarketCalendar,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>>;

    /// Audit row for one batch run. Re-recording the same id replaces it.
    async fn record_batch_summary(
        &self,
        batch_id: Uuid,
        kind: &str,
        summary: &serde_json::Value,
    ) -> Result<()>;
}
