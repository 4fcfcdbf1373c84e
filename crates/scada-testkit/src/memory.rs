use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use scada_md::store::{CreateFacility, DayCoverage, FacilityStore, ScadaStore, UpsertCounts};
use scada_md::{
    DailyPeakShare, DayWindow, FacilityIdentity, HalfHourlyRecord, MarketCalendar,
    TechnologyCategory, UNKNOWN_FUEL_TYPE,
};

#[derive(Default)]
struct State {
    facilities: BTreeMap<String, FacilityIdentity>,
    next_facility_id: i64,
    half_hourly: BTreeMap<(DateTime<Utc>, i64), i64>,
    peaks: BTreeMap<NaiveDate, DailyPeakShare>,
    summaries: BTreeMap<Uuid, (String, Value)>,
}

/// Mutex-guarded in-memory store with the same key and conflict semantics
/// as the Postgres tables.
pub struct MemoryStore {
    state: Mutex<State>,
    fail_listing: AtomicBool,
    fail_upserts: AtomicBool,
    creates: AtomicU64,
    upsert_calls: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_facility_id: 1,
                ..State::default()
            }),
            fail_listing: AtomicBool::new(false),
            fail_upserts: AtomicBool::new(false),
            creates: AtomicU64::new(0),
            upsert_calls: AtomicU64::new(0),
        }
    }

    pub fn with_facilities(facilities: Vec<FacilityIdentity>) -> Self {
        let store = Self::new();
        {
            let mut st = store.state();
            for f in facilities {
                st.next_facility_id = st.next_facility_id.max(f.internal_id + 1);
                st.facilities.insert(f.external_code.clone(), f);
            }
        }
        store
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `list_active` / `list_all` fail, as if the registry were unreachable.
    pub fn fail_facility_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make every half-hourly upsert fail without writing.
    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn facility_creates(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn facilities(&self) -> Vec<FacilityIdentity> {
        self.state().facilities.values().cloned().collect()
    }

    pub fn deactivate(&self, code: &str) {
        if let Some(f) = self.state().facilities.get_mut(code) {
            f.is_active = false;
        }
    }

    pub fn half_hourly(&self) -> Vec<HalfHourlyRecord> {
        self.state()
            .half_hourly
            .iter()
            .map(|((interval_start, facility_id), q)| HalfHourlyRecord {
                interval_start: *interval_start,
                facility_id: *facility_id,
                quantity_micros: *q,
            })
            .collect()
    }

    pub fn half_hourly_in(&self, window: &DayWindow) -> usize {
        self.state()
            .half_hourly
            .keys()
            .filter(|(ts, _)| window.contains(*ts))
            .count()
    }

    pub fn seed_half_hourly(&self, rows: &[HalfHourlyRecord]) {
        let mut st = self.state();
        for r in rows {
            st.half_hourly
                .insert((r.interval_start, r.facility_id), r.quantity_micros);
        }
    }

    pub fn peak(&self, date: NaiveDate) -> Option<DailyPeakShare> {
        self.state().peaks.get(&date).cloned()
    }

    pub fn peaks(&self) -> Vec<DailyPeakShare> {
        self.state().peaks.values().cloned().collect()
    }

    pub fn seed_peak(&self, peak: DailyPeakShare) {
        self.state().peaks.insert(peak.trading_date, peak);
    }

    pub fn summaries(&self) -> Vec<(Uuid, String, Value)> {
        self.state()
            .summaries
            .iter()
            .map(|(id, (kind, v))| (*id, kind.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl FacilityStore for MemoryStore {
    async fn list_active(&self) -> Result<Vec<FacilityIdentity>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            bail!("facility store unavailable");
        }
        Ok(self
            .state()
            .facilities
            .values()
            .filter(|f| f.is_active)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<FacilityIdentity>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            bail!("facility store unavailable");
        }
        Ok(self.facilities())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<FacilityIdentity>> {
        Ok(self.state().facilities.get(code).cloned())
    }

    async fn create_with_defaults(&self, code: &str) -> Result<CreateFacility> {
        let mut st = self.state();
        if st.facilities.contains_key(code) {
            return Ok(CreateFacility::AlreadyExists);
        }
        let identity = FacilityIdentity {
            external_code: code.to_string(),
            internal_id: st.next_facility_id,
            technology_category: TechnologyCategory::Unknown,
            fuel_type: UNKNOWN_FUEL_TYPE.to_string(),
            is_active: true,
        };
        st.next_facility_id += 1;
        st.facilities.insert(code.to_string(), identity.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(CreateFacility::Created(identity))
    }
}

#[async_trait]
impl ScadaStore for MemoryStore {
    async fn upsert_half_hourly(&self, rows: &[HalfHourlyRecord]) -> Result<UpsertCounts> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            bail!("half-hourly upsert failed: connection reset");
        }

        let mut st = self.state();
        let mut counts = UpsertCounts::default();
        for r in rows {
            let prev = st
                .half_hourly
                .insert((r.interval_start, r.facility_id), r.quantity_micros);
            counts.written += 1;
            if prev.is_some() {
                counts.updated += 1;
            } else {
                counts.inserted += 1;
            }
        }
        Ok(counts)
    }

    async fn upsert_daily_peak(&self, peak: &DailyPeakShare) -> Result<()> {
        self.state().peaks.insert(peak.trading_date, peak.clone());
        Ok(())
    }

    async fn insert_daily_peak_if_absent(&self, peak: &DailyPeakShare) -> Result<bool> {
        let mut st = self.state();
        if st.peaks.contains_key(&peak.trading_date) {
            return Ok(false);
        }
        st.peaks.insert(peak.trading_date, peak.clone());
        Ok(true)
    }

    async fn day_coverage(&self, window: &DayWindow) -> Result<DayCoverage> {
        let st = self.state();
        let mut buckets = BTreeSet::new();
        let mut records = 0i64;
        for (ts, _) in st.half_hourly.keys().filter(|(ts, _)| window.contains(*ts)) {
            buckets.insert(*ts);
            records += 1;
        }
        Ok(DayCoverage {
            distinct_buckets: buckets.len() as i64,
            records,
        })
    }

    async fn load_half_hourly(&self, window: &DayWindow) -> Result<Vec<HalfHourlyRecord>> {
        Ok(self
            .half_hourly()
            .into_iter()
            .filter(|r| window.contains(r.interval_start))
            .collect())
    }

    async fn has_daily_peak(&self, trading_date: NaiveDate) -> Result<bool> {
        Ok(self.state().peaks.contains_key(&trading_date))
    }

    async fn dates_with_half_hourly(
        &self,
        calendar: &MarketCalendar,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let dates: BTreeSet<NaiveDate> = self
            .state()
            .half_hourly
            .keys()
            .map(|(ts, _)| calendar.trading_date_of(*ts))
            .filter(|d| *d >= start && *d <= end)
            .collect();
        Ok(dates.into_iter().collect())
    }

    async fn record_batch_summary(&self, batch_id: Uuid, kind: &str, summary: &Value) -> Result<()> {
        self.state()
            .summaries
            .insert(batch_id, (kind.to_string(), summary.clone()));
        Ok(())
    }
}
