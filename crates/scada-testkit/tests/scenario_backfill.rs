// Backfill computes peaks from stored half-hourly rows for dates that lack
// one, and never touches a peak that already exists.

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use scada_md::{DailyPeakShare, HalfHourlyRecord, MarketCalendar, PeakResolution, HALF_HOUR_SECS, MICROS_PER_MW};
use scada_runtime::{Backfill, CancelToken};
use scada_testkit::{sample_fleet, MemoryStore};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
}

/// Wind and coal for a whole day; wind peaks at the bucket with index `peak_bucket`.
fn seed_day(store: &MemoryStore, cal: &MarketCalendar, date: NaiveDate, peak_bucket: i64) {
    let window = cal.window(date).unwrap();
    let mut rows = Vec::new();
    for i in 0..48 {
        let at = window.start + chrono::Duration::seconds(i * HALF_HOUR_SECS);
        let wind = if i == peak_bucket { 75 } else { 25 };
        rows.push(HalfHourlyRecord { interval_start: at, facility_id: 1, quantity_micros: wind * MICROS_PER_MW });
        rows.push(HalfHourlyRecord { interval_start: at, facility_id: 2, quantity_micros: 25 * MICROS_PER_MW });
    }
    store.seed_half_hourly(&rows);
}

fn existing_peak(date: NaiveDate) -> DailyPeakShare {
    DailyPeakShare {
        trading_date: date,
        peak_percentage: 42.0,
        peak_at: Utc.with_ymd_and_hms(2024, 2, 1, 4, 5, 0).unwrap(),
        renewable_micros: 42,
        total_micros: 100,
        resolution: PeakResolution::FiveMinute,
    }
}

#[tokio::test]
async fn fills_missing_and_preserves_existing() -> anyhow::Result<()> {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    seed_day(&store, &cal, d(1), 20);
    seed_day(&store, &cal, d(2), 24);
    store.seed_peak(existing_peak(d(1)));
    // d(3) has no half-hourly data at all.

    let backfill = Backfill::new(store.clone(), store.clone(), cal);
    let summary = backfill.run(d(1), d(3)).await?;

    assert_eq!(summary.days_examined, 3);
    assert_eq!(summary.filled, 1);
    assert_eq!(summary.already_present, 1);
    assert_eq!(summary.no_half_hourly_data, 1);
    assert_eq!(summary.failed_days, 0);

    assert_eq!(store.peak(d(1)), Some(existing_peak(d(1))));

    let filled = store.peak(d(2)).expect("backfilled");
    assert!((filled.peak_percentage - 75.0).abs() < 1e-9);
    // Bucket 24 is 12:00 Perth, 04:00Z.
    assert_eq!(filled.peak_at, Utc.with_ymd_and_hms(2024, 2, 2, 4, 0, 0).unwrap());
    assert_eq!(filled.resolution, PeakResolution::HalfHourly);
    assert!(store.peak(d(3)).is_none());
    Ok(())
}

#[tokio::test]
async fn rerun_is_a_no_op() -> anyhow::Result<()> {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    seed_day(&store, &cal, d(5), 10);

    let backfill = Backfill::new(store.clone(), store.clone(), cal);
    let first = backfill.run(d(5), d(5)).await?;
    let after_first = store.peaks();
    let second = backfill.run(d(5), d(5)).await?;

    assert_eq!(first.filled, 1);
    assert_eq!(second.filled, 0);
    assert_eq!(second.already_present, 1);
    assert_eq!(store.peaks(), after_first);
    Ok(())
}

#[tokio::test]
async fn retired_facilities_still_classify() -> anyhow::Result<()> {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    store.deactivate("ALINTA_WWF");
    seed_day(&store, &cal, d(7), 0);

    let summary = Backfill::new(store.clone(), store.clone(), cal).run(d(7), d(7)).await?;

    assert_eq!(summary.filled, 1);
    assert!((store.peak(d(7)).unwrap().peak_percentage - 75.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn all_negative_day_is_reported_not_written() -> anyhow::Result<()> {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    let window = cal.window(d(9))?;
    store.seed_half_hourly(&[HalfHourlyRecord {
        interval_start: window.start,
        facility_id: 3,
        quantity_micros: -5 * MICROS_PER_MW,
    }]);

    let summary = Backfill::new(store.clone(), store.clone(), cal).run(d(9), d(9)).await?;

    assert_eq!(summary.no_generation, 1);
    assert!(store.peak(d(9)).is_none());
    Ok(())
}

#[tokio::test]
async fn cancelled_backfill_leaves_dates_untouched() -> anyhow::Result<()> {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    seed_day(&store, &cal, d(1), 1);
    seed_day(&store, &cal, d(2), 1);

    let token = CancelToken::new();
    token.cancel();
    let summary = Backfill::new(store.clone(), store.clone(), cal)
        .with_cancel_token(token)
        .run(d(1), d(2))
        .await?;

    assert_eq!(summary.cancelled_days, 2);
    assert!(store.peaks().is_empty());
    Ok(())
}

#[tokio::test]
async fn classification_failure_aborts() {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    store.fail_facility_listing(true);

    let err = Backfill::new(store.clone(), store.clone(), cal)
        .persist_summary(false)
        .run(d(1), d(2))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("facility classification unavailable"));
    assert!(store.summaries().is_empty());
}

#[tokio::test]
async fn summary_is_recorded_as_backfill() -> anyhow::Result<()> {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    seed_day(&store, &cal, d(1), 1);

    let summary = Backfill::new(store.clone(), store.clone(), cal).run(d(1), d(1)).await?;

    let audit = store.summaries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].0, summary.batch_id);
    assert_eq!(audit[0].1, "backfill");
    assert_eq!(audit[0].2["filled"], 1);
    Ok(())
}
