// Batch entry points: registry failure aborts before any date, months and
// years expand to their days, days-back ends yesterday.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use scada_md::{Channel, MarketCalendar};
use scada_runtime::{BatchPeriod, Orchestrator, RunOptions, RuntimeConfig};
use scada_testkit::{day_document, sample_fleet, MemoryStore, Scripted, ScriptedSource};

fn cfg() -> RuntimeConfig {
    RuntimeConfig {
        politeness_delay: Duration::ZERO,
        ..RuntimeConfig::default()
    }
}

#[tokio::test]
async fn registry_unavailable_aborts_batch() {
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    store.fail_facility_listing(true);
    let source = Arc::new(ScriptedSource::new());

    let orch = Orchestrator::new(source.clone(), store.clone(), store.clone(), cfg());
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
    let err = orch
        .run_range(start, end, RunOptions::default())
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("facility registry unavailable"));
    assert!(source.calls().is_empty());
    assert!(store.summaries().is_empty());
}

#[tokio::test]
async fn reversed_range_is_rejected() {
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    let orch = Orchestrator::new(Arc::new(ScriptedSource::new()), store.clone(), store, cfg());
    let start = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    assert!(orch.run_range(start, end, RunOptions::default()).await.is_err());
}

#[tokio::test]
async fn month_covers_every_day() -> anyhow::Result<()> {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    let source = Arc::new(ScriptedSource::new());
    let leap = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    source.script(
        Channel::Historical,
        leap,
        Scripted::Documents(vec![day_document(&cal, leap, &[("MUJA_G7", "1")])]),
    );

    let orch = Orchestrator::new(source.clone(), store.clone(), store.clone(), cfg());
    let opts = RunOptions { channel: Channel::Historical, force: false };
    let summary = orch.run_month(2024, 2, opts).await?;

    assert_eq!(summary.period, BatchPeriod::Month { year: 2024, month: 2 });
    assert_eq!(summary.total_days, 29);
    assert_eq!(summary.successful_days, 1);
    // Unscripted days answer 404 and fail individually.
    assert_eq!(summary.failed_days, 28);
    assert_eq!(source.calls().len(), 29);
    Ok(())
}

#[tokio::test]
async fn year_aggregates_twelve_months() -> anyhow::Result<()> {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    let source = Arc::new(ScriptedSource::new());
    for date in [
        NaiveDate::from_ymd_opt(2023, 1, 15).unwrap(),
        NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
    ] {
        source.script(
            Channel::Historical,
            date,
            Scripted::Documents(vec![day_document(&cal, date, &[("MUJA_G7", "1")])]),
        );
    }

    let orch = Orchestrator::new(source, store.clone(), store.clone(), cfg());
    let opts = RunOptions { channel: Channel::Historical, force: false };
    let year = orch.run_year(2023, opts).await?;

    assert_eq!(year.months.len(), 12);
    assert_eq!(year.total_days, 365);
    assert_eq!(year.successful_days, 2);
    assert_eq!(year.failed_days, 363);
    assert_eq!(year.total_records, 96);
    assert_eq!(year.months[11].successful_days, 1);
    assert!(year.render().contains("Total days: 365"));
    // One audit record per month batch.
    assert_eq!(store.summaries().len(), 12);
    Ok(())
}

#[tokio::test]
async fn days_back_ends_yesterday() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    let source = Arc::new(ScriptedSource::new());
    let orch = Orchestrator::new(source.clone(), store.clone(), store, cfg());

    let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
    let summary = orch.run_days_back(3, today, RunOptions::default()).await?;

    assert_eq!(
        summary.period,
        BatchPeriod::Range {
            start: NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
        }
    );
    let fetched: Vec<NaiveDate> = source.calls().into_iter().map(|(_, d)| d).collect();
    assert_eq!(fetched.len(), 3);
    assert!(!fetched.contains(&today));
    Ok(())
}

#[tokio::test]
async fn missing_dates_lists_gaps() -> anyhow::Result<()> {
    let cal = MarketCalendar::perth();
    let store = Arc::new(MemoryStore::with_facilities(sample_fleet()));
    let source = Arc::new(ScriptedSource::new());
    let d = |day| NaiveDate::from_ymd_opt(2024, 4, day).unwrap();
    for day in [1, 3] {
        source.script(
            Channel::Current,
            d(day),
            Scripted::Documents(vec![day_document(&cal, d(day), &[("MUJA_G7", "1")])]),
        );
    }
    let orch = Orchestrator::new(source, store.clone(), store.clone(), cfg());
    orch.run_range(d(1), d(4), RunOptions::default()).await?;

    let missing = scada_runtime::missing_dates(store.as_ref(), &cal, d(1), d(4)).await?;
    assert_eq!(missing, vec![d(2), d(4)]);
    Ok(())
}
