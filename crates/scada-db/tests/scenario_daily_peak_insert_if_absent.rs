// DB-backed test, skipped if SCADA_DATABASE_URL is not set.
//
// The backfill write never replaces an existing peak; the ingest write does.

use anyhow::Result;
use chrono::{Days, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use scada_db::PgScadaStore;
use scada_md::store::ScadaStore;
use scada_md::{DailyPeakShare, PeakResolution};

/// A date nobody else writes to: far future, offset by a random day count.
fn unique_date() -> NaiveDate {
    let offset = Uuid::new_v4().as_u128() % 300_000;
    NaiveDate::from_ymd_opt(2200, 1, 1)
        .and_then(|d| d.checked_add_days(Days::new(offset as u64)))
        .expect("date in range")
}

fn peak(date: NaiveDate, pct: f64, resolution: PeakResolution) -> DailyPeakShare {
    DailyPeakShare {
        trading_date: date,
        peak_percentage: pct,
        peak_at: Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap(),
        renewable_micros: (pct * 1_000_000.0) as i64,
        total_micros: 100_000_000,
        resolution,
    }
}

#[tokio::test]
async fn insert_if_absent_never_overwrites() -> Result<()> {
    let url = match std::env::var(scada_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: SCADA_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = scada_db::connect(&url, 2).await?;
    scada_db::migrate(&pool).await?;
    let store = PgScadaStore::new(pool.clone());
    let date = unique_date();

    assert!(!store.has_daily_peak(date).await?);
    assert!(store.insert_daily_peak_if_absent(&peak(date, 55.0, PeakResolution::HalfHourly)).await?);
    assert!(!store.insert_daily_peak_if_absent(&peak(date, 99.0, PeakResolution::HalfHourly)).await?);
    assert!(store.has_daily_peak(date).await?);

    let (pct, resolution): (f64, String) = sqlx::query_as(
        "select peak_percentage, resolution from daily_peak_share where trading_date = $1",
    )
    .bind(date)
    .fetch_one(&pool)
    .await?;
    assert_eq!(pct, 55.0);
    assert_eq!(resolution, "30min");

    store.upsert_daily_peak(&peak(date, 80.0, PeakResolution::FiveMinute)).await?;
    let (pct, resolution, renewable_micros): (f64, String, i64) = sqlx::query_as(
        r#"
        select peak_percentage, resolution, (renewable_mw * 1000000)::bigint
        from daily_peak_share where trading_date = $1
        "#,
    )
    .bind(date)
    .fetch_one(&pool)
    .await?;
    assert_eq!(pct, 80.0);
    assert_eq!(resolution, "5min");
    assert_eq!(renewable_micros, 80_000_000);
    Ok(())
}

#[tokio::test]
async fn batch_summary_is_recorded() -> Result<()> {
    let url = match std::env::var(scada_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: SCADA_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = scada_db::connect(&url, 2).await?;
    scada_db::migrate(&pool).await?;
    let store = PgScadaStore::new(pool.clone());

    let id = Uuid::new_v4();
    store
        .record_batch_summary(id, "ingest", &serde_json::json!({"successful_days": 3}))
        .await?;
    let (kind, summary): (String, serde_json::Value) =
        sqlx::query_as("select kind, summary from scada_batch_summaries where batch_id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(kind, "ingest");
    assert_eq!(summary["successful_days"], 3);
    Ok(())
}
