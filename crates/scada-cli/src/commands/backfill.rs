//! `scada backfill` and `scada check-missing`.

use anyhow::Result;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;

use scada_db::{PgFacilityStore, PgScadaStore};
use scada_md::MarketCalendar;
use scada_runtime::Backfill;

use super::{cancel_on_ctrl_c, load_settings, write_summary_json};
use crate::ConfigArgs;

pub async fn run(
    start: NaiveDate,
    end: NaiveDate,
    output_summary: Option<PathBuf>,
    config: ConfigArgs,
) -> Result<()> {
    let (loaded, settings) = load_settings(&config)?;
    let calendar = MarketCalendar::parse(&settings.market.timezone)?;

    let pool = scada_db::connect_from_env().await?;
    let store = Arc::new(PgScadaStore::new(pool.clone()));
    let facilities = Arc::new(PgFacilityStore::new(pool));

    let backfill = Backfill::new(store, facilities, calendar)
        .persist_summary(settings.orchestrator.persist_summary);
    let token = scada_runtime::CancelToken::new();
    cancel_on_ctrl_c(token.clone());
    let summary = backfill.with_cancel_token(token).run(start, end).await?;

    println!("config_hash={}", loaded.config_hash);
    println!("batch_id={}", summary.batch_id);
    println!("days_examined={}", summary.days_examined);
    println!("filled={}", summary.filled);
    println!("already_present={}", summary.already_present);
    println!("no_half_hourly_data={}", summary.no_half_hourly_data);
    println!("failed_days={}", summary.failed_days);
    println!("{}", summary.render());
    if let Some(path) = &output_summary {
        write_summary_json(path, &summary)?;
    }
    Ok(())
}

pub async fn check_missing(start: NaiveDate, end: NaiveDate, config: ConfigArgs) -> Result<()> {
    let (_, settings) = load_settings(&config)?;
    let calendar = MarketCalendar::parse(&settings.market.timezone)?;

    let pool = scada_db::connect_from_env().await?;
    let store = PgScadaStore::new(pool);
    let missing = scada_runtime::missing_dates(&store, &calendar, start, end).await?;

    println!("start_date={start}");
    println!("end_date={end}");
    println!("missing_count={}", missing.len());
    for d in &missing {
        println!("missing_date={d}");
    }
    if !missing.is_empty() {
        println!("To ingest the missing dates:");
        for d in &missing {
            println!("  scada ingest --date {d}");
        }
    }
    Ok(())
}
