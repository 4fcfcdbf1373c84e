//! `scada ingest`.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;

use scada_db::{PgFacilityStore, PgScadaStore};
use scada_md::{Channel, MarketCalendar};
use scada_runtime::{parse_year_month, Orchestrator, RunOptions, RuntimeConfig};

use super::{cancel_on_ctrl_c, load_settings, write_summary_json};
use crate::IngestArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Date(NaiveDate),
    Range(NaiveDate, NaiveDate),
    Month(i32, u32),
    Year(i32),
    DaysBack(u32),
}

/// Map the mutually exclusive target flags to one batch. No flag means
/// yesterday in market time.
pub fn resolve_target(args: &IngestArgs, calendar: &MarketCalendar, now: chrono::DateTime<Utc>) -> Result<Target> {
    let t = &args.target;
    if let Some(d) = t.date {
        return Ok(Target::Date(d));
    }
    if let Some(start) = t.start_date {
        let end = args.end_date.context("--start-date requires --end-date")?;
        if end < start {
            bail!("--end-date {end} is before --start-date {start}");
        }
        return Ok(Target::Range(start, end));
    }
    if let Some(m) = &t.month {
        let (year, month) = parse_year_month(m)?;
        return Ok(Target::Month(year, month));
    }
    if let Some(y) = t.year {
        return Ok(Target::Year(y));
    }
    if let Some(n) = t.days_back {
        if n == 0 {
            bail!("--days-back must be >= 1");
        }
        return Ok(Target::DaysBack(n));
    }
    Ok(Target::Date(calendar.yesterday(now)))
}

pub async fn run(args: IngestArgs) -> Result<()> {
    let (loaded, settings) = load_settings(&args.config)?;
    let cfg = RuntimeConfig::from_settings(&settings)?;
    let channel = Channel::parse(&args.channel)?;
    let now = Utc::now();
    let target = resolve_target(&args, &cfg.calendar, now)?;
    let today = cfg.calendar.trading_date_of(now);

    let pool = scada_db::connect_from_env().await?;
    let store = Arc::new(
        PgScadaStore::new(pool.clone()).with_batch_size(settings.store.upsert_batch_size),
    );
    let facilities = Arc::new(PgFacilityStore::new(pool));
    let source = scada_runtime::build_source(&settings.source);

    let orch = Orchestrator::new(source, store, facilities, cfg);
    cancel_on_ctrl_c(orch.cancel_token());

    let opts = RunOptions {
        channel,
        force: args.force,
    };

    println!("config_hash={}", loaded.config_hash);
    println!("channel={}", channel.as_str());
    println!("force={}", args.force);

    let summary = match target {
        Target::Date(d) => orch.run_date(d, opts).await?,
        Target::Range(start, end) => orch.run_range(start, end, opts).await?,
        Target::Month(year, month) => orch.run_month(year, month, opts).await?,
        Target::DaysBack(n) => orch.run_days_back(n, today, opts).await?,
        Target::Year(year) => {
            let summary = orch.run_year(year, opts).await?;
            println!("year={}", summary.year);
            println!("total_days={}", summary.total_days);
            println!("successful_days={}", summary.successful_days);
            println!("skipped_days={}", summary.skipped_days);
            println!("failed_days={}", summary.failed_days);
            println!("cancelled_days={}", summary.cancelled_days);
            println!("total_records={}", summary.total_records);
            println!("{}", summary.render());
            if let Some(path) = &args.output_summary {
                write_summary_json(path, &summary)?;
            }
            return Ok(());
        }
    };

    println!("batch_id={}", summary.batch_id);
    println!("period={}", summary.period);
    println!("total_days={}", summary.total_days);
    println!("successful_days={}", summary.successful_days);
    println!("skipped_days={}", summary.skipped_days);
    println!("failed_days={}", summary.failed_days);
    println!("cancelled_days={}", summary.cancelled_days);
    println!("total_records={}", summary.total_records);
    println!("{}", summary.render());
    if let Some(path) = &args.output_summary {
        write_summary_json(path, &summary)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigArgs, IngestTarget};
    use chrono::TimeZone;

    fn args(target: IngestTarget, end_date: Option<NaiveDate>) -> IngestArgs {
        IngestArgs {
            target,
            end_date,
            channel: "current".into(),
            force: false,
            output_summary: None,
            config: ConfigArgs::default(),
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn no_target_is_yesterday_in_perth() {
        let cal = MarketCalendar::perth();
        // 2024-03-10 17:00Z is 2024-03-11 01:00 in Perth.
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 17, 0, 0).unwrap();
        let t = resolve_target(&args(IngestTarget::default(), None), &cal, now).unwrap();
        assert_eq!(t, Target::Date(d(2024, 3, 10)));
    }

    #[test]
    fn explicit_targets() {
        let cal = MarketCalendar::perth();
        let now = Utc::now();

        let range = IngestTarget {
            start_date: Some(d(2024, 1, 1)),
            ..IngestTarget::default()
        };
        assert_eq!(
            resolve_target(&args(range.clone(), Some(d(2024, 1, 5))), &cal, now).unwrap(),
            Target::Range(d(2024, 1, 1), d(2024, 1, 5))
        );
        assert!(resolve_target(&args(range, Some(d(2023, 12, 31))), &cal, now).is_err());

        let month = IngestTarget {
            month: Some("2024-02".into()),
            ..IngestTarget::default()
        };
        assert_eq!(
            resolve_target(&args(month, None), &cal, now).unwrap(),
            Target::Month(2024, 2)
        );

        let back = IngestTarget {
            days_back: Some(0),
            ..IngestTarget::default()
        };
        assert!(resolve_target(&args(back, None), &cal, now).is_err());
    }
}
