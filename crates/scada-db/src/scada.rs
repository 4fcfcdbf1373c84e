use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use scada_md::store::{DayCoverage, ScadaStore, UpsertCounts};
use scada_md::{DailyPeakShare, DayWindow, HalfHourlyRecord, MarketCalendar};

pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 1000;

/// `facility_scada`, `daily_peak_share` and `scada_batch_summaries`.
#[derive(Clone)]
pub struct PgScadaStore {
    pool: PgPool,
    batch_size: usize,
}

impl PgScadaStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_UPSERT_BATCH_SIZE,
        }
    }

    /// Rows per multi-row insert. Three binds per row, so keep it well under
    /// the 65535 bind-parameter ceiling.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, 20_000);
        self
    }
}

#[async_trait]
impl ScadaStore for PgScadaStore {
    async fn upsert_half_hourly(&self, rows: &[HalfHourlyRecord]) -> Result<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        if rows.is_empty() {
            return Ok(counts);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin facility_scada transaction failed")?;

        // Rows come from the aggregator, unique per key, so no batch hits the
        // same conflict target twice.
        for chunk in rows.chunks(self.batch_size) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("insert into facility_scada (interval_start, facility_id, quantity) ");
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.interval_start)
                    .push_bind(r.facility_id)
                    .push_bind(r.quantity_micros)
                    .push_unseparated("::bigint::numeric / 1000000");
            });
            qb.push(
                r#"
                on conflict (interval_start, facility_id) do update set
                  quantity = excluded.quantity,
                  updated_at = now()
                returning (xmax = 0)
                "#,
            );

            // inserted = (xmax = 0) in Postgres (true on insert, false on update).
            let flags: Vec<bool> = qb
                .build_query_scalar::<bool>()
                .fetch_all(&mut *tx)
                .await
                .context("upsert facility_scada batch failed")?;

            let inserted = flags.iter().filter(|f| **f).count() as u64;
            counts.add(UpsertCounts {
                written: flags.len() as u64,
                inserted,
                updated: flags.len() as u64 - inserted,
            });
        }

        tx.commit()
            .await
            .context("commit facility_scada transaction failed")?;
        Ok(counts)
    }

    async fn upsert_daily_peak(&self, peak: &DailyPeakShare) -> Result<()> {
        sqlx::query(
            r#"
            insert into daily_peak_share (
              trading_date, peak_percentage, peak_at, renewable_mw, total_mw, resolution
            ) values (
              $1, $2, $3, $4::bigint::numeric / 1000000, $5::bigint::numeric / 1000000, $6
            )
            on conflict (trading_date) do update set
              peak_percentage = excluded.peak_percentage,
              peak_at = excluded.peak_at,
              renewable_mw = excluded.renewable_mw,
              total_mw = excluded.total_mw,
              resolution = excluded.resolution,
              updated_at = now()
            "#,
        )
        .bind(peak.trading_date)
        .bind(peak.peak_percentage)
        .bind(peak.peak_at)
        .bind(peak.renewable_micros)
        .bind(peak.total_micros)
        .bind(peak.resolution.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert daily_peak_share {} failed", peak.trading_date))?;
        Ok(())
    }

    async fn insert_daily_peak_if_absent(&self, peak: &DailyPeakShare) -> Result<bool> {
        let res = sqlx::query(
            r#"
            insert into daily_peak_share (
              trading_date, peak_percentage, peak_at, renewable_mw, total_mw, resolution
            ) values (
              $1, $2, $3, $4::bigint::numeric / 1000000, $5::bigint::numeric / 1000000, $6
            )
            on conflict (trading_date) do nothing
            "#,
        )
        .bind(peak.trading_date)
        .bind(peak.peak_percentage)
        .bind(peak.peak_at)
        .bind(peak.renewable_micros)
        .bind(peak.total_micros)
        .bind(peak.resolution.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert daily_peak_share {} failed", peak.trading_date))?;
        Ok(res.rows_affected() == 1)
    }

    async fn day_coverage(&self, window: &DayWindow) -> Result<DayCoverage> {
        let (distinct_buckets, records): (i64, i64) = sqlx::query_as(
            r#"
            select count(distinct interval_start)::bigint, count(*)::bigint
            from facility_scada
            where interval_start >= $1 and interval_start < $2
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("coverage query for {} failed", window.trading_date))?;

        Ok(DayCoverage {
            distinct_buckets,
            records,
        })
    }

    async fn load_half_hourly(&self, window: &DayWindow) -> Result<Vec<HalfHourlyRecord>> {
        let rows = sqlx::query(
            r#"
            select interval_start, facility_id, (quantity * 1000000)::bigint as quantity_micros
            from facility_scada
            where interval_start >= $1 and interval_start < $2
            order by interval_start asc, facility_id asc
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("load facility_scada for {} failed", window.trading_date))?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(HalfHourlyRecord {
                interval_start: r.try_get::<DateTime<Utc>, _>("interval_start")?,
                facility_id: r.try_get::<i64, _>("facility_id")?,
                quantity_micros: r.try_get::<i64, _>("quantity_micros")?,
            });
        }
        Ok(out)
    }

    async fn has_daily_peak(&self, trading_date: NaiveDate) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "select exists (select 1 from daily_peak_share where trading_date = $1)",
        )
        .bind(trading_date)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("daily_peak_share lookup for {trading_date} failed"))?;
        Ok(exists)
    }

    async fn dates_with_half_hourly(
        &self,
        calendar: &MarketCalendar,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let from = calendar.window(start)?.start;
        let to = calendar.window(end)?.end;
        let tz = calendar.timezone().name();

        let rows = sqlx::query(
            r#"
            select distinct (interval_start at time zone $3)::date as trading_date
            from facility_scada
            where interval_start >= $1 and interval_start < $2
            order by trading_date asc
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(tz)
        .fetch_all(&self.pool)
        .await
        .context("half-hourly date coverage query failed")?;

        rows.iter()
            .map(|r| r.try_get::<NaiveDate, _>("trading_date").map_err(Into::into))
            .collect()
    }

    async fn record_batch_summary(&self, batch_id: Uuid, kind: &str, summary: &Value) -> Result<()> {
        sqlx::query(
            r#"
            insert into scada_batch_summaries (batch_id, kind, summary)
            values ($1, $2, $3)
            on conflict (batch_id) do update set
              summary = excluded.summary,
              recorded_at = now()
            "#,
        )
        .bind(batch_id)
        .bind(kind)
        .bind(summary)
        .execute(&self.pool)
        .await
        .context("persist scada_batch_summaries failed")?;
        Ok(())
    }
}
