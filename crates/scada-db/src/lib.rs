//! scada-db
//!
//! Postgres implementation of the facility registry and SCADA store contracts
//! from `scada-md`, plus embedded migrations and a status probe.
//!
//! Quantities live in `numeric(12,6)` MW columns and cross the wire as
//! `bigint` micro-MW: conversion happens in SQL so no float enters either way.

mod facilities;
mod scada;

pub use facilities::PgFacilityStore;
pub use scada::{PgScadaStore, DEFAULT_UPSERT_BATCH_SIZE};

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "SCADA_DATABASE_URL";

/// Connect to Postgres using SCADA_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, 10).await
}

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStatus {
    pub ok: bool,
    pub has_schema: bool,
    pub facilities: i64,
    pub half_hourly_rows: i64,
    pub daily_peaks: i64,
}

/// Connectivity, schema presence and row counts. Counts are zero before
/// the first migration.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (has_schema,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'facility_scada'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    let mut st = DbStatus {
        ok: one == 1,
        has_schema,
        facilities: 0,
        half_hourly_rows: 0,
        daily_peaks: 0,
    };
    if !has_schema {
        return Ok(st);
    }

    let (facilities, half_hourly_rows, daily_peaks): (i64, i64, i64) = sqlx::query_as(
        r#"
        select
          (select count(*) from facilities)::bigint,
          (select count(*) from facility_scada)::bigint,
          (select count(*) from daily_peak_share)::bigint
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status count query failed")?;

    st.facilities = facilities;
    st.half_hourly_rows = half_hourly_rows;
    st.daily_peaks = daily_peaks;
    Ok(st)
}
