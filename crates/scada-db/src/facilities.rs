use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use scada_md::store::{CreateFacility, FacilityStore};
use scada_md::{FacilityIdentity, TechnologyCategory, UNKNOWN_FUEL_TYPE, UNKNOWN_TECHNOLOGY};

const SELECT_FACILITY: &str = r#"
    select f.id, f.code, f.fuel_type, f.is_active, t.category
    from facilities f
    left join technologies t on t.id = f.technology_id
"#;

/// Registry backing store over `facilities` joined to `technologies`.
#[derive(Clone)]
pub struct PgFacilityStore {
    pool: PgPool,
}

impl PgFacilityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn identity_from_row(r: &PgRow) -> Result<FacilityIdentity> {
    let category: Option<String> = r.try_get("category")?;
    Ok(FacilityIdentity {
        external_code: r.try_get::<String, _>("code")?,
        internal_id: r.try_get::<i64, _>("id")?,
        technology_category: TechnologyCategory::parse(category.as_deref().unwrap_or("")),
        fuel_type: r.try_get::<String, _>("fuel_type")?,
        is_active: r.try_get::<bool, _>("is_active")?,
    })
}

#[async_trait]
impl FacilityStore for PgFacilityStore {
    async fn list_active(&self) -> Result<Vec<FacilityIdentity>> {
        let sql = format!("{SELECT_FACILITY} where f.is_active order by f.id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .context("list active facilities failed")?;
        rows.iter().map(identity_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<FacilityIdentity>> {
        let sql = format!("{SELECT_FACILITY} order by f.id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .context("list facilities failed")?;
        rows.iter().map(identity_from_row).collect()
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<FacilityIdentity>> {
        let sql = format!("{SELECT_FACILITY} where f.code = $1");
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("find facility {code} failed"))?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn create_with_defaults(&self, code: &str) -> Result<CreateFacility> {
        // uq_facilities_code arbitrates concurrent creators; the loser gets no row back.
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            insert into facilities (code, name, technology_id, fuel_type, is_active)
            select $1::text, 'Auto-created: ' || $1::text, t.id, $3::text, true
            from technologies t
            where t.name = $2
            on conflict (code) do nothing
            returning id
            "#,
        )
        .bind(code)
        .bind(UNKNOWN_TECHNOLOGY)
        .bind(UNKNOWN_FUEL_TYPE)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("create placeholder facility {code} failed"))?;

        match id {
            Some(internal_id) => {
                tracing::info!(code, internal_id, "placeholder facility created");
                Ok(CreateFacility::Created(FacilityIdentity {
                    external_code: code.to_string(),
                    internal_id,
                    technology_category: TechnologyCategory::Unknown,
                    fuel_type: UNKNOWN_FUEL_TYPE.to_string(),
                    is_active: true,
                }))
            }
            None => Ok(CreateFacility::AlreadyExists),
        }
    }
}
