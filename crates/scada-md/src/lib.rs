//! scada-md
//!
//! Facility SCADA domain: delivery channels, raw payload retrieval, record
//! normalization, facility identity resolution, half-hourly aggregation and the
//! daily renewable-share peak.
//!
//! This crate does **not** talk to the database directly. Persistence and the
//! facility registry are reached through the [`store::ScadaStore`] and
//! [`store::FacilityStore`] traits; `scada-db` implements them for Postgres.

pub mod aggregate;
pub mod normalizer;
pub mod registry;
pub mod renewable;
pub mod source;
pub mod store;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Quantities are integer micro-MW: the store's DECIMAL(12,6) precision, no floats.
pub const MICROS_PER_MW: i64 = 1_000_000;

/// Persisted granularity.
pub const HALF_HOUR_SECS: i64 = 1_800;

/// Dispatch intervals in one complete half-hourly bucket.
pub const SAMPLES_PER_BUCKET: usize = 6;

/// Delivery channel for one trading day of SCADA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// One JSON document per day under the `current/` directory.
    Current,
    /// One ZIP archive per day under the `previous/` directory.
    Historical,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Current => "current",
            Channel::Historical => "historical",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" => Ok(Channel::Current),
            "historical" | "previous" => Ok(Channel::Historical),
            other => Err(anyhow!(
                "invalid channel '{}'. expected one of: current | historical",
                other
            )),
        }
    }
}

/// Technology category as recorded in the facility registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TechnologyCategory {
    Generator,
    Storage,
    Wind,
    Solar,
    /// Placeholder category, and anything the registry spells differently.
    Unknown,
}

impl TechnologyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TechnologyCategory::Generator => "Generator",
            TechnologyCategory::Storage => "Storage",
            TechnologyCategory::Wind => "Wind",
            TechnologyCategory::Solar => "Solar",
            TechnologyCategory::Unknown => "Unknown",
        }
    }

    /// Registry categories are free text; unrecognised values map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "generator" => TechnologyCategory::Generator,
            "storage" => TechnologyCategory::Storage,
            "wind" => TechnologyCategory::Wind,
            "solar" => TechnologyCategory::Solar,
            _ => TechnologyCategory::Unknown,
        }
    }
}

/// Fuel type given to auto-provisioned placeholder facilities.
pub const UNKNOWN_FUEL_TYPE: &str = "UNKNOWN";

/// Technology name given to auto-provisioned placeholder facilities.
pub const UNKNOWN_TECHNOLOGY: &str = "Unknown";

/// A facility as known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityIdentity {
    pub external_code: String,
    pub internal_id: i64,
    pub technology_category: TechnologyCategory,
    pub fuel_type: String,
    pub is_active: bool,
}

/// One 5-minute SCADA sample as read from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInterval {
    pub dispatch_at: DateTime<Utc>,
    pub facility_code: String,
    pub quantity_micros: i64,
}

/// A [`RawInterval`] whose facility code has been resolved to an internal id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedInterval {
    pub dispatch_at: DateTime<Utc>,
    pub facility_id: i64,
    pub quantity_micros: i64,
}

/// Persisted half-hourly value. Natural key `(interval_start, facility_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalfHourlyRecord {
    /// Aligned to :00 or :30.
    pub interval_start: DateTime<Utc>,
    pub facility_id: i64,
    pub quantity_micros: i64,
}

/// Which data produced a [`DailyPeakShare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeakResolution {
    /// Raw dispatch intervals, primary ingestion path.
    FiveMinute,
    /// Already-persisted half-hourly rows, backfill path.
    HalfHourly,
}

impl PeakResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeakResolution::FiveMinute => "5min",
            PeakResolution::HalfHourly => "30min",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "5min" => Ok(PeakResolution::FiveMinute),
            "30min" => Ok(PeakResolution::HalfHourly),
            other => Err(anyhow!("invalid peak resolution: {}", other)),
        }
    }
}

/// Highest renewable share of a trading day. One row per `trading_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPeakShare {
    pub trading_date: NaiveDate,
    /// 0..=100.
    pub peak_percentage: f64,
    pub peak_at: DateTime<Utc>,
    pub renewable_micros: i64,
    pub total_micros: i64,
    pub resolution: PeakResolution,
}

/// One trading day as a half-open UTC window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayWindow {
    pub trading_date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// Trading-day arithmetic in the market time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketCalendar {
    tz: Tz,
}

impl Default for MarketCalendar {
    fn default() -> Self {
        Self::perth()
    }
}

impl MarketCalendar {
    /// The WEM trades on Australian Western Standard Time.
    pub fn perth() -> Self {
        Self {
            tz: chrono_tz::Australia::Perth,
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        let tz: Tz = name
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid market timezone '{}': {}", name, e))?;
        Ok(Self { tz })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Interpret a wall-clock time in the market zone.
    pub fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// `[D 00:00, D+1 00:00)` in market time, as UTC instants.
    pub fn day_window(&self, date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let next = date
            .checked_add_days(Days::new(1))
            .with_context(|| format!("date overflow after {date}"))?;
        let start = self
            .localize(date.and_time(chrono::NaiveTime::MIN))
            .with_context(|| format!("no local midnight for {date}"))?;
        let end = self
            .localize(next.and_time(chrono::NaiveTime::MIN))
            .with_context(|| format!("no local midnight for {next}"))?;
        Ok((start, end))
    }

    pub fn window(&self, date: NaiveDate) -> Result<DayWindow> {
        let (start, end) = self.day_window(date)?;
        Ok(DayWindow {
            trading_date: date,
            start,
            end,
        })
    }

    pub fn trading_date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// The most recent complete trading day relative to `now`.
    pub fn yesterday(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = self.trading_date_of(now);
        today.pred_opt().unwrap_or(today)
    }
}

// -----------------
// Tests (no network)
// -----------------
