//! Daily peak renewable share.
//!
//! For every timestamp, positive quantities are summed across facilities into
//! a total and a renewable part; the day's peak is the timestamp with the
//! highest renewable / total ratio. Negative quantities (storage charging,
//! auxiliary load) never contribute.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    DailyPeakShare, FacilityIdentity, HalfHourlyRecord, PeakResolution, ResolvedInterval,
    TechnologyCategory,
};

/// Fuel types counted as renewable, compared case-insensitively.
pub const RENEWABLE_FUEL_TYPES: &[&str] = &["WIND", "SOLAR", "BIOMASS", "HYDRO"];

/// Storage is counted alongside renewables: discharge displaces thermal generation.
pub fn is_renewable(fuel_type: &str, category: TechnologyCategory) -> bool {
    let fuel = fuel_type.trim();
    category == TechnologyCategory::Storage
        || RENEWABLE_FUEL_TYPES
            .iter()
            .any(|f| f.eq_ignore_ascii_case(fuel))
}

/// `facility_id -> renewable?` snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacilityClassification {
    renewable: HashMap<i64, bool>,
}

impl FacilityClassification {
    pub fn from_identities<'a>(identities: impl IntoIterator<Item = &'a FacilityIdentity>) -> Self {
        let renewable = identities
            .into_iter()
            .map(|f| {
                (
                    f.internal_id,
                    is_renewable(&f.fuel_type, f.technology_category),
                )
            })
            .collect();
        Self { renewable }
    }

    /// Unknown facilities are not renewable.
    pub fn is_renewable(&self, facility_id: i64) -> bool {
        self.renewable.get(&facility_id).copied().unwrap_or(false)
    }

    pub fn contains(&self, facility_id: i64) -> bool {
        self.renewable.contains_key(&facility_id)
    }

    pub fn len(&self) -> usize {
        self.renewable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renewable.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Instant {
    renewable: i64,
    total: i64,
}

fn peak_of(
    trading_date: NaiveDate,
    samples: impl IntoIterator<Item = (DateTime<Utc>, i64, i64)>,
    classification: &FacilityClassification,
    resolution: PeakResolution,
) -> Option<DailyPeakShare> {
    let mut by_ts: BTreeMap<DateTime<Utc>, Instant> = BTreeMap::new();
    for (ts, facility_id, micros) in samples {
        if micros <= 0 {
            continue;
        }
        let slot = by_ts.entry(ts).or_default();
        slot.total = slot.total.saturating_add(micros);
        if classification.is_renewable(facility_id) {
            slot.renewable = slot.renewable.saturating_add(micros);
        }
    }

    let mut best: Option<(DateTime<Utc>, Instant, f64)> = None;
    // Ascending timestamps; strict `>` keeps the earliest of equal shares.
    for (ts, inst) in by_ts {
        if inst.total <= 0 {
            continue;
        }
        let share = inst.renewable as f64 / inst.total as f64 * 100.0;
        if best.as_ref().map_or(true, |(_, _, s)| share > *s) {
            best = Some((ts, inst, share));
        }
    }

    best.map(|(peak_at, inst, share)| DailyPeakShare {
        trading_date,
        peak_percentage: share,
        peak_at,
        renewable_micros: inst.renewable,
        total_micros: inst.total,
        resolution,
    })
}

/// Peak share over raw 5-minute intervals. `None` when no instant has positive generation.
pub fn peak_share(
    trading_date: NaiveDate,
    intervals: &[ResolvedInterval],
    classification: &FacilityClassification,
) -> Option<DailyPeakShare> {
    peak_of(
        trading_date,
        intervals
            .iter()
            .map(|r| (r.dispatch_at, r.facility_id, r.quantity_micros)),
        classification,
        PeakResolution::FiveMinute,
    )
}

/// Lower-fidelity variant over persisted half-hourly rows, used by backfill.
pub fn peak_share_half_hourly(
    trading_date: NaiveDate,
    rows: &[HalfHourlyRecord],
    classification: &FacilityClassification,
) -> Option<DailyPeakShare> {
    peak_of(
        trading_date,
        rows.iter()
            .map(|r| (r.interval_start, r.facility_id, r.quantity_micros)),
        classification,
        PeakResolution::HalfHourly,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MICROS_PER_MW;
    use chrono::TimeZone;

    const WIND: i64 = 1;
    const COAL: i64 = 2;
    const BATTERY: i64 = 3;

    fn ident(id: i64, fuel: &str, cat: TechnologyCategory) -> FacilityIdentity {
        FacilityIdentity {
            external_code: format!("F{id}"),
            internal_id: id,
            technology_category: cat,
            fuel_type: fuel.to_string(),
            is_active: true,
        }
    }

    fn classes() -> FacilityClassification {
        let ids = [
            ident(WIND, "Wind", TechnologyCategory::Wind),
            ident(COAL, "COAL", TechnologyCategory::Generator),
            ident(BATTERY, "ELECTRICITY", TechnologyCategory::Storage),
        ];
        FacilityClassification::from_identities(ids.iter())
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, h, m, 0).unwrap()
    }

    fn iv(ts: DateTime<Utc>, facility_id: i64, mw: i64) -> ResolvedInterval {
        ResolvedInterval {
            dispatch_at: ts,
            facility_id,
            quantity_micros: mw * MICROS_PER_MW,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
    }

    #[test]
    fn classification_rules() {
        assert!(is_renewable("solar", TechnologyCategory::Solar));
        assert!(is_renewable(" Biomass ", TechnologyCategory::Generator));
        assert!(is_renewable("ELECTRICITY", TechnologyCategory::Storage));
        assert!(!is_renewable("GAS", TechnologyCategory::Generator));
        assert!(!is_renewable("UNKNOWN", TechnologyCategory::Unknown));
    }

    #[test]
    fn selects_highest_share() {
        let rows = vec![
            iv(at(10, 0), WIND, 80),
            iv(at(10, 0), COAL, 20),
            iv(at(14, 0), WIND, 30),
            iv(at(14, 0), COAL, 20),
        ];
        let peak = peak_share(date(), &rows, &classes()).unwrap();
        assert_eq!(peak.peak_at, at(10, 0));
        assert!((peak.peak_percentage - 80.0).abs() < 1e-9);
        assert_eq!(peak.renewable_micros, 80 * MICROS_PER_MW);
        assert_eq!(peak.total_micros, 100 * MICROS_PER_MW);
        assert_eq!(peak.resolution, PeakResolution::FiveMinute);
    }

    #[test]
    fn ties_keep_earliest_regardless_of_input_order() {
        let rows = vec![
            iv(at(12, 0), WIND, 50),
            iv(at(12, 0), COAL, 50),
            iv(at(9, 0), WIND, 5),
            iv(at(9, 0), COAL, 5),
        ];
        let peak = peak_share(date(), &rows, &classes()).unwrap();
        assert_eq!(peak.peak_at, at(9, 0));
    }

    #[test]
    fn negative_quantities_ignored() {
        // Battery charging must not shrink the total or count as renewable.
        let rows = vec![
            iv(at(10, 0), WIND, 40),
            iv(at(10, 0), COAL, 60),
            iv(at(10, 0), BATTERY, -30),
        ];
        let peak = peak_share(date(), &rows, &classes()).unwrap();
        assert_eq!(peak.total_micros, 100 * MICROS_PER_MW);
        assert!((peak.peak_percentage - 40.0).abs() < 1e-9);
    }

    #[test]
    fn storage_discharge_counts_as_renewable() {
        let rows = vec![iv(at(19, 0), BATTERY, 25), iv(at(19, 0), COAL, 75)];
        let peak = peak_share(date(), &rows, &classes()).unwrap();
        assert!((peak.peak_percentage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn unclassified_facility_counts_toward_total_only() {
        let rows = vec![iv(at(10, 0), WIND, 50), iv(at(10, 0), 999, 50)];
        let peak = peak_share(date(), &rows, &classes()).unwrap();
        assert!((peak.peak_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn none_without_positive_generation() {
        assert!(peak_share(date(), &[], &classes()).is_none());
        let rows = vec![iv(at(1, 0), COAL, 0), iv(at(1, 0), BATTERY, -5)];
        assert!(peak_share(date(), &rows, &classes()).is_none());
    }

    #[test]
    fn half_hourly_variant_marks_resolution() {
        let rows = vec![
            HalfHourlyRecord {
                interval_start: at(10, 30),
                facility_id: WIND,
                quantity_micros: 10 * MICROS_PER_MW,
            },
            HalfHourlyRecord {
                interval_start: at(10, 30),
                facility_id: COAL,
                quantity_micros: 30 * MICROS_PER_MW,
            },
        ];
        let peak = peak_share_half_hourly(date(), &rows, &classes()).unwrap();
        assert_eq!(peak.resolution, PeakResolution::HalfHourly);
        assert!((peak.peak_percentage - 25.0).abs() < 1e-9);
    }
}
