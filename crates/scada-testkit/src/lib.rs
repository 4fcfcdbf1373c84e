//! scada-testkit
//!
//! In-memory collaborators for scenario tests: a store implementing both
//! [`FacilityStore`] and [`ScadaStore`], a scripted [`ScadaSource`], and
//! builders for synthetic trading-day payloads.

mod memory;
mod scripted;

pub use memory::MemoryStore;
pub use scripted::{Scripted, ScriptedSource};

use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};

use scada_md::{FacilityIdentity, MarketCalendar, TechnologyCategory};

/// Dispatch intervals in one trading day.
pub const INTERVALS_PER_DAY: usize = 288;

pub fn identity(code: &str, id: i64, fuel: &str, category: TechnologyCategory) -> FacilityIdentity {
    FacilityIdentity {
        external_code: code.to_string(),
        internal_id: id,
        technology_category: category,
        fuel_type: fuel.to_string(),
        is_active: true,
    }
}

/// A wind farm, a coal unit and a battery: enough to exercise renewable share.
pub fn sample_fleet() -> Vec<FacilityIdentity> {
    vec![
        identity("ALINTA_WWF", 1, "WIND", TechnologyCategory::Wind),
        identity("MUJA_G7", 2, "COAL", TechnologyCategory::Generator),
        identity("KWINANA_BESS1", 3, "ELECTRICITY", TechnologyCategory::Storage),
    ]
}

/// One day of 5-minute samples in the nested `data` envelope, constant MW per
/// facility, timestamps in market time with offset.
pub fn day_document(calendar: &MarketCalendar, date: NaiveDate, facilities: &[(&str, &str)]) -> Value {
    day_document_with(calendar, date, facilities, INTERVALS_PER_DAY)
}

/// Like [`day_document`] but only the first `intervals` samples of the day.
pub fn day_document_with(
    calendar: &MarketCalendar,
    date: NaiveDate,
    facilities: &[(&str, &str)],
    intervals: usize,
) -> Value {
    let tz = calendar.timezone();
    let Ok(window) = calendar.window(date) else {
        return json!({"data": {"facilityScadaDispatchIntervals": []}});
    };

    let mut rows = Vec::with_capacity(intervals * facilities.len());
    for i in 0..intervals {
        let at = window.start + Duration::minutes(5 * i as i64);
        let stamp = at.with_timezone(&tz).to_rfc3339();
        for (code, mw) in facilities {
            rows.push(json!({
                "dispatchInterval": stamp,
                "code": code,
                "quantity": mw,
            }));
        }
    }
    json!({"data": {"facilityScadaDispatchIntervals": rows}})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_day_has_288_rows_per_facility() {
        let cal = MarketCalendar::perth();
        let d = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let doc = day_document(&cal, d, &[("A", "1.5"), ("B", "2")]);
        let rows = doc["data"]["facilityScadaDispatchIntervals"].as_array().unwrap();
        assert_eq!(rows.len(), 2 * INTERVALS_PER_DAY);
        assert_eq!(rows[0]["dispatchInterval"], "2024-01-03T00:00:00+08:00");
    }
}
