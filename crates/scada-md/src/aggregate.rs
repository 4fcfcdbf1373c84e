//! 5-minute -> half-hourly aggregation.
//!
//! Samples are grouped by `(bucket, facility_id)` where the bucket is the
//! timestamp floored to the preceding :00 or :30. One convention is applied
//! per delivery channel; the two are not interchangeable.

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{HalfHourlyRecord, ResolvedInterval, HALF_HOUR_SECS, SAMPLES_PER_BUCKET};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationConvention {
    /// Samples are MW rates; the bucket value is their arithmetic mean.
    Mean,
    /// Samples are 5-minute energy slices; the bucket value is their sum.
    Sum,
}

impl AggregationConvention {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationConvention::Mean => "mean",
            AggregationConvention::Sum => "sum",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "avg" | "average" => Ok(AggregationConvention::Mean),
            "sum" => Ok(AggregationConvention::Sum),
            other => Err(anyhow!(
                "invalid aggregation convention '{}'. expected one of: mean | sum",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub input_samples: usize,
    pub buckets: usize,
    /// Buckets with a sample count other than six. Emitted anyway.
    pub incomplete_buckets: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    /// Sorted by `(interval_start, facility_id)`.
    pub records: Vec<HalfHourlyRecord>,
    pub report: AggregationReport,
}

/// Floor to the preceding half-hour boundary.
pub fn bucket_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(HALF_HOUR_SECS);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(ts)
}

/// Integer division rounded half away from zero. `d` must be positive.
fn div_round(n: i64, d: i64) -> i64 {
    let q = n / d;
    let r = n % d;
    if r.unsigned_abs() * 2 >= d.unsigned_abs() {
        q + n.signum()
    } else {
        q
    }
}

/// One sample per `(dispatch_at, facility_id)`, last one wins. The kept
/// sample stays at the position of the first occurrence.
pub fn collapse_duplicates(intervals: Vec<ResolvedInterval>) -> (Vec<ResolvedInterval>, usize) {
    let mut slot: HashMap<(DateTime<Utc>, i64), usize> = HashMap::with_capacity(intervals.len());
    let mut out: Vec<ResolvedInterval> = Vec::with_capacity(intervals.len());
    let mut duplicates = 0;
    for iv in intervals {
        match slot.get(&(iv.dispatch_at, iv.facility_id)) {
            Some(&i) => {
                out[i] = iv;
                duplicates += 1;
            }
            None => {
                slot.insert((iv.dispatch_at, iv.facility_id), out.len());
                out.push(iv);
            }
        }
    }
    (out, duplicates)
}

pub fn aggregate(intervals: &[ResolvedInterval], convention: AggregationConvention) -> Aggregation {
    let mut groups: BTreeMap<(DateTime<Utc>, i64), (i64, usize)> = BTreeMap::new();
    for iv in intervals {
        let slot = groups
            .entry((bucket_start(iv.dispatch_at), iv.facility_id))
            .or_insert((0, 0));
        slot.0 = slot.0.saturating_add(iv.quantity_micros);
        slot.1 += 1;
    }

    let mut report = AggregationReport {
        input_samples: intervals.len(),
        buckets: groups.len(),
        incomplete_buckets: 0,
    };

    let records = groups
        .into_iter()
        .map(|((interval_start, facility_id), (sum, count))| {
            if count != SAMPLES_PER_BUCKET {
                report.incomplete_buckets += 1;
            }
            let quantity_micros = match convention {
                AggregationConvention::Sum => sum,
                AggregationConvention::Mean => div_round(sum, count as i64),
            };
            HalfHourlyRecord {
                interval_start,
                facility_id,
                quantity_micros,
            }
        })
        .collect();

    Aggregation { records, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, h, m, 0).unwrap()
    }

    fn samples(facility_id: i64, start: DateTime<Utc>, values: &[i64]) -> Vec<ResolvedInterval> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| ResolvedInterval {
                dispatch_at: start + Duration::minutes(5 * i as i64),
                facility_id,
                quantity_micros: *v,
            })
            .collect()
    }

    #[test]
    fn bucket_floor() {
        assert_eq!(bucket_start(at(10, 0)), at(10, 0));
        assert_eq!(bucket_start(at(10, 25)), at(10, 0));
        assert_eq!(bucket_start(at(10, 30)), at(10, 30));
        assert_eq!(bucket_start(at(10, 59)), at(10, 30));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(div_round(7, 2), 4);
        assert_eq!(div_round(-7, 2), -4);
        assert_eq!(div_round(5, 3), 2);
        assert_eq!(div_round(4, 3), 1);
    }

    #[test]
    fn mean_and_sum_of_complete_bucket() {
        let rows = samples(1, at(10, 0), &[1, 2, 3, 4, 5, 6]);
        let mean = aggregate(&rows, AggregationConvention::Mean);
        assert_eq!(mean.records.len(), 1);
        assert_eq!(mean.records[0].quantity_micros, 4); // 21 / 6 = 3.5
        assert_eq!(mean.report.incomplete_buckets, 0);

        let sum = aggregate(&rows, AggregationConvention::Sum);
        assert_eq!(sum.records[0].quantity_micros, 21);
    }

    #[test]
    fn incomplete_bucket_still_emitted() {
        let rows = samples(1, at(10, 0), &[10, 10, 10, 10, 10]);
        let agg = aggregate(&rows, AggregationConvention::Mean);
        assert_eq!(agg.records.len(), 1);
        assert_eq!(agg.records[0].quantity_micros, 10);
        assert_eq!(agg.report.incomplete_buckets, 1);
        assert_eq!(agg.report.input_samples, 5);
    }

    #[test]
    fn output_sorted_by_bucket_then_facility() {
        let mut rows = samples(9, at(10, 30), &[1; 6]);
        rows.extend(samples(2, at(10, 0), &[1; 6]));
        rows.extend(samples(1, at(10, 30), &[1; 6]));
        let agg = aggregate(&rows, AggregationConvention::Sum);
        let keys: Vec<(DateTime<Utc>, i64)> = agg
            .records
            .iter()
            .map(|r| (r.interval_start, r.facility_id))
            .collect();
        assert_eq!(keys, vec![(at(10, 0), 2), (at(10, 30), 1), (at(10, 30), 9)]);
        assert_eq!(agg.report.buckets, 3);
    }

    #[test]
    fn repeated_sample_collapses_to_last_value() {
        let rows = vec![
            ResolvedInterval { dispatch_at: at(10, 0), facility_id: 1, quantity_micros: 50 },
            ResolvedInterval { dispatch_at: at(10, 0), facility_id: 2, quantity_micros: 50 },
            ResolvedInterval { dispatch_at: at(10, 5), facility_id: 2, quantity_micros: 7 },
            ResolvedInterval { dispatch_at: at(10, 0), facility_id: 2, quantity_micros: 60 },
        ];
        let (kept, duplicates) = collapse_duplicates(rows);
        assert_eq!(duplicates, 1);
        let view: Vec<(i64, i64)> = kept.iter().map(|r| (r.facility_id, r.quantity_micros)).collect();
        assert_eq!(view, vec![(1, 50), (2, 60), (2, 7)]);

        let agg = aggregate(&kept, AggregationConvention::Sum);
        let two = agg.records.iter().find(|r| r.facility_id == 2).unwrap();
        assert_eq!(two.quantity_micros, 67);
        assert_eq!(agg.report.input_samples, 3);
    }

    #[test]
    fn convention_parse() {
        assert_eq!(AggregationConvention::parse("MEAN").unwrap(), AggregationConvention::Mean);
        assert_eq!(AggregationConvention::parse("sum").unwrap(), AggregationConvention::Sum);
        assert!(AggregationConvention::parse("median").is_err());
    }
}
