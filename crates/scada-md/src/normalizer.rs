//! Record normalization for facility SCADA payloads.
//!
//! Converts decoded JSON documents into [`RawInterval`] values with integer
//! micro-MW quantities and UTC timestamps, then resolves facility codes to
//! internal ids through the [`FacilityRegistry`].
//!
//! Envelope shapes are handled by an ordered strategy table; the first
//! strategy that recognises a document wins. Individual records with missing
//! or unreadable fields are dropped and counted, never fatal.

use std::fmt;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::registry::FacilityRegistry;
use crate::source::RawPayload;
use crate::{MarketCalendar, RawInterval, ResolvedInterval, MICROS_PER_MW};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Document-level failures. Fatal for the trading date being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// No envelope strategy recognised the document.
    UnknownShape { document: String, keys: Vec<String> },
    /// The payload carried no documents at all.
    NoDocuments,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::UnknownShape { document, keys } => write!(
                f,
                "unrecognised payload shape in {document} (top-level keys: {})",
                keys.join(",")
            ),
            PayloadError::NoDocuments => write!(f, "payload contains no documents"),
        }
    }
}

impl std::error::Error for PayloadError {}

/// Failures converting a quantity to micro-MW.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    Empty,
    Invalid(String),
    OutOfRange(String),
}

impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantityError::Empty => write!(f, "quantity is empty"),
            QuantityError::Invalid(raw) => write!(f, "quantity could not be parsed: '{raw}'"),
            QuantityError::OutOfRange(raw) => write!(f, "quantity out of range: '{raw}'"),
        }
    }
}

impl std::error::Error for QuantityError {}

// ---------------------------------------------------------------------------
// Quantity conversion
// ---------------------------------------------------------------------------

/// Convert decimal MW text to integer micro-MW.
///
/// Accepts an optional sign and fractional part. Digits beyond the sixth
/// decimal place are rounded half away from zero. Exponent notation
/// (`1.5e2`) goes through `f64` and is rounded the same way.
pub fn mw_to_micros(raw: &str) -> Result<i64, QuantityError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }

    if s.contains(['e', 'E']) {
        return exponent_to_micros(s);
    }

    let (negative, digits) = if let Some(rest) = s.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest)
    } else {
        (false, s)
    };

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(QuantityError::Invalid(s.to_string()));
    }

    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse::<i64>()
            .map_err(|_| QuantityError::OutOfRange(s.to_string()))?
    };

    let (kept, rest) = frac_part.split_at(frac_part.len().min(6));
    let mut frac_padded = kept.to_string();
    while frac_padded.len() < 6 {
        frac_padded.push('0');
    }
    let frac_val: i64 = frac_padded
        .parse::<i64>()
        .map_err(|_| QuantityError::Invalid(s.to_string()))?;
    let round_up = rest.as_bytes().first().is_some_and(|b| *b >= b'5');

    let magnitude = int_val
        .checked_mul(MICROS_PER_MW)
        .and_then(|v| v.checked_add(frac_val))
        .and_then(|v| v.checked_add(i64::from(round_up)))
        .ok_or_else(|| QuantityError::OutOfRange(s.to_string()))?;

    Ok(if negative { -magnitude } else { magnitude })
}

fn exponent_to_micros(s: &str) -> Result<i64, QuantityError> {
    let v: f64 = s
        .parse()
        .map_err(|_| QuantityError::Invalid(s.to_string()))?;
    if !v.is_finite() {
        return Err(QuantityError::Invalid(s.to_string()));
    }
    let scaled = (v * MICROS_PER_MW as f64).round();
    if scaled.abs() >= i64::MAX as f64 {
        return Err(QuantityError::OutOfRange(s.to_string()));
    }
    Ok(scaled as i64)
}

/// A JSON number or numeric string, as micro-MW.
pub fn quantity_value_to_micros(v: &Value) -> Result<i64, QuantityError> {
    match v {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i
                .checked_mul(MICROS_PER_MW)
                .ok_or_else(|| QuantityError::OutOfRange(n.to_string())),
            None => mw_to_micros(&n.to_string()),
        },
        Value::String(s) => mw_to_micros(s),
        other => Err(QuantityError::Invalid(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// RFC 3339 (any offset), or a naive ISO timestamp interpreted in market time.
pub fn parse_dispatch_time(raw: &str, calendar: &MarketCalendar) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|naive| calendar.localize(naive))
}

// ---------------------------------------------------------------------------
// Envelope strategies
// ---------------------------------------------------------------------------

struct EnvelopeStrategy {
    name: &'static str,
    extract: fn(&Value) -> Option<&Vec<Value>>,
}

const INTERVALS_KEY: &str = "facilityScadaDispatchIntervals";
const INTERVALS_KEY_SNAKE: &str = "facility_scada_dispatch_intervals";

fn nested_data(doc: &Value) -> Option<&Vec<Value>> {
    let data = doc.get("data")?;
    data.get(INTERVALS_KEY)
        .or_else(|| data.get(INTERVALS_KEY_SNAKE))?
        .as_array()
}

fn flattened(doc: &Value) -> Option<&Vec<Value>> {
    doc.get(INTERVALS_KEY)
        .or_else(|| doc.get(INTERVALS_KEY_SNAKE))?
        .as_array()
}

fn bare_array(doc: &Value) -> Option<&Vec<Value>> {
    doc.as_array()
}

/// Tried in order; first match wins.
const STRATEGIES: &[EnvelopeStrategy] = &[
    EnvelopeStrategy {
        name: "nested_data",
        extract: nested_data,
    },
    EnvelopeStrategy {
        name: "flattened",
        extract: flattened,
    },
    EnvelopeStrategy {
        name: "bare_array",
        extract: bare_array,
    },
];

/// Locate the interval list in one document. Returns the strategy name and the records.
pub fn extract_intervals<'a>(
    document: &str,
    doc: &'a Value,
) -> Result<(&'static str, &'a [Value]), PayloadError> {
    for strategy in STRATEGIES {
        if let Some(records) = (strategy.extract)(doc) {
            return Ok((strategy.name, records.as_slice()));
        }
    }

    let keys = match doc {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Null => vec!["<null>".to_string()],
        Value::Bool(_) => vec!["<bool>".to_string()],
        Value::Number(_) => vec!["<number>".to_string()],
        Value::String(_) => vec!["<string>".to_string()],
        Value::Array(_) => Vec::new(),
    };
    Err(PayloadError::UnknownShape {
        document: document.to_string(),
        keys,
    })
}

// ---------------------------------------------------------------------------
// Field aliases
// ---------------------------------------------------------------------------

const TIMESTAMP_ALIASES: &[&str] = &["dispatchInterval", "dispatch_interval"];
const CODE_ALIASES: &[&str] = &["code", "facilityCode", "facility_code"];
const QUANTITY_ALIASES: &[&str] = &["quantity", "mw"];

/// First alias present with a non-null value. `0` and `""` count as present.
fn first_present<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

// ---------------------------------------------------------------------------
// Parse report
// ---------------------------------------------------------------------------

/// Per-cause counters for one payload. Dropped records appear only here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub documents: usize,
    /// Envelope strategy that matched each document, in document order.
    pub shapes: Vec<&'static str>,
    pub records_seen: usize,
    pub accepted: usize,
    pub not_an_object: usize,
    pub missing_timestamp: usize,
    pub bad_timestamp: usize,
    pub missing_code: usize,
    pub missing_quantity: usize,
    pub bad_quantity: usize,
}

impl ParseReport {
    pub fn dropped(&self) -> usize {
        self.not_an_object
            + self.missing_timestamp
            + self.bad_timestamp
            + self.missing_code
            + self.missing_quantity
            + self.bad_quantity
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    calendar: MarketCalendar,
}

impl Normalizer {
    pub fn new(calendar: MarketCalendar) -> Self {
        Self { calendar }
    }

    /// Extract raw intervals from every document, in document then encounter order.
    pub fn normalize(
        &self,
        payload: &RawPayload,
    ) -> Result<(Vec<RawInterval>, ParseReport), PayloadError> {
        if payload.documents.is_empty() {
            return Err(PayloadError::NoDocuments);
        }

        let mut report = ParseReport::default();
        let mut out = Vec::new();

        for doc in &payload.documents {
            let (shape, records) = extract_intervals(&doc.name, &doc.body)?;
            report.documents += 1;
            report.shapes.push(shape);

            for rec in records {
                report.records_seen += 1;
                if let Some(interval) = self.normalize_record(rec, &mut report) {
                    out.push(interval);
                }
            }
        }

        report.accepted = out.len();
        Ok((out, report))
    }

    fn normalize_record(&self, rec: &Value, report: &mut ParseReport) -> Option<RawInterval> {
        let Some(obj) = rec.as_object() else {
            report.not_an_object += 1;
            return None;
        };

        let Some(ts) = first_present(obj, TIMESTAMP_ALIASES) else {
            report.missing_timestamp += 1;
            return None;
        };
        let Some(dispatch_at) = ts
            .as_str()
            .and_then(|s| parse_dispatch_time(s, &self.calendar))
        else {
            report.bad_timestamp += 1;
            return None;
        };

        let code = match first_present(obj, CODE_ALIASES) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        if code.is_empty() {
            report.missing_code += 1;
            return None;
        }

        let Some(q) = first_present(obj, QUANTITY_ALIASES) else {
            report.missing_quantity += 1;
            return None;
        };
        let quantity_micros = match quantity_value_to_micros(q) {
            Ok(v) => v,
            Err(QuantityError::Empty) => {
                report.missing_quantity += 1;
                return None;
            }
            Err(_) => {
                report.bad_quantity += 1;
                return None;
            }
        };

        Some(RawInterval {
            dispatch_at,
            facility_code: code,
            quantity_micros,
        })
    }

    /// Normalize, then resolve every surviving facility code through the registry.
    ///
    /// Unknown codes are provisioned by the registry. A registry store failure
    /// fails the whole payload.
    pub async fn parse(
        &self,
        payload: &RawPayload,
        registry: &FacilityRegistry,
    ) -> Result<(Vec<ResolvedInterval>, ParseReport)> {
        let (raw, report) = self.normalize(payload)?;

        let mut resolved = Vec::with_capacity(raw.len());
        for r in raw {
            let facility_id = registry.resolve(&r.facility_code).await?;
            resolved.push(ResolvedInterval {
                dispatch_at: r.dispatch_at,
                facility_id,
                quantity_micros: r.quantity_micros,
            });
        }

        if report.dropped() > 0 {
            tracing::debug!(
                date = %payload.trading_date,
                dropped = report.dropped(),
                missing_timestamp = report.missing_timestamp,
                bad_timestamp = report.bad_timestamp,
                missing_code = report.missing_code,
                missing_quantity = report.missing_quantity,
                bad_quantity = report.bad_quantity,
                "records dropped during normalization"
            );
        }

        Ok((resolved, report))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
