//! Canonical row model and permissive field coercion for the xingxiu sync.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CRATE_NAME: &str = "xingxiu-core";

/// Stored width of `DEVICE_NO`; longer upstream values are truncated.
pub const DEVICE_NO_MAX_LEN: usize = 64;

/// One device's telemetry for one business date, as persisted in the
/// `xingxiu` table. (`device_no`, `date`) is the natural key; everything
/// else is overwritten on re-sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub device_no: String,
    pub date: NaiveDate,
    pub project_name: Option<String>,
    pub mechanical_no: Option<String>,
    pub rent_type: Option<String>,
    pub type_name: Option<String>,
    pub car_type: Option<String>,
    pub company_assets: Option<String>,
    pub belong_land: Option<String>,
    pub valid_duration: Option<Decimal>,
    pub idling_duration: Option<Decimal>,
    pub valid_percent: Option<Decimal>,
    pub day_oil: Option<Decimal>,
    pub day_refuel: Option<Decimal>,
    pub day_mileage: Option<Decimal>,
    pub workhour_avg_oil: Option<Decimal>,
    pub transport_avg_oil: Option<Decimal>,
    pub create_time: Option<NaiveDateTime>,
    pub score: Option<i64>,
    pub summary: Option<String>,
}

/// Civil-date formats tried in order by [`coerce_date`]; first match wins.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%d-%m-%Y", "%d/%m/%Y"];

/// Datetime formats tried in order by [`coerce_datetime`].
pub const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Text treated as "no value" before any parse is attempted.
const NULL_LIKE: &[&str] = &["", "null", "none", "-"];

/// First candidate key whose value is present and non-null.
pub fn first_present<'a>(map: &'a Map<String, Value>, candidates: &[&str]) -> Option<&'a Value> {
    candidates
        .iter()
        .find_map(|key| map.get(*key).filter(|v| !v.is_null()))
}

fn meaningful_text(value: &Value) -> Option<&str> {
    non_null_text(value.as_str()?)
}

/// Coerce a loosely-typed upstream value into a decimal quantity. Strings
/// may carry thousands-separator commas; anything unparseable is missing,
/// never an error.
pub fn coerce_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(Decimal::from(i));
            }
            n.as_f64().and_then(Decimal::from_f64_retain)
        }
        Value::String(_) => {
            let cleaned = meaningful_text(value)?.replace(',', "");
            cleaned.parse::<Decimal>().ok().or_else(|| {
                cleaned
                    .parse::<f64>()
                    .ok()
                    .and_then(Decimal::from_f64_retain)
            })
        }
        _ => None,
    }
}

/// Like [`coerce_decimal`] but truncating to an integer.
pub fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(_) => {
            let cleaned = meaningful_text(value)?.replace(',', "");
            cleaned
                .parse::<i64>()
                .ok()
                .or_else(|| cleaned.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

/// Coerce a civil date through the [`DATE_FORMATS`] cascade, falling back to
/// a generic RFC 3339 parse (trailing `Z` accepted) and taking its date
/// component.
pub fn coerce_date(value: &Value) -> Option<NaiveDate> {
    parse_date_text(value.as_str()?)
}

/// String form of [`coerce_date`], for callers that already hold text.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = non_null_text(text)?;
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    generic_datetime(text).map(|dt| dt.date())
}

/// Coerce a timestamp through the [`DATETIME_FORMATS`] cascade with the same
/// generic fallback as [`coerce_date`].
pub fn coerce_datetime(value: &Value) -> Option<NaiveDateTime> {
    let text = non_null_text(value.as_str()?)?;
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    generic_datetime(text)
}

fn non_null_text(text: &str) -> Option<&str> {
    let text = text.trim();
    if NULL_LIKE.iter().any(|n| text.eq_ignore_ascii_case(n)) {
        None
    } else {
        Some(text)
    }
}

// naive_local keeps the civil time as written; the upstream stamps are
// already in the business timezone.
fn generic_datetime(text: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.naive_local())
}
