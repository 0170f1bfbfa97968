//! Export-API client and raw-record mapping for the xingxiu sync.

use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use xingxiu_core::{
    coerce_date, coerce_datetime, coerce_decimal, coerce_integer, first_present, SyncRecord,
    DEVICE_NO_MAX_LEN,
};

pub const CRATE_NAME: &str = "xingxiu-client";

/// Fixed path of the AI-export reporting endpoint.
pub const EXPORT_PATH: &str = "/admin/common/mechanical/ai_export";

/// Response-envelope keys that may carry the record list, in priority order.
pub const LIST_KEYS: &[&str] = &["dataList", "result", "data"];

/// Raw-record keys that may carry the device number, in priority order.
pub const DEVICE_KEYS: &[&str] = &["deviceNo", "DEVICE_NO"];

/// Raw-record keys that may carry the per-record business date.
pub const DATE_KEYS: &[&str] = &["dateStr", "DATE_STR"];

/// One upstream record as it arrives: arbitrary scalars under camelCase keys.
pub type RawRecord = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://119.47.88.14:81".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("export request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("export returned http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Clone)]
pub struct ExportClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ExportClient {
    pub fn new(config: ApiConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    /// Fetch one business date's raw records. Single attempt, no retry.
    ///
    /// The request is a POST carrying `dateStr` (and `key` when configured)
    /// as query parameters, not a JSON body — the upstream answers the wrong
    /// shape with well-formed zeroed data instead of an error.
    pub async fn fetch_day(&self, date: &str) -> Result<Vec<RawRecord>, ClientError> {
        let url = format!("{}{}", self.base_url, EXPORT_PATH);
        let mut query: Vec<(&str, &str)> = vec![("dateStr", date)];
        if let Some(key) = self.api_key.as_deref() {
            query.push(("key", key));
        }

        info!(%url, date, has_key = self.api_key.is_some(), "requesting export");
        let response = self.http.post(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let body: Value = response.json().await?;
        let records = extract_records(body);
        info!(date, count = records.len(), "export response parsed");
        if let Some(first) = records.first() {
            let sample = Value::Object(first.clone());
            debug!(sample = %sample, "first record");
        }
        Ok(records)
    }
}

/// Pull the flat record list out of the response envelope. The list may be
/// the top-level value itself or sit under the first [`LIST_KEYS`] entry
/// holding an array; anything else is "no data", not an error.
pub fn extract_records(body: Value) -> Vec<RawRecord> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(map) => {
            match LIST_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array))
            {
                Some(items) => items.clone(),
                None => {
                    warn!("no record list in export response envelope");
                    Vec::new()
                }
            }
        }
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// Map one raw upstream record onto the canonical row. `None` means the
/// record is disqualified: no usable device number, or no date resolvable
/// even through `fallback_date`. Field-level failures degrade to missing
/// values instead.
pub fn map_record(raw: &RawRecord, fallback_date: Option<NaiveDate>) -> Option<SyncRecord> {
    let device_no = device_no(raw)?;
    let date = first_present(raw, DATE_KEYS)
        .and_then(coerce_date)
        .or(fallback_date)?;

    Some(SyncRecord {
        device_no,
        date,
        project_name: text_field(raw, "projectName"),
        mechanical_no: text_field(raw, "mechanicalNo"),
        rent_type: text_field(raw, "rentType"),
        type_name: text_field(raw, "typeName"),
        car_type: text_field(raw, "carType"),
        company_assets: text_field(raw, "companyAssets"),
        belong_land: text_field(raw, "belongLand"),
        valid_duration: decimal_field(raw, "validDuration"),
        idling_duration: decimal_field(raw, "idlingDuration"),
        valid_percent: decimal_field(raw, "validPercent"),
        day_oil: decimal_field(raw, "dayOil"),
        day_refuel: decimal_field(raw, "dayRefuel"),
        day_mileage: decimal_field(raw, "dayMileage"),
        workhour_avg_oil: decimal_field(raw, "workhourAvgOil"),
        transport_avg_oil: decimal_field(raw, "transportAvgOil"),
        create_time: raw.get("createTime").and_then(coerce_datetime),
        score: raw.get("score").and_then(coerce_integer),
        summary: text_field(raw, "summary"),
    })
}

fn device_no(raw: &RawRecord) -> Option<String> {
    DEVICE_KEYS
        .iter()
        .find_map(|key| {
            raw.get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .map(|s| s.chars().take(DEVICE_NO_MAX_LEN).collect())
}

// Categorical/free-text fields pass through verbatim; no trimming.
fn text_field(raw: &RawRecord, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

fn decimal_field(raw: &RawRecord, key: &str) -> Option<rust_decimal::Decimal> {
    raw.get(key).and_then(coerce_decimal)
}
