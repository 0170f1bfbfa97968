//! Run orchestration for the xingxiu daily sync.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};
use xingxiu_client::{map_record, ApiConfig, ExportClient, RawRecord};
use xingxiu_core::{parse_date_text, SyncRecord};
use xingxiu_storage::{DbConfig, TelemetryStore};

pub const CRATE_NAME: &str = "xingxiu-sync";

/// Business timezone for day-boundary arithmetic: Asia/Jakarta (WIB), UTC+7,
/// no DST. The upstream reporting day is defined in Jakarta civil time
/// wherever the job happens to run.
pub const WIB_OFFSET_SECS: i32 = 7 * 3600;

/// Environment variables that may carry the export API key, first present
/// wins.
pub const API_KEY_VARS: &[&str] = &["XINGXIU_API_KEY", "API_KEY", "API_TOKEN"];

fn wib() -> FixedOffset {
    FixedOffset::east_opt(WIB_OFFSET_SECS).expect("WIB is a valid offset")
}

/// Resolve the target business date: an explicit non-blank argument wins
/// verbatim (manual backfills pass through unvalidated), otherwise yesterday
/// in WIB. The timezone conversion happens before the date arithmetic.
pub fn resolve_target_date(explicit: Option<&str>, now: DateTime<Utc>) -> String {
    if let Some(arg) = explicit {
        let arg = arg.trim();
        if !arg.is_empty() {
            return arg.to_string();
        }
    }
    let today = now.with_timezone(&wib()).date_naive();
    (today - Days::new(1)).format("%Y-%m-%d").to_string()
}

/// Everything the pipeline needs, sourced from the environment in one place.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub db: DbConfig,
    pub api: ApiConfig,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let db = DbConfig {
            host: require_env("DB_HOST")?,
            port: std::env::var("DB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3306),
            user: require_env("DB_USER")?,
            password: require_env("DB_PASS")?,
            database: require_env("DB_NAME")?,
        };

        let mut api = ApiConfig::default();
        if let Ok(base) = std::env::var("XINGXIU_API_BASE") {
            api.base_url = base;
        }
        if let Some(secs) = std::env::var("XINGXIU_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            api.timeout = Duration::from_secs(secs);
        }
        api.api_key = first_env(API_KEY_VARS);

        Ok(Self { db, api })
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} is not set"))
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
}

/// Per-date outcome counts reported at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct DaySummary {
    pub date: String,
    pub fetched: usize,
    pub skipped: usize,
    pub written: u64,
}

impl DaySummary {
    fn empty(date: &str) -> Self {
        Self {
            date: date.to_string(),
            fetched: 0,
            skipped: 0,
            written: 0,
        }
    }
}

pub struct SyncPipeline {
    client: ExportClient,
    store: TelemetryStore,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let client = ExportClient::new(config.api).context("building export client")?;
        let store = TelemetryStore::connect_lazy(&config.db);
        Ok(Self { client, store })
    }

    /// Sync one business date: fetch, map, filter, upsert, count.
    pub async fn run_for_date(&self, date_str: &str) -> Result<DaySummary> {
        let raw = self
            .client
            .fetch_day(date_str)
            .await
            .with_context(|| format!("fetching export for {date_str}"))?;
        let fetched = raw.len();
        if fetched == 0 {
            info!(date = date_str, "no records for date; nothing to write");
            return Ok(DaySummary::empty(date_str));
        }

        let (records, skipped) = stage_records(&raw, parse_date_text(date_str));
        if skipped > 0 {
            warn!(
                date = date_str,
                skipped, "discarded records without device number or date"
            );
        }

        let written = self
            .store
            .write(&records)
            .await
            .with_context(|| format!("upserting batch for {date_str}"))?;
        info!(date = date_str, fetched, skipped, written, "day synced");
        Ok(DaySummary {
            date: date_str.to_string(),
            fetched,
            skipped,
            written,
        })
    }

    /// Sync an inclusive date range day by day. Fail-fast: the first failing
    /// date aborts the remainder. Completed days stay written, and the range
    /// is safe to re-run because every write is an upsert.
    pub async fn run_range(&self, start: &str, end: &str) -> Result<Vec<DaySummary>> {
        let mut summaries = Vec::new();
        for day in date_span(start, end)? {
            let date_str = day.format("%Y-%m-%d").to_string();
            summaries.push(self.run_for_date(&date_str).await?);
        }
        Ok(summaries)
    }
}

/// Inclusive day range; range arithmetic needs valid `YYYY-MM-DD` bounds
/// even though a single explicit date is passed through unvalidated.
pub fn date_span(start: &str, end: &str) -> Result<Vec<NaiveDate>> {
    let first = parse_range_date(start)?;
    let last = parse_range_date(end)?;
    if first > last {
        bail!("start date {start} is after end date {end}");
    }
    let mut days = Vec::new();
    let mut day = first;
    while day <= last {
        days.push(day);
        day = day + Days::new(1);
    }
    Ok(days)
}

fn parse_range_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid range date {text:?}; expected YYYY-MM-DD"))
}

/// Map raw records onto canonical rows, dropping (and counting) the ones
/// without a usable device number or date.
pub fn stage_records(
    raw: &[RawRecord],
    fallback_date: Option<NaiveDate>,
) -> (Vec<SyncRecord>, usize) {
    let mut records = Vec::with_capacity(raw.len());
    let mut skipped = 0;
    for item in raw {
        match map_record(item, fallback_date) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }
    (records, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn explicit_argument_wins_verbatim() {
        let now = Utc.with_ymd_and_hms(2025, 9, 22, 3, 0, 0).single().unwrap();
        assert_eq!(
            resolve_target_date(Some(" 2024-01-15 "), now),
            "2024-01-15"
        );
        // no validation on purpose
        assert_eq!(resolve_target_date(Some("not-a-date"), now), "not-a-date");
    }

    #[test]
    fn blank_argument_falls_through_to_yesterday() {
        let now = Utc.with_ymd_and_hms(2025, 9, 22, 3, 0, 0).single().unwrap();
        assert_eq!(resolve_target_date(Some("   "), now), "2025-09-21");
        assert_eq!(resolve_target_date(None, now), "2025-09-21");
    }

    #[test]
    fn yesterday_is_computed_in_jakarta_time() {
        // 18:30 UTC is already 01:30 the next day in WIB
        let late_utc = Utc
            .with_ymd_and_hms(2025, 9, 21, 18, 30, 0)
            .single()
            .unwrap();
        assert_eq!(resolve_target_date(None, late_utc), "2025-09-21");

        // 16:59 UTC is still 23:59 the same day in WIB
        let earlier = Utc
            .with_ymd_and_hms(2025, 9, 21, 16, 59, 0)
            .single()
            .unwrap();
        assert_eq!(resolve_target_date(None, earlier), "2025-09-20");
    }

    #[test]
    fn date_span_is_inclusive() {
        let days = date_span("2025-09-20", "2025-09-22").unwrap();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], NaiveDate::from_ymd_opt(2025, 9, 20).unwrap());
        assert_eq!(days[2], NaiveDate::from_ymd_opt(2025, 9, 22).unwrap());

        let single = date_span("2025-09-21", "2025-09-21").unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn date_span_rejects_inverted_and_malformed_bounds() {
        assert!(date_span("2025-09-22", "2025-09-21").is_err());
        assert!(date_span("garbage", "2025-09-21").is_err());
    }

    #[test]
    fn staging_counts_disqualified_records() {
        let raw: Vec<RawRecord> = [
            json!({"deviceNo": "D1", "dateStr": "2025-09-21"}),
            json!({"projectName": "no device id"}),
            json!({"deviceNo": "D2"}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

        let fallback = parse_date_text("2025-09-21");
        let (records, skipped) = stage_records(&raw, fallback);
        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 1);
        // the fallback filled D2's missing per-record date
        assert_eq!(records[1].date, fallback.unwrap());

        // without a fallback, the dateless record is disqualified too
        let (records, skipped) = stage_records(&raw, None);
        assert_eq!(records.len(), 1);
        assert_eq!(skipped, 2);
    }
}
