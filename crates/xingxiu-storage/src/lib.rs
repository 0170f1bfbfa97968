//! MySQL destination for synced telemetry rows.

use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, QueryBuilder};
use thiserror::Error;
use tracing::info;
use xingxiu_core::SyncRecord;

pub const CRATE_NAME: &str = "xingxiu-storage";

/// Destination table; the name is fixed on the reporting side.
pub const TABLE: &str = "xingxiu";

const CREATE_TABLE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS `xingxiu` (
    `ID`                 BIGINT UNSIGNED NOT NULL AUTO_INCREMENT COMMENT '自增主键',
    `DEVICE_NO`          VARCHAR(64)     NOT NULL COMMENT '工时通设备编号',
    `PROJECT_NAME`       VARCHAR(128)             COMMENT '项目名称',
    `MECHANICAL_NO`      VARCHAR(64)              COMMENT '园区机械编号',
    `DATE_STR`           DATE            NOT NULL COMMENT '日期',
    `RENT_TYPE`          VARCHAR(64)              COMMENT '租用方式',
    `TYPE_NAME`          VARCHAR(128)             COMMENT '机械品牌/类别/型号',
    `CAR_TYPE`           VARCHAR(64)              COMMENT '车辆/机械类别',
    `COMPANY_ASSETS`     VARCHAR(64)              COMMENT '公司资产',
    `BELONG_LAND`        VARCHAR(128)             COMMENT '所属地块',
    `VALID_DURATION`     DECIMAL(10,2)            COMMENT '有效工时',
    `IDLING_DURATION`    DECIMAL(10,2)            COMMENT '怠速工时',
    `VALID_PERCENT`      DECIMAL(10,2)            COMMENT '工时有效比(%)',
    `DAY_OIL`            DECIMAL(12,2)            COMMENT '日油耗',
    `DAY_REFUEL`         DECIMAL(12,2)            COMMENT '日加油量',
    `DAY_MILEAGE`        DECIMAL(12,2)            COMMENT '日里程',
    `WORKHOUR_AVG_OIL`   DECIMAL(12,2)            COMMENT '工时平均油耗',
    `TRANSPORT_AVG_OIL`  DECIMAL(12,2)            COMMENT '运输平均油耗',
    `CREATE_TIME`        DATETIME                 COMMENT '设备录入时间',
    `SCORE`              INT                      COMMENT 'AI 评分',
    `SUMMARY`            TEXT                     COMMENT 'AI 总结',
    PRIMARY KEY (`ID`),
    UNIQUE KEY `uk_device_date` (`DEVICE_NO`, `DATE_STR`),
    KEY `idx_date` (`DATE_STR`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COMMENT='工时通设备日报(含 AI 评分/总结)'
";

/// Every column except the natural key; each one is overwritten on conflict.
const NON_KEY_COLUMNS: &[&str] = &[
    "PROJECT_NAME",
    "MECHANICAL_NO",
    "RENT_TYPE",
    "TYPE_NAME",
    "CAR_TYPE",
    "COMPANY_ASSETS",
    "BELONG_LAND",
    "VALID_DURATION",
    "IDLING_DURATION",
    "VALID_PERCENT",
    "DAY_OIL",
    "DAY_REFUEL",
    "DAY_MILEAGE",
    "WORKHOUR_AVG_OIL",
    "TRANSPORT_AVG_OIL",
    "CREATE_TIME",
    "SCORE",
    "SUMMARY",
];

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub struct TelemetryStore {
    pool: MySqlPool,
}

impl TelemetryStore {
    /// Build a store over a lazy pool; no connection is opened until the
    /// first statement runs.
    pub fn connect_lazy(config: &DbConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .charset("utf8mb4");
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy_with(options);
        Self { pool }
    }

    /// Idempotently create the destination table. Any run may create it.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Upsert a batch of rows keyed on (`DEVICE_NO`, `DATE_STR`) in one
    /// transaction. Last write wins on every non-key column; a failure rolls
    /// back the whole batch. Returns the number of records submitted.
    pub async fn write(&self, records: &[SyncRecord]) -> Result<u64, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await?;
        let mut query = upsert_query(records);
        let result = query.build().execute(&mut *tx).await?;
        tx.commit().await?;

        info!(
            table = TABLE,
            records = records.len(),
            affected = result.rows_affected(),
            "batch upserted"
        );
        Ok(records.len() as u64)
    }
}

/// One multi-row `INSERT ... ON DUPLICATE KEY UPDATE` covering the batch.
fn upsert_query(records: &[SyncRecord]) -> QueryBuilder<'_, MySql> {
    let mut query = QueryBuilder::new(
        "INSERT INTO `xingxiu` (`DEVICE_NO`, `DATE_STR`, `PROJECT_NAME`, `MECHANICAL_NO`, \
         `RENT_TYPE`, `TYPE_NAME`, `CAR_TYPE`, `COMPANY_ASSETS`, `BELONG_LAND`, \
         `VALID_DURATION`, `IDLING_DURATION`, `VALID_PERCENT`, `DAY_OIL`, `DAY_REFUEL`, \
         `DAY_MILEAGE`, `WORKHOUR_AVG_OIL`, `TRANSPORT_AVG_OIL`, `CREATE_TIME`, `SCORE`, \
         `SUMMARY`) ",
    );

    query.push_values(records, |mut row, record| {
        row.push_bind(&record.device_no)
            .push_bind(record.date)
            .push_bind(&record.project_name)
            .push_bind(&record.mechanical_no)
            .push_bind(&record.rent_type)
            .push_bind(&record.type_name)
            .push_bind(&record.car_type)
            .push_bind(&record.company_assets)
            .push_bind(&record.belong_land)
            .push_bind(record.valid_duration)
            .push_bind(record.idling_duration)
            .push_bind(record.valid_percent)
            .push_bind(record.day_oil)
            .push_bind(record.day_refuel)
            .push_bind(record.day_mileage)
            .push_bind(record.workhour_avg_oil)
            .push_bind(record.transport_avg_oil)
            .push_bind(record.create_time)
            .push_bind(record.score)
            .push_bind(&record.summary);
    });

    query.push(" ON DUPLICATE KEY UPDATE ");
    let mut assignments = query.separated(", ");
    for column in NON_KEY_COLUMNS {
        assignments.push(format!("`{column}` = VALUES(`{column}`)"));
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sqlx::Execute;

    fn record(device_no: &str) -> SyncRecord {
        SyncRecord {
            device_no: device_no.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, 21).unwrap(),
            project_name: Some("North Yard".to_string()),
            mechanical_no: None,
            rent_type: None,
            type_name: None,
            car_type: None,
            company_assets: None,
            belong_land: None,
            valid_duration: Some("7.50".parse().unwrap()),
            idling_duration: None,
            valid_percent: None,
            day_oil: None,
            day_refuel: None,
            day_mileage: None,
            workhour_avg_oil: None,
            transport_avg_oil: None,
            create_time: None,
            score: Some(87),
            summary: Some("Stable utilization.".to_string()),
        }
    }

    #[test]
    fn upsert_statement_overwrites_every_non_key_column() {
        let records = vec![record("D1"), record("D2")];
        let mut query = upsert_query(&records);
        let sql = query.build().sql().to_string();

        assert!(sql.starts_with("INSERT INTO `xingxiu`"));
        assert!(sql.contains(" ON DUPLICATE KEY UPDATE "));
        for column in NON_KEY_COLUMNS {
            assert!(
                sql.contains(&format!("`{column}` = VALUES(`{column}`)")),
                "missing overwrite for {column}"
            );
        }
        assert!(!sql.contains("`DEVICE_NO` = VALUES"));
        assert!(!sql.contains("`DATE_STR` = VALUES"));
        // two rows of twenty placeholders each
        assert_eq!(sql.matches('?').count(), 40);
    }

    #[test]
    fn schema_has_the_natural_key_and_date_index() {
        assert!(CREATE_TABLE_SQL.contains("UNIQUE KEY `uk_device_date` (`DEVICE_NO`, `DATE_STR`)"));
        assert!(CREATE_TABLE_SQL.contains("KEY `idx_date` (`DATE_STR`)"));
        assert!(CREATE_TABLE_SQL.contains("CREATE TABLE IF NOT EXISTS"));
    }

    #[tokio::test]
    async fn empty_batch_short_circuits_without_touching_the_pool() {
        // Unroutable host: the write must return before any connection is
        // attempted.
        let store = TelemetryStore::connect_lazy(&DbConfig {
            host: "192.0.2.1".to_string(),
            port: 3306,
            user: "nobody".to_string(),
            password: "nothing".to_string(),
            database: "xingxiu".to_string(),
        });
        let written = store.write(&[]).await.expect("empty write");
        assert_eq!(written, 0);
    }
}
