//! MySQL scalar queries over a sqlx connection pool.

use std::time::Duration;

use bigdecimal::ToPrimitive;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, MySqlPool, Row};
use tracing::warn;

use quarry_common::MySqlConfig;

use crate::error::{BackendError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A pooled MySQL client for single-value aggregate queries.
pub struct MySqlClient {
    pool: MySqlPool,
}

impl MySqlClient {
    /// Open a connection pool and verify it with a bounded probe.
    pub async fn connect(cfg: &MySqlConfig) -> Result<Self> {
        if cfg.host.is_empty() || cfg.user.is_empty() || cfg.database.is_empty() {
            return Err(BackendError::Config(
                "mysql config requires host, user and database".into(),
            ));
        }

        let mut opts = MySqlConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .database(&cfg.database);
        if !cfg.password.is_empty() {
            opts = opts.password(&cfg.password);
        }
        for (key, value) in &cfg.params {
            match key.as_str() {
                "ssl-mode" | "ssl_mode" => {
                    let mode = value.parse::<MySqlSslMode>().map_err(|e| {
                        BackendError::Config(format!("invalid ssl-mode '{value}': {e}"))
                    })?;
                    opts = opts.ssl_mode(mode);
                }
                other => {
                    warn!(param = other, "Ignoring unsupported mysql connection parameter");
                }
            }
        }

        // Conservative pool limits so the exporter cannot crowd out the
        // database it is observing.
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .max_lifetime(Duration::from_secs(30 * 60))
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_with(opts)
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Run an aggregate statement expected to yield one row with one value.
    pub async fn query_scalar(&self, sql: &str) -> Result<f64> {
        let row = sqlx::query(sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BackendError::Execution(e.to_string()))?
            .ok_or(BackendError::EmptyResult)?;

        if row.columns().len() != 1 {
            return Err(BackendError::Query(format!(
                "expected exactly one selected column, got {}",
                row.columns().len()
            )));
        }

        decode_scalar(&row)
    }

    /// Verify the pool still reaches the server.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Connect(e.to_string()))
    }

    /// Close the pool. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Decode column 0 as a float. MySQL aggregates come back as DOUBLE, BIGINT
/// (signed or unsigned), DECIMAL, or text depending on the expression, so
/// each representation is tried in turn.
fn decode_scalar(row: &MySqlRow) -> Result<f64> {
    if let Ok(value) = row.try_get::<Option<f64>, _>(0) {
        return value.ok_or(BackendError::NullResult);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(0) {
        return value.map(|v| v as f64).ok_or(BackendError::NullResult);
    }
    if let Ok(value) = row.try_get::<Option<u64>, _>(0) {
        return value.map(|v| v as f64).ok_or(BackendError::NullResult);
    }
    if let Ok(value) = row.try_get::<Option<sqlx::types::BigDecimal>, _>(0) {
        return match value {
            Some(d) => d
                .to_f64()
                .ok_or_else(|| BackendError::NonNumeric(format!("decimal '{d}' overflows f64"))),
            None => Err(BackendError::NullResult),
        };
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(0) {
        return match value {
            Some(s) => s
                .parse::<f64>()
                .map_err(|_| BackendError::NonNumeric(format!("string '{s}'"))),
            None => Err(BackendError::NullResult),
        };
    }

    let type_name = row.column(0).type_info().to_string();
    Err(BackendError::NonNumeric(format!("column type {type_name}")))
}
