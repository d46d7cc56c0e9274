//! IoTDB scalar queries over the REST API v2.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use quarry_common::IotDbConfig;

use crate::error::{BackendError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the IoTDB REST query endpoint.
pub struct IotDbClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    row_limit: u32,
}

/// Response shape of `POST /rest/v2/query`. Values are column-major: one
/// inner vector per selected expression.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    expressions: Option<Vec<String>>,
    #[serde(default)]
    column_names: Option<Vec<String>>,
    #[serde(default)]
    values: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl IotDbClient {
    /// Open the REST session and verify it with a bounded ping.
    pub async fn connect(cfg: &IotDbConfig) -> Result<Self> {
        if cfg.host.is_empty() || cfg.user.is_empty() {
            return Err(BackendError::Config(
                "iotdb config requires host and user".into(),
            ));
        }

        let scheme = if cfg.enable_tls { "https" } else { "http" };
        let base_url = format!("{scheme}://{}:{}", cfg.host, cfg.port);

        let mut builder = reqwest::Client::builder()
            .timeout(QUERY_TIMEOUT)
            .min_tls_version(reqwest::tls::Version::TLS_1_2);
        if cfg.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        let client = Self {
            http,
            base_url,
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            row_limit: cfg.fetch_size,
        };

        tokio::time::timeout(PROBE_TIMEOUT, client.health_check())
            .await
            .map_err(|_| BackendError::Timeout(PROBE_TIMEOUT))??;

        Ok(client)
    }

    /// Execute a query and reduce the result to one number.
    ///
    /// `result_field` selects the column: case-insensitive exact match first,
    /// then case-insensitive substring (with a warning), else the first
    /// column. The column is summed across all rows; nulls contribute 0.
    pub async fn query_scalar(&self, sql: &str, result_field: &str) -> Result<f64> {
        let response = self
            .http
            .post(format!("{}/rest/v2/query", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({ "sql": sql, "row_limit": self.row_limit }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate(&body, 256),
            });
        }

        let result: QueryResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Json(e.to_string()))?;

        // The REST endpoint reports execution errors with HTTP 200 and a
        // status code in the body.
        if let Some(code) = result.code {
            if code != 200 {
                return Err(BackendError::Execution(format!(
                    "status {code}: {}",
                    result.message.unwrap_or_default()
                )));
            }
        }

        let columns = result
            .column_names
            .or(result.expressions)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BackendError::Execution("result has no column information".into()))?;
        let values = result.values.unwrap_or_default();

        let (index, fallback) = pick_target_column(&columns, result_field);
        if fallback && !result_field.is_empty() {
            warn!(
                field = result_field,
                column = %columns[index],
                "Result field not found, falling back"
            );
        }

        let column = values
            .get(index)
            .ok_or_else(|| BackendError::Execution("result values are shorter than columns".into()))?;
        if column.is_empty() {
            return Err(BackendError::EmptyResult);
        }

        sum_column(&columns[index], column)
    }

    /// Verify the REST endpoint responds.
    pub async fn health_check(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/ping", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(BackendError::Connect(format!(
                "ping returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Release resources. The HTTP session has nothing to tear down, kept
    /// for surface uniformity. Idempotent.
    pub fn close(&self) {}
}

fn map_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(QUERY_TIMEOUT)
    } else {
        BackendError::Connect(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

/// Pick the column matching `hint`. Returns the index and whether the choice
/// fell back past an exact match.
fn pick_target_column(columns: &[String], hint: &str) -> (usize, bool) {
    if !hint.is_empty() {
        if let Some(i) = columns.iter().position(|c| c.eq_ignore_ascii_case(hint)) {
            return (i, false);
        }
        let lower = hint.to_ascii_lowercase();
        if let Some(i) = columns
            .iter()
            .position(|c| c.to_ascii_lowercase().contains(&lower))
        {
            return (i, true);
        }
    }
    (0, !hint.is_empty())
}

/// Sum one column. Nulls contribute 0, numeric strings parse, anything else
/// fails the query.
fn sum_column(column: &str, values: &[serde_json::Value]) -> Result<f64> {
    let mut total = 0.0;
    for value in values {
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::Number(n) => {
                total += n.as_f64().ok_or_else(|| {
                    BackendError::NonNumeric(format!("column '{column}' value {n}"))
                })?;
            }
            serde_json::Value::String(s) => {
                total += s.parse::<f64>().map_err(|_| {
                    BackendError::NonNumeric(format!("column '{column}' value '{s}'"))
                })?;
            }
            other => {
                return Err(BackendError::NonNumeric(format!(
                    "column '{column}' value {other}"
                )))
            }
        }
    }
    Ok(total)
}
