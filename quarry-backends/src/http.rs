//! Scalar extraction from HTTP/JSON endpoints.
//!
//! A metric query is `METHOD [ /path ]` on the first line with an optional
//! request body on the following lines. The JSON response is reduced to one
//! number through the metric's `result_field` path.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use tracing::warn;

use quarry_common::{parse_duration, HttpConfig};

use crate::error::{BackendError, Result};

/// Client for one configured HTTP API base URL.
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    headers: BTreeMap<String, String>,
    max_attempts: u32,
    backoff: Duration,
    timeout: Duration,
}

impl HttpClient {
    /// Build the client. No network traffic happens here; the base URL only
    /// has to be present and the TLS/timeout settings valid.
    pub fn connect(cfg: &HttpConfig) -> Result<Self> {
        if cfg.base_url.is_empty() {
            return Err(BackendError::Config("http config requires base_url".into()));
        }

        let timeout = parse_duration(&cfg.timeout)
            .map_err(|e| BackendError::Config(e.to_string()))?;
        let backoff = parse_duration(&cfg.retry.backoff)
            .map_err(|e| BackendError::Config(e.to_string()))?;

        // TLS floor is 1.2; the platform TLS stack below keeps legacy
        // RSA-only peers negotiable.
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .min_tls_version(reqwest::tls::Version::TLS_1_2);
        if cfg.tls.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            headers: cfg.headers.clone(),
            max_attempts: cfg.retry.max_attempts.max(1),
            backoff,
            timeout,
        })
    }

    /// Execute the query (with retries) and extract one scalar from the JSON
    /// response via `result_field`.
    pub async fn query_scalar(&self, query: &str, result_field: &str) -> Result<f64> {
        let (method, path, body) = parse_query(query)?;
        let url = format!("{}{}", self.base_url, path);

        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match self.do_request(method.clone(), &url, body.as_deref()).await {
                Ok(data) => return extract_json_value(&data, result_field),
                Err(err) => {
                    if attempt < self.max_attempts {
                        warn!(%url, attempt, error = %err, "Request failed, retrying after backoff");
                        tokio::time::sleep(self.backoff).await;
                    }
                    last_err = Some(err);
                }
            }
        }

        // max_attempts >= 1, so at least one attempt recorded an error.
        Err(last_err.unwrap_or(BackendError::EmptyResult))
    }

    async fn do_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<serde_json::Value> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }
        for (key, value) in &self.headers {
            if !value.is_empty() {
                request = request.header(key.as_str(), value.as_str());
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.timeout)
            } else {
                BackendError::Connect(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate(&body, 256),
            });
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Json(e.to_string()))
    }

    /// Probe the base URL. Any HTTP response counts as reachable; only
    /// transport failures are errors.
    pub async fn health_check(&self) -> Result<()> {
        let mut request = self.client.get(&self.base_url);
        for (key, value) in &self.headers {
            if !value.is_empty() {
                request = request.header(key.as_str(), value.as_str());
            }
        }
        request
            .send()
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Connect(e.to_string()))
    }

    /// Release resources. Idempotent.
    pub fn close(&self) {}
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

/// Parse `METHOD [ /path ]\n[body]`. An empty query is a GET of the base URL.
fn parse_query(query: &str) -> Result<(Method, String, Option<String>)> {
    let query = query.trim();
    if query.is_empty() {
        return Ok((Method::GET, String::new(), None));
    }

    let (first_line, body) = match query.split_once('\n') {
        Some((line, rest)) => (line.trim(), Some(rest.trim())),
        None => (query, None),
    };

    let (method, path) = match first_line.split_once(' ') {
        Some((method, path)) => (method.trim(), path.trim()),
        None => (first_line, ""),
    };

    let method = match method.to_ascii_uppercase().as_str() {
        "GET" => Method::GET,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "PATCH" => Method::PATCH,
        "DELETE" => Method::DELETE,
        other => {
            return Err(BackendError::Query(format!(
                "unsupported HTTP method '{other}'"
            )))
        }
    };

    let path = if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    let body = body.filter(|b| !b.is_empty()).map(str::to_string);
    Ok((method, path, body))
}

/// Extract one number from parsed JSON.
///
/// `path` is dot-separated with `[n]` array subscripts
/// (`"data.items[2].value"`). The whole-path token `length` returns an
/// array's cardinality. An empty path coerces the document itself.
fn extract_json_value(data: &serde_json::Value, path: &str) -> Result<f64> {
    if path.is_empty() {
        return coerce_scalar(data);
    }

    if path == "length" {
        return match data.as_array() {
            Some(arr) => Ok(arr.len() as f64),
            None => Err(BackendError::path(path, "'length' only applies to arrays")),
        };
    }

    let mut current = data;
    for part in split_path(path) {
        if current.is_null() {
            return Err(BackendError::path(path, "encountered a null value"));
        }

        if let Some(index) = parse_array_index(&part) {
            let arr = current.as_array().ok_or_else(|| {
                BackendError::path(path, format!("expected an array at '{part}'"))
            })?;
            current = arr.get(index).ok_or_else(|| {
                BackendError::path(
                    path,
                    format!("index {index} out of bounds (length {})", arr.len()),
                )
            })?;
        } else {
            let obj = current.as_object().ok_or_else(|| {
                BackendError::path(path, format!("expected an object at '{part}'"))
            })?;
            current = obj.get(&part).ok_or_else(|| {
                BackendError::path(path, format!("no field '{part}'"))
            })?;
        }
    }

    coerce_scalar(current)
}

/// Split `"data.items[0].value"` into `["data", "items", "[0]", "value"]`.
fn split_path(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = path.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '.' => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
                if let Some(close) = path[i..].find(']') {
                    parts.push(path[i..i + close + 1].to_string());
                    while chars.next_if(|&(j, _)| j <= i + close).is_some() {}
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_array_index(part: &str) -> Option<usize> {
    part.strip_prefix('[')?.strip_suffix(']')?.parse().ok()
}

/// Numbers pass through, numeric strings parse, booleans map to 1/0. Nulls
/// and structured values fail.
fn coerce_scalar(value: &serde_json::Value) -> Result<f64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| BackendError::NonNumeric(format!("number {n}"))),
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| BackendError::NonNumeric(format!("string '{s}'"))),
        serde_json::Value::Bool(true) => Ok(1.0),
        serde_json::Value::Bool(false) => Ok(0.0),
        serde_json::Value::Null => Err(BackendError::NullResult),
        other => Err(BackendError::NonNumeric(format!("value {other}"))),
    }
}
