//! Configuration model for the Quarry exporter.
//!
//! Configuration is a JSON5 document. Literal `${VAR}` references are
//! expanded from the process environment before parsing, so credentials can
//! stay out of the file itself.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, Result};
use crate::expand::expand_env;

/// Connection name used when a metric or legacy block does not name one.
pub const DEFAULT_CONNECTION: &str = "default";

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Collection schedule.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Scrape endpoint settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Legacy unnamed MySQL block, merged into `mysql_connections` under
    /// `"default"` when that name is free.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql: Option<MySqlConfig>,

    /// Named MySQL connections.
    #[serde(default)]
    pub mysql_connections: BTreeMap<String, MySqlConfig>,

    /// Legacy unnamed Redis block, merged like `mysql`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,

    /// Named Redis connections.
    #[serde(default)]
    pub redis_connections: BTreeMap<String, RedisConfig>,

    /// Named HTTP API connections.
    #[serde(default)]
    pub http_connections: BTreeMap<String, HttpConfig>,

    /// IoTDB connection (a single session shared by all IoTDB metrics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iotdb: Option<IotDbConfig>,

    /// Ordered list of metrics to collect.
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

/// Collection schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Interval between collection rounds (duration string, default "1h").
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_interval() -> String {
    "1h".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

impl ScheduleConfig {
    /// Parse the configured interval.
    pub fn interval(&self) -> Result<Duration> {
        parse_duration(&self.interval)
    }
}

/// Scrape endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to bind (default "0.0.0.0").
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port to bind (default 8080).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
        }
    }
}

impl PrometheusConfig {
    /// The full listen address, `host:port`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// MySQL connection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MySqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    /// Extra connection parameters appended to the connection URL.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_mysql_port() -> u16 {
    3306
}

impl MySqlConfig {
    fn is_empty(&self) -> bool {
        self.host.is_empty() && self.user.is_empty() && self.database.is_empty()
    }
}

/// Redis connection settings. Only standalone mode is supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// "standalone" (sentinel/cluster are reserved for later).
    #[serde(default = "default_redis_mode")]
    pub mode: String,

    /// `host:port` of the server.
    pub addr: String,

    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,

    /// Database index.
    #[serde(default)]
    pub db: u32,

    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

fn default_redis_mode() -> String {
    "standalone".to_string()
}

/// IoTDB REST session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IotDbConfig {
    pub host: String,
    #[serde(default = "default_iotdb_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,

    /// Maximum rows fetched per query.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: u32,

    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

fn default_iotdb_port() -> u16 {
    18080
}

fn default_fetch_size() -> u32 {
    1024
}

/// HTTP API connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Base URL; request paths from metric queries are joined onto it.
    pub base_url: String,

    /// Request timeout (duration string, default "30s").
    #[serde(default = "default_http_timeout")]
    pub timeout: String,

    /// Headers sent with every request. Entries with empty values are skipped.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub tls: HttpTlsConfig,

    #[serde(default)]
    pub retry: HttpRetryConfig,
}

fn default_http_timeout() -> String {
    "30s".to_string()
}

/// TLS options for HTTP API connections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpTlsConfig {
    /// Disable certificate chain verification.
    #[serde(default)]
    pub skip_verify: bool,
}

/// Retry policy for HTTP API queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRetryConfig {
    /// Total attempts per query, at least 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (duration string, default "1s").
    #[serde(default = "default_backoff")]
    pub backoff: String,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff() -> String {
    "1s".to_string()
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
        }
    }
}

/// Which backend a metric queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSource {
    MySql,
    IotDb,
    Redis,
    Http,
}

impl MetricSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricSource::MySql => "mysql",
            MetricSource::IotDb => "iotdb",
            MetricSource::Redis => "redis",
            MetricSource::Http => "http",
        }
    }
}

/// Prometheus instrument kind.
///
/// Only gauge (and, via replace-on-collect, counter) instruments receive
/// collected values; histogram and summary specs register so their series
/// exist, but a single scalar per round gives them nothing to observe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
    Histogram,
    Summary,
}

/// Declarative description of one metric to collect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Metric name, `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    pub name: String,

    /// Help text. The first help seen for a name wins process-wide.
    #[serde(default)]
    pub help: String,

    #[serde(default, rename = "type")]
    pub kind: MetricKind,

    pub source: MetricSource,

    /// Connection name; empty means "default".
    #[serde(default)]
    pub connection: String,

    /// Backend query. May be empty only for `http` (GET against the base URL).
    #[serde(default)]
    pub query: String,

    /// Result column (iotdb) or JSON path (http).
    #[serde(default)]
    pub result_field: String,

    /// Constant labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Histogram buckets, ascending. Required iff `kind` is histogram.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<f64>,

    /// Summary objectives, quantile (as string key) to allowed error.
    /// Required iff `kind` is summary.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub objectives: BTreeMap<String, f64>,
}

impl MetricSpec {
    /// The connection name, with the empty string resolved to "default".
    pub fn connection_or_default(&self) -> &str {
        if self.connection.is_empty() {
            DEFAULT_CONNECTION
        } else {
            &self.connection
        }
    }

    /// Objectives parsed to `(quantile, error)` pairs.
    pub fn parsed_objectives(&self) -> Result<Vec<(f64, f64)>> {
        let mut out = Vec::with_capacity(self.objectives.len());
        for (q, err) in &self.objectives {
            let quantile: f64 = q.parse().map_err(|_| {
                ConfigError::validation(format!(
                    "metric '{}' has a non-numeric objective quantile '{}'",
                    self.name, q
                ))
            })?;
            out.push((quantile, *err));
        }
        Ok(out)
    }
}

/// Valid metric name per the Prometheus data model.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Valid label name per the Prometheus data model.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Config {
    /// Load configuration from a JSON5 file, expanding `${VAR}` references
    /// before parsing. Defaults are applied and the result is validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&expand_env(&raw))
    }

    /// Parse configuration from a JSON5 string, apply defaults, validate.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = json5::from_str(content)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Persist the configuration. Written as JSON, which any JSON5 reader
    /// (including [`Config::load`]) accepts.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::validation(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Fold legacy blocks and fill in implied defaults.
    ///
    /// Serde field defaults handle scalar fields; this covers the rules that
    /// span fields: the legacy unnamed `mysql:`/`redis:` blocks become the
    /// `"default"` entries of their maps when that name is not taken.
    pub fn apply_defaults(&mut self) {
        if let Some(mysql) = self.mysql.take() {
            if !mysql.is_empty() && !self.mysql_connections.contains_key(DEFAULT_CONNECTION) {
                self.mysql_connections
                    .insert(DEFAULT_CONNECTION.to_string(), mysql);
            }
        }
        if let Some(redis) = self.redis.take() {
            if !redis.addr.is_empty() && !self.redis_connections.contains_key(DEFAULT_CONNECTION) {
                self.redis_connections
                    .insert(DEFAULT_CONNECTION.to_string(), redis);
            }
        }
    }

    /// Check configuration completeness. Never partial: the first problem
    /// found is reported and nothing is applied.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(ConfigError::validation("at least one metric must be defined"));
        }

        self.schedule.interval()?;

        for (name, rc) in &self.redis_connections {
            if rc.addr.is_empty() {
                return Err(ConfigError::validation(format!(
                    "redis connection '{name}' is missing addr"
                )));
            }
            if rc.mode != "standalone" {
                return Err(ConfigError::validation(format!(
                    "redis connection '{name}' uses unsupported mode '{}'",
                    rc.mode
                )));
            }
        }

        for (name, hc) in &self.http_connections {
            if hc.base_url.is_empty() {
                return Err(ConfigError::validation(format!(
                    "http connection '{name}' is missing base_url"
                )));
            }
            parse_duration(&hc.timeout)?;
            parse_duration(&hc.retry.backoff)?;
            if hc.retry.max_attempts == 0 {
                return Err(ConfigError::validation(format!(
                    "http connection '{name}' must allow at least one attempt"
                )));
            }
        }

        for spec in &self.metrics {
            self.validate_metric(spec)?;
        }

        Ok(())
    }

    fn validate_metric(&self, spec: &MetricSpec) -> Result<()> {
        if spec.name.is_empty() {
            return Err(ConfigError::validation("metric name must not be empty"));
        }
        if !is_valid_metric_name(&spec.name) {
            return Err(ConfigError::validation(format!(
                "metric name '{}' is invalid, expected [a-zA-Z_:][a-zA-Z0-9_:]*",
                spec.name
            )));
        }

        if spec.query.is_empty() && spec.source != MetricSource::Http {
            return Err(ConfigError::validation(format!(
                "metric '{}' is missing a query",
                spec.name
            )));
        }

        match spec.kind {
            MetricKind::Histogram => {
                if spec.buckets.is_empty() {
                    return Err(ConfigError::validation(format!(
                        "metric '{}' is a histogram but has no buckets",
                        spec.name
                    )));
                }
                if spec.buckets.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(ConfigError::validation(format!(
                        "metric '{}' buckets must be strictly ascending",
                        spec.name
                    )));
                }
            }
            MetricKind::Summary => {
                if spec.objectives.is_empty() {
                    return Err(ConfigError::validation(format!(
                        "metric '{}' is a summary but has no objectives",
                        spec.name
                    )));
                }
                for (quantile, error) in spec.parsed_objectives()? {
                    if !(0.0..=1.0).contains(&quantile) || quantile == 0.0 || quantile == 1.0 {
                        return Err(ConfigError::validation(format!(
                            "metric '{}' objective quantile {quantile} must be in (0, 1)",
                            spec.name
                        )));
                    }
                    if !(0.0..=1.0).contains(&error) || error == 0.0 || error == 1.0 {
                        return Err(ConfigError::validation(format!(
                            "metric '{}' objective error {error} must be in (0, 1)",
                            spec.name
                        )));
                    }
                }
            }
            MetricKind::Gauge | MetricKind::Counter => {}
        }

        for label in spec.labels.keys() {
            if !is_valid_label_name(label) {
                return Err(ConfigError::validation(format!(
                    "metric '{}' label '{label}' is invalid, expected [a-zA-Z_][a-zA-Z0-9_]*",
                    spec.name
                )));
            }
        }

        let conn = spec.connection_or_default();
        match spec.source {
            MetricSource::MySql => {
                if !self.mysql_connections.contains_key(conn) {
                    return Err(ConfigError::validation(format!(
                        "metric '{}' references unconfigured mysql connection '{conn}'",
                        spec.name
                    )));
                }
            }
            MetricSource::Redis => {
                if !self.redis_connections.contains_key(conn) {
                    return Err(ConfigError::validation(format!(
                        "metric '{}' references unconfigured redis connection '{conn}'",
                        spec.name
                    )));
                }
            }
            MetricSource::Http => {
                if !self.http_connections.contains_key(conn) {
                    return Err(ConfigError::validation(format!(
                        "metric '{}' references unconfigured http connection '{conn}'",
                        spec.name
                    )));
                }
            }
            // The IoTDB session is a singleton; a missing block surfaces as
            // a per-metric collection failure, not a validation error.
            MetricSource::IotDb => {}
        }

        Ok(())
    }

    /// Look up the MySQL connection config for `name` ("" means "default").
    pub fn mysql_for(&self, name: &str) -> Option<&MySqlConfig> {
        let name = if name.is_empty() { DEFAULT_CONNECTION } else { name };
        self.mysql_connections.get(name)
    }

    /// Look up the Redis connection config for `name` ("" means "default").
    pub fn redis_for(&self, name: &str) -> Option<&RedisConfig> {
        let name = if name.is_empty() { DEFAULT_CONNECTION } else { name };
        self.redis_connections.get(name)
    }

    /// Look up the HTTP connection config for `name` ("" means "default").
    pub fn http_for(&self, name: &str) -> Option<&HttpConfig> {
        let name = if name.is_empty() { DEFAULT_CONNECTION } else { name };
        self.http_connections.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_metric(source: &str, extra: &str) -> String {
        format!(
            r#"{{
                metrics: [
                    {{ name: "m", help: "h", source: "{source}", query: "q"{extra} }}
                ],
            }}"#
        )
    }

    #[test]
    fn empty_metric_list_is_rejected() {
        let err = Config::parse("{}").unwrap_err();
        assert!(err.to_string().contains("at least one metric"));
    }

    #[test]
    fn parses_full_config() {
        let content = r#"{
            schedule: { interval: "5m" },
            prometheus: { listen_address: "127.0.0.1", listen_port: 9105 },
            mysql_connections: {
                default: { host: "db1", user: "ro", password: "pw", database: "app" },
                billing: { host: "db2", port: 3307, user: "ro", password: "pw", database: "billing" },
            },
            redis_connections: {
                default: { addr: "cache:6379" },
            },
            http_connections: {
                default: { base_url: "https://api.example.com", retry: { max_attempts: 3, backoff: "2s" } },
            },
            iotdb: { host: "tsdb", user: "root", password: "root" },
            metrics: [
                { name: "orders_total", help: "Orders", source: "mysql", query: "SELECT COUNT(*) FROM orders" },
                { name: "queue_len", help: "Queue", source: "redis", query: "LLEN jobs", connection: "default" },
                { name: "api_count", help: "API", source: "http", query: "GET /stats", result_field: "data.count" },
                { name: "power_sum", help: "Power", source: "iotdb", query: "select sum(power) from root.sg1", result_field: "sum" },
            ],
        }"#;

        let config = Config::parse(content).unwrap();
        assert_eq!(config.schedule.interval().unwrap().as_secs(), 300);
        assert_eq!(config.prometheus.listen_addr(), "127.0.0.1:9105");
        assert_eq!(config.mysql_connections.len(), 2);
        assert_eq!(config.mysql_connections["billing"].port, 3307);
        assert_eq!(config.http_connections["default"].retry.max_attempts, 3);
        assert_eq!(config.iotdb.as_ref().unwrap().port, 18080);
        assert_eq!(config.metrics.len(), 4);
        assert_eq!(config.metrics[0].kind, MetricKind::Gauge);
    }

    #[test]
    fn legacy_blocks_merge_under_default() {
        let content = r#"{
            mysql: { host: "db", user: "ro", database: "app" },
            redis: { addr: "cache:6379" },
            metrics: [
                { name: "a", source: "mysql", query: "SELECT 1" },
                { name: "b", source: "redis", query: "DBSIZE" },
            ],
        }"#;

        let config = Config::parse(content).unwrap();
        assert!(config.mysql.is_none());
        assert_eq!(config.mysql_connections["default"].host, "db");
        assert_eq!(config.redis_connections["default"].addr, "cache:6379");
    }

    #[test]
    fn legacy_block_does_not_override_named_default() {
        let content = r#"{
            mysql: { host: "old", user: "ro", database: "app" },
            mysql_connections: {
                default: { host: "new", user: "ro", database: "app" },
            },
            metrics: [{ name: "a", source: "mysql", query: "SELECT 1" }],
        }"#;

        let config = Config::parse(content).unwrap();
        assert_eq!(config.mysql_connections["default"].host, "new");
    }

    #[test]
    fn histogram_without_buckets_is_rejected() {
        let content = minimal_metric("iotdb", r#", type: "histogram""#);
        let err = Config::parse(&content).unwrap_err();
        assert!(err.to_string().contains("no buckets"));
    }

    #[test]
    fn summary_without_objectives_is_rejected() {
        let content = minimal_metric("iotdb", r#", type: "summary""#);
        let err = Config::parse(&content).unwrap_err();
        assert!(err.to_string().contains("no objectives"));
    }

    #[test]
    fn unsorted_buckets_are_rejected() {
        let content = minimal_metric("iotdb", r#", type: "histogram", buckets: [1.0, 0.5]"#);
        assert!(Config::parse(&content).is_err());
    }

    #[test]
    fn objective_out_of_range_is_rejected() {
        let content = minimal_metric("iotdb", r#", type: "summary", objectives: { "1.5": 0.01 }"#);
        assert!(Config::parse(&content).is_err());
    }

    #[test]
    fn invalid_metric_name_is_rejected() {
        let content = r#"{
            metrics: [{ name: "9lives", source: "iotdb", query: "q" }],
        }"#;
        let err = Config::parse(content).unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn invalid_label_name_is_rejected() {
        let content = r#"{
            metrics: [
                { name: "m", source: "iotdb", query: "q", labels: { "bad-label": "x" } }
            ],
        }"#;
        assert!(Config::parse(content).is_err());
    }

    #[test]
    fn missing_query_is_rejected_except_for_http() {
        let content = r#"{
            metrics: [{ name: "m", source: "iotdb" }],
        }"#;
        assert!(Config::parse(content).is_err());

        let content = r#"{
            http_connections: { default: { base_url: "http://x" } },
            metrics: [{ name: "m", source: "http" }],
        }"#;
        assert!(Config::parse(content).is_ok());
    }

    #[test]
    fn unreferenced_connection_is_rejected_after_defaulting() {
        // connection "" resolves to "default", which is not configured.
        let content = r#"{
            metrics: [{ name: "m", source: "mysql", query: "SELECT 1" }],
        }"#;
        let err = Config::parse(content).unwrap_err();
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn nonstandalone_redis_mode_is_rejected() {
        let content = r#"{
            redis_connections: { default: { addr: "a:1", mode: "cluster" } },
            metrics: [{ name: "m", source: "redis", query: "DBSIZE" }],
        }"#;
        assert!(Config::parse(content).is_err());
    }

    #[test]
    fn metric_names_validate() {
        assert!(is_valid_metric_name("http_requests_total"));
        assert!(is_valid_metric_name(":colon:ok:"));
        assert!(is_valid_metric_name("_underscore"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("1abc"));
        assert!(!is_valid_metric_name("has-dash"));
    }

    #[test]
    fn label_names_validate() {
        assert!(is_valid_label_name("env"));
        assert!(is_valid_label_name("_private"));
        assert!(!is_valid_label_name("with:colon"));
        assert!(!is_valid_label_name("1st"));
    }

    #[test]
    fn connection_defaulting_on_specs() {
        let spec = MetricSpec {
            name: "m".into(),
            help: String::new(),
            kind: MetricKind::Gauge,
            source: MetricSource::Redis,
            connection: String::new(),
            query: "DBSIZE".into(),
            result_field: String::new(),
            labels: BTreeMap::new(),
            buckets: Vec::new(),
            objectives: BTreeMap::new(),
        };
        assert_eq!(spec.connection_or_default(), "default");
    }

    #[test]
    fn save_and_reload_round_trip() {
        let content = r#"{
            redis_connections: { default: { addr: "cache:6379" } },
            metrics: [{ name: "m", help: "h", source: "redis", query: "DBSIZE" }],
        }"#;
        let config = Config::parse(content).unwrap();

        let path = std::env::temp_dir().join("quarry-config-roundtrip.json");
        config.save(&path).unwrap();
        let reloaded = Config::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded.metrics, config.metrics);
        assert_eq!(reloaded.redis_connections, config.redis_connections);
    }
}
