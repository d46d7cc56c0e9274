//! Backend client pool keyed by `(backend kind, connection name)`.
//!
//! The pool is the exclusive owner of opened clients. Reconciling against a
//! configuration opens what is missing, rebuilds what changed (full
//! structural equality on the connection config, nested maps included, so
//! stale credentials cannot survive an edit) and closes what is no longer
//! referenced. Open failures are warnings: the slot stays empty and the
//! dependent metrics fail at collection time instead.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{info, warn};

use quarry_backends::{HttpClient, IotDbClient, MySqlClient, RedisClient};
use quarry_common::{Config, HttpConfig, IotDbConfig, MetricSource, MySqlConfig, RedisConfig};

/// Required clients derived from a config's metric list.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NeededClients {
    pub mysql: BTreeSet<String>,
    pub redis: BTreeSet<String>,
    pub http: BTreeSet<String>,
    pub iotdb: bool,
}

/// Derive the set of `(kind, name)` pairs the metric list needs. Metrics
/// without a connection name count against `"default"`.
pub fn needed(config: &Config) -> NeededClients {
    let mut needed = NeededClients::default();
    for spec in &config.metrics {
        let conn = spec.connection_or_default().to_string();
        match spec.source {
            MetricSource::MySql => {
                needed.mysql.insert(conn);
            }
            MetricSource::Redis => {
                needed.redis.insert(conn);
            }
            MetricSource::Http => {
                needed.http.insert(conn);
            }
            MetricSource::IotDb => needed.iotdb = true,
        }
    }
    needed
}

/// Opened clients plus the config each was opened from.
#[derive(Default)]
pub struct ClientPool {
    mysql: HashMap<String, (MySqlConfig, Arc<MySqlClient>)>,
    redis: HashMap<String, (RedisConfig, Arc<RedisClient>)>,
    http: HashMap<String, (HttpConfig, Arc<HttpClient>)>,
    iotdb: Option<(IotDbConfig, Arc<IotDbClient>)>,
}

impl ClientPool {
    /// Reconcile the pool against `config`.
    pub async fn ensure(&mut self, config: &Config) {
        let needed = needed(config);

        // Close clients whose connection is no longer referenced.
        let stale: Vec<String> = self
            .mysql
            .keys()
            .filter(|name| !needed.mysql.contains(*name))
            .cloned()
            .collect();
        for name in stale {
            if let Some((_, client)) = self.mysql.remove(&name) {
                client.close().await;
                info!(connection = %name, "Closed unused mysql connection");
            }
        }
        self.redis.retain(|name, _| {
            let keep = needed.redis.contains(name);
            if !keep {
                info!(connection = %name, "Closed unused redis connection");
            }
            keep
        });
        self.http.retain(|name, _| {
            let keep = needed.http.contains(name);
            if !keep {
                info!(connection = %name, "Closed unused http connection");
            }
            keep
        });

        for name in &needed.mysql {
            let Some(cfg) = config.mysql_for(name) else {
                warn!(connection = %name, "No mysql connection configured, dependent metrics will fail");
                continue;
            };
            if let Some((current, _)) = self.mysql.get(name) {
                if current == cfg {
                    continue;
                }
                info!(connection = %name, "MySQL connection config changed, rebuilding");
                if let Some((_, old)) = self.mysql.remove(name) {
                    old.close().await;
                }
            }
            match MySqlClient::connect(cfg).await {
                Ok(client) => {
                    self.mysql
                        .insert(name.clone(), (cfg.clone(), Arc::new(client)));
                }
                Err(err) => warn!(
                    connection = %name,
                    error = %err,
                    "Failed to open mysql connection, dependent metrics will fail"
                ),
            }
        }

        for name in &needed.redis {
            let Some(cfg) = config.redis_for(name) else {
                warn!(connection = %name, "No redis connection configured, dependent metrics will fail");
                continue;
            };
            if let Some((current, _)) = self.redis.get(name) {
                if current == cfg {
                    continue;
                }
                info!(connection = %name, "Redis connection config changed, rebuilding");
                self.redis.remove(name);
            }
            match RedisClient::connect(cfg).await {
                Ok(client) => {
                    self.redis
                        .insert(name.clone(), (cfg.clone(), Arc::new(client)));
                }
                Err(err) => warn!(
                    connection = %name,
                    error = %err,
                    "Failed to open redis connection, dependent metrics will fail"
                ),
            }
        }

        for name in &needed.http {
            let Some(cfg) = config.http_for(name) else {
                warn!(connection = %name, "No http connection configured, dependent metrics will fail");
                continue;
            };
            if let Some((current, _)) = self.http.get(name) {
                if current == cfg {
                    continue;
                }
                info!(connection = %name, "HTTP connection config changed, rebuilding");
                self.http.remove(name);
            }
            match HttpClient::connect(cfg) {
                Ok(client) => {
                    self.http
                        .insert(name.clone(), (cfg.clone(), Arc::new(client)));
                }
                Err(err) => warn!(
                    connection = %name,
                    error = %err,
                    "Failed to open http connection, dependent metrics will fail"
                ),
            }
        }

        if needed.iotdb {
            match &config.iotdb {
                Some(cfg) => {
                    let rebuild = match &self.iotdb {
                        Some((current, _)) => {
                            if current != cfg {
                                info!("IoTDB connection config changed, rebuilding");
                                true
                            } else {
                                false
                            }
                        }
                        None => true,
                    };
                    if rebuild {
                        if let Some((_, old)) = self.iotdb.take() {
                            old.close();
                        }
                        match IotDbClient::connect(cfg).await {
                            Ok(client) => self.iotdb = Some((cfg.clone(), Arc::new(client))),
                            Err(err) => warn!(
                                error = %err,
                                "Failed to open iotdb connection, dependent metrics will fail"
                            ),
                        }
                    }
                }
                None => {
                    warn!("No iotdb connection configured, dependent metrics will fail");
                    if let Some((_, old)) = self.iotdb.take() {
                        old.close();
                    }
                }
            }
        } else if let Some((_, client)) = self.iotdb.take() {
            client.close();
            info!("Closed unused iotdb connection");
        }
    }

    /// Close every client. Used on shutdown.
    pub async fn close_all(&mut self) {
        for (name, (_, client)) in self.mysql.drain() {
            client.close().await;
            info!(connection = %name, "Closed mysql connection");
        }
        for (_, (_, client)) in self.redis.drain() {
            client.close();
        }
        for (_, (_, client)) in self.http.drain() {
            client.close();
        }
        if let Some((_, client)) = self.iotdb.take() {
            client.close();
        }
    }

    pub fn mysql(&self, name: &str) -> Option<Arc<MySqlClient>> {
        self.mysql.get(name).map(|(_, client)| client.clone())
    }

    pub fn redis(&self, name: &str) -> Option<Arc<RedisClient>> {
        self.redis.get(name).map(|(_, client)| client.clone())
    }

    pub fn http(&self, name: &str) -> Option<Arc<HttpClient>> {
        self.http.get(name).map(|(_, client)| client.clone())
    }

    pub fn iotdb(&self) -> Option<Arc<IotDbClient>> {
        self.iotdb.as_ref().map(|(_, client)| client.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::Config;

    fn http_config(metrics: &str, base_url: &str) -> Config {
        Config::parse(&format!(
            r#"{{
                http_connections: {{
                    default: {{ base_url: "{base_url}" }},
                }},
                metrics: {metrics},
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn needed_defaults_missing_connection_names() {
        let config = Config::parse(
            r#"{
                mysql_connections: {
                    default: { host: "db", user: "u", database: "d" },
                    extra: { host: "db2", user: "u", database: "d" },
                },
                redis_connections: { default: { addr: "c:6379" } },
                metrics: [
                    { name: "a", source: "mysql", query: "SELECT 1" },
                    { name: "b", source: "mysql", query: "SELECT 1", connection: "extra" },
                    { name: "c", source: "redis", query: "DBSIZE" },
                    { name: "d", source: "iotdb", query: "select 1" },
                ],
            }"#,
        )
        .unwrap();

        let needed = needed(&config);
        assert_eq!(
            needed.mysql.iter().collect::<Vec<_>>(),
            vec!["default", "extra"]
        );
        assert_eq!(needed.redis.iter().collect::<Vec<_>>(), vec!["default"]);
        assert!(needed.http.is_empty());
        assert!(needed.iotdb);
    }

    #[tokio::test]
    async fn ensure_opens_and_keeps_http_clients() {
        let config = http_config(
            r#"[{ name: "m", source: "http", query: "GET /x" }]"#,
            "http://127.0.0.1:9",
        );

        let mut pool = ClientPool::default();
        pool.ensure(&config).await;
        let first = pool.http("default").expect("client opened");

        // Same config: the client is kept as-is.
        pool.ensure(&config).await;
        let second = pool.http("default").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn ensure_rebuilds_on_config_change() {
        let config = http_config(
            r#"[{ name: "m", source: "http", query: "GET /x" }]"#,
            "http://127.0.0.1:9",
        );
        let mut pool = ClientPool::default();
        pool.ensure(&config).await;
        let first = pool.http("default").unwrap();

        let changed = http_config(
            r#"[{ name: "m", source: "http", query: "GET /x" }]"#,
            "http://127.0.0.1:10",
        );
        pool.ensure(&changed).await;
        let second = pool.http("default").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn ensure_drops_unreferenced_clients() {
        let config = http_config(
            r#"[{ name: "m", source: "http", query: "GET /x" }]"#,
            "http://127.0.0.1:9",
        );
        let mut pool = ClientPool::default();
        pool.ensure(&config).await;
        assert!(pool.http("default").is_some());

        let without = Config::parse(
            r#"{
                metrics: [{ name: "m", source: "iotdb", query: "select 1" }],
            }"#,
        )
        .unwrap();
        pool.ensure(&without).await;
        assert!(pool.http("default").is_none());
    }

    #[tokio::test]
    async fn iotdb_open_failure_is_not_fatal() {
        // Nothing listens on this port; the open fails and the slot stays
        // empty, dependent metrics will report errors at collection time.
        let config = Config::parse(
            r#"{
                iotdb: { host: "127.0.0.1", port: 1, user: "root" },
                metrics: [{ name: "m", source: "iotdb", query: "select 1" }],
            }"#,
        )
        .unwrap();

        let mut pool = ClientPool::default();
        pool.ensure(&config).await;
        assert!(pool.iotdb().is_none());
    }
}
