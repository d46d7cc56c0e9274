//! The collection service: private registry, self-monitoring, scheduler.
//!
//! Concurrency discipline: one reader-writer lock guards the service state
//! (config, instrument handles, client pool). A collection round takes the
//! lock in shared mode only long enough to snapshot the handle list and the
//! client handles it needs, then queries unlocked; instrument writes are
//! atomic on their own. The reconciler ([`CollectorService::reload_config`])
//! takes the lock exclusively for a whole apply, including one synchronous
//! collection round. Scrapes bypass the lock entirely: they read the
//! underlying registry, which is safe for concurrent readers.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use prometheus::{Gauge, IntCounter, Registry};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use quarry_backends::{BackendError, HttpClient, IotDbClient, MySqlClient, RedisClient};
use quarry_common::{Config, MetricSource, MetricSpec};

use crate::clients::ClientPool;
use crate::instruments::{self, InstrumentHandle, InstrumentWriter};

pub(crate) struct ServiceState {
    pub(crate) config: Config,
    pub(crate) handles: Vec<InstrumentHandle>,
    pub(crate) clients: ClientPool,
}

/// The collection service. Shared across the scheduler task, the HTTP
/// handlers and the control plane behind an [`Arc`].
pub struct CollectorService {
    pub(crate) state: RwLock<ServiceState>,
    registry: Registry,
    errors_total: IntCounter,
    last_success: Gauge,
}

/// One metric captured for a collection round: the spec, the instrument to
/// write, and the client resolved at snapshot time so the round observes a
/// stable set regardless of concurrent reloads.
pub(crate) struct CollectionItem {
    spec: MetricSpec,
    writer: InstrumentWriter,
    target: Target,
}

enum Target {
    MySql(Option<Arc<MySqlClient>>),
    IotDb(Option<Arc<IotDbClient>>),
    Redis(Option<Arc<RedisClient>>),
    Http(Option<Arc<HttpClient>>),
}

impl CollectorService {
    /// Build the service: register self-monitoring and process collectors,
    /// open backend clients (failures are warnings, not errors), register
    /// the configured instruments.
    pub async fn new(config: Config) -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let errors_total = IntCounter::new(
            "collector_errors_total",
            "Number of failed per-metric collections",
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let last_success = Gauge::new(
            "collector_last_success_timestamp_seconds",
            "Unix time of the last collection round with at least one successful metric",
        )?;
        registry.register(Box::new(last_success.clone()))?;

        // The registry is private (instruments unregister on reload), so
        // process metrics must be registered explicitly.
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        let mut clients = ClientPool::default();
        clients.ensure(&config).await;

        let handles = instruments::reconcile(&registry, &[], &config.metrics)?;
        info!(metrics = handles.len(), "Collection service initialized");

        Ok(Arc::new(Self {
            state: RwLock::new(ServiceState {
                config,
                handles,
                clients,
            }),
            registry,
            errors_total,
            last_success,
        }))
    }

    /// The process-local registry backing the scrape endpoint.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A copy of the running configuration.
    pub async fn current_config(&self) -> Config {
        self.state.read().await.config.clone()
    }

    /// Drive periodic collection until the shutdown signal flips. The first
    /// round runs immediately; a round that overruns the interval coalesces
    /// the missed ticks instead of stacking rounds.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = {
            let state = self.state.read().await;
            state.config.schedule.interval().unwrap_or_else(|err| {
                warn!(error = %err, "Could not parse collection interval, falling back to 1h");
                Duration::from_secs(3600)
            })
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval = ?interval, "Collection scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.collect_with(Some(&shutdown)).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Collection scheduler stopped");
    }

    /// Run one collection round immediately.
    pub async fn collect_now(&self) {
        self.collect_with(None).await;
    }

    async fn collect_with(&self, shutdown: Option<&watch::Receiver<bool>>) {
        let items = {
            let state = self.state.read().await;
            Self::snapshot(&state)
        };
        self.run_round(items, shutdown).await;
    }

    /// Capture the handle list and resolve each metric's client. Handles
    /// whose instrument takes no samples (histogram, summary) are skipped.
    pub(crate) fn snapshot(state: &ServiceState) -> Vec<CollectionItem> {
        state
            .handles
            .iter()
            .filter(|handle| handle.writer.accepts_samples())
            .map(|handle| {
                let conn = handle.spec.connection_or_default();
                let target = match handle.spec.source {
                    MetricSource::MySql => Target::MySql(state.clients.mysql(conn)),
                    MetricSource::IotDb => Target::IotDb(state.clients.iotdb()),
                    MetricSource::Redis => Target::Redis(state.clients.redis(conn)),
                    MetricSource::Http => Target::Http(state.clients.http(conn)),
                };
                CollectionItem {
                    spec: handle.spec.clone(),
                    writer: handle.writer.clone(),
                    target,
                }
            })
            .collect()
    }

    /// One sequential pass over the captured metrics, in list order. A
    /// failure writes NaN and bumps the error counter; it never stops the
    /// round. A pending shutdown ends the round after the current call.
    pub(crate) async fn run_round(
        &self,
        items: Vec<CollectionItem>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) {
        debug!(metrics = items.len(), "Starting collection round");
        let mut any_success = false;

        for item in &items {
            if shutdown.is_some_and(|s| *s.borrow()) {
                debug!("Shutdown requested, ending collection round early");
                break;
            }

            let started = Instant::now();
            match query_target(item).await {
                Ok(value) => {
                    item.writer.set(value);
                    any_success = true;
                    debug!(
                        metric = %item.spec.name,
                        value,
                        elapsed = ?started.elapsed(),
                        "Metric updated"
                    );
                }
                Err(err) => {
                    warn!(
                        metric = %item.spec.name,
                        source = item.spec.source.as_str(),
                        error = %err,
                        "Metric collection failed"
                    );
                    item.writer.set(f64::NAN);
                    self.errors_total.inc();
                }
            }
        }

        if any_success {
            self.last_success.set(unix_now_seconds());
            debug!("Collection round finished");
        } else if !items.is_empty() {
            warn!("Collection round had no successful metric, check backends and configuration");
        }
    }

    /// Close all backend clients. Called on shutdown.
    pub async fn close(&self) {
        self.state.write().await.clients.close_all().await;
    }
}

async fn query_target(item: &CollectionItem) -> Result<f64, BackendError> {
    let conn = item.spec.connection_or_default();
    match &item.target {
        Target::MySql(Some(client)) => client.query_scalar(&item.spec.query).await,
        Target::IotDb(Some(client)) => {
            client
                .query_scalar(&item.spec.query, &item.spec.result_field)
                .await
        }
        Target::Redis(Some(client)) => client.query_scalar(&item.spec.query).await,
        Target::Http(Some(client)) => {
            client
                .query_scalar(&item.spec.query, &item.spec.result_field)
                .await
        }
        Target::MySql(None) => Err(BackendError::Unavailable(format!(
            "mysql connection '{conn}'"
        ))),
        Target::IotDb(None) => Err(BackendError::Unavailable("iotdb".into())),
        Target::Redis(None) => Err(BackendError::Unavailable(format!(
            "redis connection '{conn}'"
        ))),
        Target::Http(None) => Err(BackendError::Unavailable(format!(
            "http connection '{conn}'"
        ))),
    }
}

fn unix_now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
