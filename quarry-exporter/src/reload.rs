//! Hot reload: apply a new configuration to the running service.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{error, info};

use quarry_common::Config;

use crate::instruments;
use crate::service::CollectorService;

/// Outcome of a configuration apply. Doubles as the control-plane response
/// body.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
    /// Names of the metrics active after the apply.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,
    /// Names removed by the apply.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

impl ReloadResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            message: "reload failed".to_string(),
            metrics: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl CollectorService {
    /// Apply `new_config` atomically. The caller has already validated it
    /// and persisted it to disk.
    ///
    /// The state lock is held exclusively for the entire apply, including
    /// one synchronous collection round at the end. Running that round after
    /// releasing the lock would let the scheduler pick up the new handle
    /// list before fresh values land, and the next scrape would read zeros
    /// for just-added metrics. Holding the lock costs one round of latency
    /// and buys a clean postcondition: an observer sees either the full old
    /// state or the full new state with values already collected.
    pub async fn reload_config(&self, new_config: Config) -> ReloadResult {
        let mut state = self.state.write().await;

        let new_names: HashSet<&str> = new_config
            .metrics
            .iter()
            .map(|spec| spec.name.as_str())
            .collect();
        let mut removed: Vec<String> = state
            .handles
            .iter()
            .map(|handle| handle.spec.name.clone())
            .filter(|name| !new_names.contains(name.as_str()))
            .collect();
        removed.sort();
        removed.dedup();

        // Clients first, so the collection round below already queries
        // through the new connections. Open failures are logged and leave
        // the slot empty; they never fail the reload.
        state.clients.ensure(&new_config).await;

        let handles =
            match instruments::reconcile(self.registry(), &state.handles, &new_config.metrics) {
                Ok(handles) => handles,
                Err(err) => {
                    error!(
                        error = %err,
                        "Instrument registration failed, keeping previous configuration"
                    );
                    return ReloadResult::failure(format!("failed to register instruments: {err}"));
                }
            };

        let metrics: Vec<String> = handles
            .iter()
            .map(|handle| handle.spec.name.clone())
            .collect();
        state.handles = handles;
        state.config = new_config;

        // Synchronous round under the exclusive lock (see the doc comment).
        let items = Self::snapshot(&state);
        self.run_round(items, None).await;

        info!(
            active = metrics.len(),
            removed = removed.len(),
            "Configuration reloaded"
        );
        ReloadResult {
            success: true,
            error: None,
            message: format!(
                "configuration applied: {} metrics active, {} removed",
                metrics.len(),
                removed.len()
            ),
            metrics,
            removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_shape_skips_empty_fields() {
        let result = ReloadResult::failure("boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert!(json.get("metrics").is_none());
        assert!(json.get("removed").is_none());
    }

    #[test]
    fn success_shape_includes_lists() {
        let result = ReloadResult {
            success: true,
            error: None,
            message: "ok".into(),
            metrics: vec!["a".into()],
            removed: vec!["b".into()],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["metrics"][0], "a");
        assert_eq!(json["removed"][0], "b");
    }
}
