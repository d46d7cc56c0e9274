//! Control-plane API.
//!
//! Every mutation goes through the same pipeline: apply defaults, validate,
//! persist to the config file, then hand the new configuration to the
//! reconciler. There is no path that mutates running state directly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

use quarry_backends::{BackendError, HttpClient, IotDbClient, MySqlClient, RedisClient};
use quarry_common::{Config, HttpConfig, IotDbConfig, MetricSpec, MySqlConfig, RedisConfig};

use crate::reload::ReloadResult;
use crate::service::CollectorService;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ApiState {
    service: Arc<CollectorService>,
    config_path: Arc<PathBuf>,
}

impl ApiState {
    pub fn new(service: Arc<CollectorService>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            service,
            config_path: Arc::new(config_path.into()),
        }
    }
}

/// Build the `/api` router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/config", get(get_config).put(update_config))
        .route("/api/metrics", get(list_metrics).post(create_metric))
        .route(
            "/api/metrics/{name}",
            get(get_metric).put(update_metric).delete(delete_metric),
        )
        .route(
            "/api/connections/mysql/{name}",
            put(put_mysql_connection).delete(delete_mysql_connection),
        )
        .route(
            "/api/connections/redis/{name}",
            put(put_redis_connection).delete(delete_redis_connection),
        )
        .route(
            "/api/connections/http/{name}",
            put(put_http_connection).delete(delete_http_connection),
        )
        .route(
            "/api/connections/iotdb",
            put(put_iotdb_connection).delete(delete_iotdb_connection),
        )
        .route("/api/datasource/test/mysql", post(test_mysql))
        .route("/api/datasource/test/redis", post(test_redis))
        .route("/api/datasource/test/iotdb", post(test_iotdb))
        .route("/api/datasource/test/http", post(test_http))
        .with_state(state)
}

fn reply(status: StatusCode, result: ReloadResult) -> Response {
    (status, Json(result)).into_response()
}

fn rejected(status: StatusCode, error: impl Into<String>) -> Response {
    reply(status, ReloadResult::failure(error))
}

/// Validate, persist, reload. The shared tail of every mutation.
async fn apply(state: &ApiState, mut config: Config) -> Response {
    config.apply_defaults();
    if let Err(err) = config.validate() {
        return rejected(StatusCode::BAD_REQUEST, err.to_string());
    }
    if let Err(err) = config.save(state.config_path.as_ref()) {
        return rejected(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to persist config: {err}"),
        );
    }

    let result = state.service.reload_config(config).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    reply(status, result)
}

async fn get_config(State(state): State<ApiState>) -> Response {
    Json(state.service.current_config().await).into_response()
}

async fn update_config(State(state): State<ApiState>, Json(config): Json<Config>) -> Response {
    info!("Applying full configuration replacement");
    apply(&state, config).await
}

async fn list_metrics(State(state): State<ApiState>) -> Response {
    Json(state.service.current_config().await.metrics).into_response()
}

async fn get_metric(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let config = state.service.current_config().await;
    match config.metrics.into_iter().find(|m| m.name == name) {
        Some(spec) => Json(spec).into_response(),
        None => rejected(StatusCode::NOT_FOUND, format!("metric '{name}' not found")),
    }
}

async fn create_metric(State(state): State<ApiState>, Json(spec): Json<MetricSpec>) -> Response {
    let mut config = state.service.current_config().await;
    if config.metrics.iter().any(|m| m.name == spec.name) {
        return rejected(
            StatusCode::CONFLICT,
            format!("metric '{}' already exists", spec.name),
        );
    }
    config.metrics.push(spec);
    apply(&state, config).await
}

async fn update_metric(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(spec): Json<MetricSpec>,
) -> Response {
    if spec.name != name {
        return rejected(
            StatusCode::BAD_REQUEST,
            "metric name in body does not match the path",
        );
    }
    let mut config = state.service.current_config().await;
    match config.metrics.iter_mut().find(|m| m.name == name) {
        Some(slot) => *slot = spec,
        None => return rejected(StatusCode::NOT_FOUND, format!("metric '{name}' not found")),
    }
    apply(&state, config).await
}

async fn delete_metric(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let mut config = state.service.current_config().await;
    let before = config.metrics.len();
    config.metrics.retain(|m| m.name != name);
    if config.metrics.len() == before {
        return rejected(StatusCode::NOT_FOUND, format!("metric '{name}' not found"));
    }
    apply(&state, config).await
}

async fn put_mysql_connection(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(connection): Json<MySqlConfig>,
) -> Response {
    let mut config = state.service.current_config().await;
    config.mysql_connections.insert(name, connection);
    apply(&state, config).await
}

async fn delete_mysql_connection(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    let mut config = state.service.current_config().await;
    if config.mysql_connections.remove(&name).is_none() {
        return rejected(
            StatusCode::NOT_FOUND,
            format!("mysql connection '{name}' not found"),
        );
    }
    apply(&state, config).await
}

async fn put_redis_connection(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(connection): Json<RedisConfig>,
) -> Response {
    let mut config = state.service.current_config().await;
    config.redis_connections.insert(name, connection);
    apply(&state, config).await
}

async fn delete_redis_connection(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    let mut config = state.service.current_config().await;
    if config.redis_connections.remove(&name).is_none() {
        return rejected(
            StatusCode::NOT_FOUND,
            format!("redis connection '{name}' not found"),
        );
    }
    apply(&state, config).await
}

async fn put_http_connection(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(connection): Json<HttpConfig>,
) -> Response {
    let mut config = state.service.current_config().await;
    config.http_connections.insert(name, connection);
    apply(&state, config).await
}

async fn delete_http_connection(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    let mut config = state.service.current_config().await;
    if config.http_connections.remove(&name).is_none() {
        return rejected(
            StatusCode::NOT_FOUND,
            format!("http connection '{name}' not found"),
        );
    }
    apply(&state, config).await
}

async fn put_iotdb_connection(
    State(state): State<ApiState>,
    Json(connection): Json<IotDbConfig>,
) -> Response {
    let mut config = state.service.current_config().await;
    config.iotdb = Some(connection);
    apply(&state, config).await
}

async fn delete_iotdb_connection(State(state): State<ApiState>) -> Response {
    let mut config = state.service.current_config().await;
    if config.iotdb.take().is_none() {
        return rejected(StatusCode::NOT_FOUND, "no iotdb connection configured");
    }
    apply(&state, config).await
}

// Connection tests open a throwaway client from the posted config and probe
// it; running state is never touched. Failures are reported in the body with
// a 200 so the caller can distinguish "unreachable backend" from "bad
// request".

fn test_reply(kind: &str, outcome: Result<Result<(), BackendError>, tokio::time::error::Elapsed>) -> Response {
    let body = match outcome {
        Ok(Ok(())) => json!({ "success": true, "message": format!("{kind} connection ok") }),
        Ok(Err(err)) => json!({ "success": false, "error": err.to_string() }),
        Err(_) => json!({ "success": false, "error": "connection test timed out" }),
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn test_mysql(Json(config): Json<MySqlConfig>) -> Response {
    let outcome = tokio::time::timeout(TEST_TIMEOUT, async {
        let client = MySqlClient::connect(&config).await?;
        let result = client.health_check().await;
        client.close().await;
        result
    })
    .await;
    test_reply("mysql", outcome)
}

async fn test_redis(Json(config): Json<RedisConfig>) -> Response {
    let outcome = tokio::time::timeout(TEST_TIMEOUT, async {
        let client = RedisClient::connect(&config).await?;
        let result = client.health_check().await;
        client.close();
        result
    })
    .await;
    test_reply("redis", outcome)
}

async fn test_iotdb(Json(config): Json<IotDbConfig>) -> Response {
    let outcome = tokio::time::timeout(TEST_TIMEOUT, async {
        let client = IotDbClient::connect(&config).await?;
        let result = client.health_check().await;
        client.close();
        result
    })
    .await;
    test_reply("iotdb", outcome)
}

async fn test_http(Json(config): Json<HttpConfig>) -> Response {
    let outcome = tokio::time::timeout(TEST_TIMEOUT, async {
        let client = HttpClient::connect(&config)?;
        let result = client.health_check().await;
        client.close();
        result
    })
    .await;
    test_reply("http", outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn make_state(tag: &str) -> ApiState {
        let config = Config::parse(
            r#"{
                http_connections: { default: { base_url: "http://127.0.0.1:9" } },
                metrics: [{ name: "probe", help: "Probe", source: "http" }],
            }"#,
        )
        .unwrap();
        let service = CollectorService::new(config).await.unwrap();
        let path = std::env::temp_dir().join(format!("quarry-api-test-{tag}.json"));
        ApiState::new(service, path)
    }

    #[tokio::test]
    async fn get_config_returns_running_config() {
        let router = router(make_state("get-config").await);

        let response = router
            .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let config: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(config["metrics"][0]["name"], "probe");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_with_400() {
        let router = router(make_state("invalid-config").await);

        // No metrics at all: validation must refuse it.
        let response = router
            .oneshot(
                Request::put("/api/config")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let result: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("metric"));
    }

    #[tokio::test]
    async fn unknown_metric_returns_404() {
        let router = router(make_state("missing-metric").await);

        let response = router
            .oneshot(
                Request::get("/api/metrics/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_last_metric_fails_validation() {
        let router = router(make_state("delete-last").await);

        let response = router
            .oneshot(
                Request::delete("/api/metrics/probe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
