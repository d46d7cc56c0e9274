//! Configuration-driven Prometheus exporter.
//!
//! Quarry periodically executes scalar queries against MySQL, IoTDB, Redis
//! and arbitrary HTTP/JSON endpoints and publishes the results on a
//! Prometheus scrape endpoint. A control-plane API applies configuration
//! edits live, without a process restart.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │   Backends   │────>│ CollectorService │────>│   HTTP Server   │
//! │ mysql/iotdb/ │     │ scheduler+reload │     │ /metrics, /api  │
//! │  redis/http  │     │ private registry │     │                 │
//! └──────────────┘     └──────────────────┘     └─────────────────┘
//! ```
//!
//! - [`instruments`] - instrument registry: fingerprints, help stability,
//!   registry reconciliation
//! - [`clients`] - backend client pool keyed by `(kind, connection name)`
//! - [`service`] - the collection service and its scheduler
//! - [`reload`] - hot configuration apply
//! - [`http`] - scrape endpoint and HTTP server
//! - [`api`] - control-plane configuration API

pub mod api;
pub mod clients;
pub mod http;
pub mod instruments;
pub mod reload;
pub mod service;

pub use api::ApiState;
pub use http::{create_router, HttpServer};
pub use reload::ReloadResult;
pub use service::CollectorService;
