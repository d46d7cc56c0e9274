//! Backend query clients for the Quarry exporter.
//!
//! One client per backend kind, all with the same surface: `connect` opens
//! the pool or session and runs a bounded probe, `query_scalar` executes one
//! query and returns one finite number, `health_check` verifies the
//! connection without side effects, `close` is idempotent.
//!
//! - [`mysql`] - aggregate SQL statements over a sqlx pool
//! - [`iotdb`] - IoTDB REST queries, column pick + sum semantics
//! - [`redis`] - allow-listed read-only commands
//! - [`http`] - JSON endpoints with dotted-path extraction and retries
//!
//! Every error is a per-metric collection failure; nothing here is fatal to
//! the collection service.

pub mod error;
pub mod http;
pub mod iotdb;
pub mod mysql;
pub mod redis;

pub use error::{BackendError, Result};
pub use http::HttpClient;
pub use iotdb::IotDbClient;
pub use mysql::MySqlClient;
pub use redis::RedisClient;
