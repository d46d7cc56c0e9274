//! Read-only Redis commands with an allow-listed command set.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

use quarry_common::RedisConfig;

use crate::error::{BackendError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands a metric query may run. Everything here is read-only and returns
/// a single scalar-convertible reply.
const ALLOWED_COMMANDS: [&str; 12] = [
    "GET", "HGET", "LLEN", "SCARD", "ZCARD", "PFCOUNT", "STRLEN", "HLEN", "ZCOUNT", "EXISTS",
    "ZSCORE", "DBSIZE",
];

/// Redis client for read-only scalar queries.
pub struct RedisClient {
    conn: MultiplexedConnection,
}

impl RedisClient {
    /// Open a multiplexed connection and verify it with a bounded PING.
    pub async fn connect(cfg: &RedisConfig) -> Result<Self> {
        if cfg.addr.is_empty() {
            return Err(BackendError::Config("redis config requires addr".into()));
        }
        if cfg.mode != "standalone" {
            return Err(BackendError::Config(format!(
                "only standalone mode is supported, got '{}'",
                cfg.mode
            )));
        }

        let (host, port) = split_addr(&cfg.addr)?;
        let addr = if cfg.enable_tls {
            ConnectionAddr::TcpTls {
                host,
                port,
                insecure: cfg.skip_tls_verify,
                tls_params: None,
            }
        } else {
            ConnectionAddr::Tcp(host, port)
        };

        let info = ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: cfg.db as i64,
                username: (!cfg.username.is_empty()).then(|| cfg.username.clone()),
                password: (!cfg.password.is_empty()).then(|| cfg.password.clone()),
                ..Default::default()
            },
        };

        let client =
            redis::Client::open(info).map_err(|e| BackendError::Config(e.to_string()))?;
        let conn = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| BackendError::Timeout(CONNECT_TIMEOUT))?
        .map_err(|e| BackendError::Connect(e.to_string()))?;

        let client = Self { conn };
        client.health_check().await?;
        Ok(client)
    }

    /// Run a whitespace-tokenized command from the allow-list and parse the
    /// reply as a float.
    pub async fn query_scalar(&self, raw: &str) -> Result<f64> {
        let (command, args) = parse_command(raw)?;

        let mut cmd = redis::cmd(&command);
        for arg in args {
            cmd.arg(arg);
        }

        let mut conn = self.conn.clone();
        let value: redis::Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BackendError::Execution(e.to_string()))?;

        reply_to_f64(&command, value)
    }

    /// PING the server.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let reply: std::result::Result<String, redis::RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        reply
            .map(|_| ())
            .map_err(|e| BackendError::Connect(e.to_string()))
    }

    /// Release the connection. The multiplexed connection closes when the
    /// last clone drops. Idempotent.
    pub fn close(&self) {}
}

fn split_addr(addr: &str) -> Result<(String, u16)> {
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BackendError::Config(format!("invalid redis port in '{addr}'")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), 6379)),
    }
}

/// Split a raw query into command and arguments, enforcing the allow-list.
fn parse_command(raw: &str) -> Result<(String, Vec<&str>)> {
    let mut fields = raw.split_whitespace();
    let command = fields
        .next()
        .ok_or_else(|| BackendError::Query("redis command must not be empty".into()))?
        .to_ascii_uppercase();

    if !ALLOWED_COMMANDS.contains(&command.as_str()) {
        return Err(BackendError::CommandNotAllowed(command));
    }

    Ok((command, fields.collect()))
}

fn reply_to_f64(command: &str, value: redis::Value) -> Result<f64> {
    match value {
        redis::Value::Nil => Err(BackendError::EmptyResult),
        redis::Value::Int(v) => Ok(v as f64),
        redis::Value::Double(v) => Ok(v),
        redis::Value::Boolean(v) => Ok(if v { 1.0 } else { 0.0 }),
        redis::Value::BulkString(bytes) => {
            let text = String::from_utf8(bytes)
                .map_err(|_| BackendError::NonNumeric(format!("{command} reply is not UTF-8")))?;
            text.parse::<f64>()
                .map_err(|_| BackendError::NonNumeric(format!("{command} reply '{text}'")))
        }
        redis::Value::SimpleString(text) => text
            .parse::<f64>()
            .map_err(|_| BackendError::NonNumeric(format!("{command} reply '{text}'"))),
        other => Err(BackendError::NonNumeric(format!(
            "{command} reply {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_accepts_read_commands() {
        let (cmd, args) = parse_command("GET some:key").unwrap();
        assert_eq!(cmd, "GET");
        assert_eq!(args, vec!["some:key"]);

        let (cmd, args) = parse_command("zcount board 0 100").unwrap();
        assert_eq!(cmd, "ZCOUNT");
        assert_eq!(args, vec!["board", "0", "100"]);
    }

    #[test]
    fn write_commands_are_rejected() {
        for raw in ["DEL foo", "SET foo 1", "FLUSHALL", "hset h f v"] {
            match parse_command(raw) {
                Err(BackendError::CommandNotAllowed(cmd)) => {
                    assert_eq!(cmd, raw.split(' ').next().unwrap().to_ascii_uppercase());
                }
                other => panic!("expected CommandNotAllowed, got {other:?}"),
            }
        }
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(parse_command("   "), Err(BackendError::Query(_))));
    }

    #[test]
    fn replies_convert_to_floats() {
        assert_eq!(reply_to_f64("LLEN", redis::Value::Int(12)).unwrap(), 12.0);
        assert_eq!(
            reply_to_f64("GET", redis::Value::BulkString(b"3.25".to_vec())).unwrap(),
            3.25
        );
        assert_eq!(
            reply_to_f64("EXISTS", redis::Value::Boolean(true)).unwrap(),
            1.0
        );
    }

    #[test]
    fn nil_reply_is_an_error() {
        assert!(matches!(
            reply_to_f64("GET", redis::Value::Nil),
            Err(BackendError::EmptyResult)
        ));
    }

    #[test]
    fn non_numeric_reply_is_an_error() {
        assert!(matches!(
            reply_to_f64("GET", redis::Value::BulkString(b"hello".to_vec())),
            Err(BackendError::NonNumeric(_))
        ));
    }

    #[test]
    fn addr_splitting() {
        assert_eq!(split_addr("cache:6380").unwrap(), ("cache".into(), 6380));
        assert_eq!(split_addr("cache").unwrap(), ("cache".into(), 6379));
        assert!(split_addr("cache:notaport").is_err());
    }
}
