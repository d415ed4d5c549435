use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use redix_driver::{Cmd, DriverError, Value};

/// Translate a reply from the `redis` crate.
pub(crate) fn from_redis(v: redis::Value) -> Result<Value, DriverError> {
    Ok(match v {
        redis::Value::Nil => Value::Nil,
        redis::Value::Int(i) => Value::Int(i),
        redis::Value::BulkString(b) => Value::Bulk(Bytes::from(b)),
        redis::Value::SimpleString(s) => Value::Status(s),
        redis::Value::Okay => Value::ok(),
        redis::Value::Double(d) => Value::Double(d),
        redis::Value::Boolean(b) => Value::Bool(b),
        redis::Value::VerbatimString { text, .. } => Value::Bulk(Bytes::from(text)),
        redis::Value::Array(items) | redis::Value::Set(items) | redis::Value::Push { data: items, .. } => {
            Value::Array(items.into_iter().map(from_redis).collect::<Result<_, _>>()?)
        }
        redis::Value::Map(pairs) => Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| Ok((from_redis(k)?, from_redis(v)?)))
                .collect::<Result<_, DriverError>>()?,
        ),
        redis::Value::Attribute { data, .. } => from_redis(*data)?,
        other => return Err(DriverError::UnexpectedReply(format!("{other:?}"))),
    })
}

/// Translate an outgoing command.
pub(crate) fn to_redis(cmd: &Cmd) -> redis::Cmd {
    let mut out = redis::Cmd::new();
    for token in cmd.tokens() {
        out.arg(token.as_ref());
    }
    out
}

/// Map an error from the `redis` crate onto the typed variants.
pub(crate) fn map_error(e: &redis::RedisError) -> DriverError {
    if e.is_timeout() {
        DriverError::Timeout(None)
    } else if e.is_connection_refusal() || e.is_connection_dropped() {
        DriverError::Connection(e.to_string())
    } else if e.is_io_error() {
        DriverError::Io(e.to_string())
    } else {
        DriverError::classify(e.to_string())
    }
}

pub(crate) fn map_pool_error(e: deadpool_redis::PoolError) -> DriverError {
    match e {
        deadpool_redis::PoolError::Backend(e) => map_error(&e),
        deadpool_redis::PoolError::Closed => DriverError::Closed,
        deadpool_redis::PoolError::Timeout(_) => DriverError::Timeout(None),
        other => DriverError::Connection(other.to_string()),
    }
}

/// Run `fut` under the request timeout, if one is configured.
pub(crate) async fn bounded<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    match timeout {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| DriverError::Timeout(Some(d)))?,
        None => fut.await,
    }
}
