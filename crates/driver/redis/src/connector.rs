use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::cluster::ClusterClient;
use redix_core::Protocol;
use redix_driver::{Connector, Driver, DriverError, DriverOptions, LocalCache};
use tracing::{debug, info, warn};

use crate::convert::{bounded, map_error, map_pool_error};
use crate::driver::{Backend, RedisDriver};
use crate::url::{node_url, sentinel_url};

/// Used when no transport timeout is configured, so a dead address
/// cannot stall negotiation forever.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`Connector`] for real Redis deployments: standalone, sentinel, and
/// cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Errors raised while switching to RESP3 mean the server cannot speak it.
fn protocol_error(options: &DriverOptions, err: DriverError) -> DriverError {
    if options.protocol != Protocol::V3 {
        return err;
    }
    let text = err.to_string().to_ascii_lowercase();
    if text.contains("hello") || text.contains("resp3") || text.contains("protocol") {
        if options.cache_requested() {
            DriverError::NoCache
        } else {
            DriverError::Resp3Unsupported(err.to_string())
        }
    } else {
        err
    }
}

/// Ask each sentinel in turn for the current master of `master_set`.
async fn resolve_master(options: &DriverOptions, master_set: &str, timeout: Duration) -> Result<String, DriverError> {
    let mut last = DriverError::Connection("no sentinel addresses".to_owned());
    for addr in &options.addresses {
        let attempt = bounded(Some(timeout), async {
            let client = redis::Client::open(sentinel_url(addr)).map_err(|e| map_error(&e))?;
            let mut conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| map_error(&e))?;
            let master: Option<(String, u16)> = redis::cmd("SENTINEL")
                .arg("get-master-addr-by-name")
                .arg(master_set)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_error(&e))?;
            master
                .map(|(host, port)| format!("{host}:{port}"))
                .ok_or_else(|| DriverError::Connection(format!("sentinel {addr} does not know master {master_set}")))
        })
        .await;
        match attempt {
            Ok(master) => {
                info!(sentinel = %addr, master = %master, master_set, "resolved master through sentinel");
                return Ok(master);
            }
            Err(e) => {
                warn!(sentinel = %addr, error = %e, "sentinel lookup failed");
                last = e;
            }
        }
    }
    Err(last)
}

fn build_pool(url: &str, options: &DriverOptions, timeout: Duration) -> Result<Pool, DriverError> {
    Config::from_url(url)
        .builder()
        .map(|b| {
            b.max_size(options.pool_size.max(1))
                .wait_timeout(Some(timeout))
                .runtime(Runtime::Tokio1)
                .build()
        })
        .map_err(|e| DriverError::Connection(e.to_string()))?
        .map_err(|e| DriverError::Connection(e.to_string()))
}

async fn connect_standalone(
    addr: &str,
    options: &DriverOptions,
    timeout: Duration,
) -> Result<(Backend, redis::Client), DriverError> {
    let url = node_url(addr, options, true);
    let pool = build_pool(&url, options, timeout)?;
    // Pools connect lazily; take one connection now so capability errors
    // surface during connect.
    bounded(Some(timeout), async {
        let mut conn = pool.get().await.map_err(map_pool_error)?;
        let _: redis::Value = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_error(&e))?;
        Ok(())
    })
    .await
    .map_err(|e| protocol_error(options, e))?;

    let client = redis::Client::open(url).map_err(|e| map_error(&e))?;
    Ok((Backend::Standalone(pool), client))
}

async fn connect_cluster(options: &DriverOptions, timeout: Duration) -> Result<(Backend, redis::Client), DriverError> {
    let urls: Vec<String> = options
        .addresses
        .iter()
        .map(|a| node_url(a, options, false))
        .collect();
    let client = ClusterClient::builder(urls.clone())
        .build()
        .map_err(|e| map_error(&e))?;
    let conn = bounded(Some(timeout), async {
        client.get_async_connection().await.map_err(|e| map_error(&e))
    })
    .await
    .map_err(|e| protocol_error(options, e))?;

    let first = urls
        .first()
        .ok_or_else(|| DriverError::Connection("no cluster addresses".to_owned()))?;
    let pubsub = redis::Client::open(first.as_str()).map_err(|e| map_error(&e))?;
    Ok((Backend::Cluster(conn), pubsub))
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, options: &DriverOptions) -> Result<Arc<dyn Driver>, DriverError> {
        let Some(first) = options.addresses.first() else {
            return Err(DriverError::Connection("no addresses configured".to_owned()));
        };
        let timeout = options.request_timeout().unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        let (backend, pubsub_client) = if let Some(master_set) = &options.master_set {
            let master = resolve_master(options, master_set, timeout).await?;
            connect_standalone(&master, options, timeout).await?
        } else if options.cluster && !options.force_single_client {
            connect_cluster(options, timeout).await?
        } else {
            connect_standalone(first, options, timeout).await?
        };

        let cache = options.cache_requested().then(|| LocalCache::new(options.cache_size));
        debug!(
            addresses = ?options.addresses,
            cluster = options.cluster,
            protocol = %options.protocol,
            cache = cache.is_some(),
            "redis driver connected"
        );
        Ok(Arc::new(RedisDriver::new(
            backend,
            pubsub_client,
            cache,
            options.request_timeout(),
            options.ring_capacity(),
        )))
    }
}
