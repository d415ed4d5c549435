use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::Pool;
use futures::future::join_all;
use redis::cluster_async::ClusterConnection;
use redix_driver::{
    Cmd, DedicatedConnection, Driver, DriverError, LocalCache, Message, Script, Value,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::convert::{bounded, from_redis, map_error, map_pool_error, to_redis};
use crate::pubsub::RedisDedicated;

/// How commands reach the server.
pub(crate) enum Backend {
    /// Pooled multiplexed connections to a single node.
    Standalone(Pool),
    /// A slot-aware connection to every primary.
    Cluster(ClusterConnection),
}

/// A [`Driver`] over the `redis` crate.
///
/// Standalone and sentinel-resolved servers go through a `deadpool-redis`
/// pool; clusters through the `redis` cluster connection. Client-side
/// caching is a TTL-bounded local cache. Uncached calls through this driver
/// drop every entry, so a process reads its own writes; writes from other
/// clients are only seen once the TTL runs out.
pub struct RedisDriver {
    backend: Backend,
    /// Used to open dedicated pub/sub connections.
    pubsub_client: redis::Client,
    cache: Option<LocalCache>,
    timeout: Option<Duration>,
    buffer: usize,
    closed: AtomicBool,
}

impl RedisDriver {
    pub(crate) fn new(
        backend: Backend,
        pubsub_client: redis::Client,
        cache: Option<LocalCache>,
        timeout: Option<Duration>,
        buffer: usize,
    ) -> Self {
        Self {
            backend,
            pubsub_client,
            cache,
            timeout,
            buffer,
            closed: AtomicBool::new(false),
        }
    }

    /// Any uncached call may have written a cached key.
    fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    fn check_open(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    async fn query(&self, cmd: &redis::Cmd) -> Result<Value, DriverError> {
        self.check_open()?;
        let reply: redis::Value = bounded(self.timeout, async {
            match &self.backend {
                Backend::Standalone(pool) => {
                    let mut conn = pool.get().await.map_err(map_pool_error)?;
                    cmd.query_async(&mut conn).await.map_err(|e| map_error(&e))
                }
                Backend::Cluster(conn) => {
                    let mut conn = conn.clone();
                    cmd.query_async(&mut conn).await.map_err(|e| map_error(&e))
                }
            }
        })
        .await?;
        from_redis(reply)
    }

    /// Issue every command on one connection without waiting in between, so
    /// the requests share round-trips. Each command keeps its own result.
    async fn batch<C>(&self, conn: C, cmds: &[Cmd]) -> Vec<Result<Value, DriverError>>
    where
        C: redis::aio::ConnectionLike + Clone + Send,
    {
        let calls = cmds.iter().map(|cmd| {
            let mut conn = conn.clone();
            let cmd = to_redis(cmd);
            async move {
                let reply: redis::Value = bounded(self.timeout, async {
                    cmd.query_async(&mut conn).await.map_err(|e| map_error(&e))
                })
                .await?;
                from_redis(reply)
            }
        });
        join_all(calls).await
    }
}

#[async_trait]
impl Driver for RedisDriver {
    async fn exec(&self, cmd: Cmd) -> Result<Value, DriverError> {
        let reply = self.query(&to_redis(&cmd)).await;
        self.invalidate_cache();
        reply
    }

    async fn exec_cached(&self, cmd: Cmd, ttl: Duration) -> Result<(Value, bool), DriverError> {
        let Some(cache) = &self.cache else {
            return self.query(&to_redis(&cmd)).await.map(|v| (v, false));
        };
        if let Some(hit) = cache.get(&cmd).await {
            return Ok((hit, true));
        }
        let reply = self.query(&to_redis(&cmd)).await?;
        cache.insert(&cmd, reply.clone(), ttl).await;
        Ok((reply, false))
    }

    async fn exec_batch(&self, cmds: Vec<Cmd>) -> Vec<Result<Value, DriverError>> {
        if let Err(e) = self.check_open() {
            return cmds.iter().map(|_| Err(e.clone())).collect();
        }
        let results = match &self.backend {
            Backend::Standalone(pool) => match pool.get().await {
                Ok(conn) => {
                    let multiplexed: redis::aio::MultiplexedConnection = (*conn).clone();
                    self.batch(multiplexed, &cmds).await
                }
                Err(e) => {
                    let e = map_pool_error(e);
                    cmds.iter().map(|_| Err(e.clone())).collect()
                }
            },
            Backend::Cluster(conn) => self.batch(conn.clone(), &cmds).await,
        };
        self.invalidate_cache();
        results
    }

    async fn eval(&self, script: &Script, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError> {
        self.check_open()?;
        let script = redis::Script::new(script.source());
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg.as_ref());
        }
        let reply: Result<redis::Value, _> = bounded(self.timeout, async {
            match &self.backend {
                Backend::Standalone(pool) => {
                    let mut conn = pool.get().await.map_err(map_pool_error)?;
                    invocation.invoke_async(&mut conn).await.map_err(|e| map_error(&e))
                }
                Backend::Cluster(conn) => {
                    let mut conn = conn.clone();
                    invocation.invoke_async(&mut conn).await.map_err(|e| map_error(&e))
                }
            }
        })
        .await;
        self.invalidate_cache();
        from_redis(reply?)
    }

    async fn dedicate(
        &self,
        sink: mpsc::Sender<Message>,
    ) -> Result<Box<dyn DedicatedConnection>, DriverError> {
        self.check_open()?;
        let pubsub = bounded(self.timeout, async {
            self.pubsub_client
                .get_async_pubsub()
                .await
                .map_err(|e| map_error(&e))
        })
        .await?;
        Ok(Box::new(RedisDedicated::spawn(pubsub, sink, self.buffer)))
    }

    fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Backend::Standalone(pool) = &self.backend {
            pool.close();
        }
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
        debug!("redis driver closed");
    }
}
