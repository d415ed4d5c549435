use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redix_core::Protocol;
use redix_driver::{
    Cmd, Connector, DedicatedConnection, Driver, DriverError, DriverOptions, LocalCache, Message,
    Script, Value,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::server::MemoryServer;

/// Address reported for the single node of a mock cluster.
const CLUSTER_NODE: &str = "127.0.0.1:7000";

/// [`Connector`] producing drivers bound to a [`MemoryServer`].
///
/// Connecting enforces the same capability checks a real server would:
/// cluster clients need `cluster_enabled`, and RESP3 (and with it
/// client-side caching) needs `HELLO 3` support.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

impl MemoryConnector {
    pub fn new(server: MemoryServer) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, options: &DriverOptions) -> Result<Arc<dyn Driver>, DriverError> {
        if let Some(err) = self.server.take_connect_fault() {
            return Err(err);
        }
        if options.cluster && !self.server.options().cluster_enabled {
            return Err(DriverError::ClusterDisabled(
                "ERR This instance has cluster support disabled".to_owned(),
            ));
        }
        if options.protocol == Protocol::V3 && !self.server.options().resp3 {
            if options.cache_requested() {
                return Err(DriverError::NoCache);
            }
            return Err(DriverError::Resp3Unsupported("ERR unknown command 'HELLO'".to_owned()));
        }

        self.server.record_connect(options);
        let id = self.server.next_id();
        let cache = options.cache_requested().then(|| {
            let cache = LocalCache::new(options.cache_size);
            self.server.register_cache(id, cache.clone());
            cache
        });
        debug!(id, cluster = options.cluster, cache = cache.is_some(), "memory driver connected");
        Ok(Arc::new(MemoryDriver {
            server: self.server.clone(),
            id,
            cluster: options.cluster,
            cache,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A driver executing commands directly against a [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryDriver {
    server: MemoryServer,
    id: u64,
    cluster: bool,
    cache: Option<LocalCache>,
    closed: AtomicBool,
}

impl MemoryDriver {
    fn check_open(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    fn run(&self, cmd: &Cmd) -> Result<Value, DriverError> {
        self.check_open()?;
        let reply = self.server.execute(cmd)?;
        // Cluster clients fan INFO out to every primary and key the replies by node.
        if self.cluster && cmd.name() == "INFO" {
            return Ok(Value::Map(vec![(Value::bulk(CLUSTER_NODE), reply)]));
        }
        Ok(reply)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn exec(&self, cmd: Cmd) -> Result<Value, DriverError> {
        self.run(&cmd)
    }

    async fn exec_cached(&self, cmd: Cmd, ttl: Duration) -> Result<(Value, bool), DriverError> {
        let Some(cache) = &self.cache else {
            return self.run(&cmd).map(|v| (v, false));
        };
        self.check_open()?;
        if let Some(hit) = cache.get(&cmd).await {
            return Ok((hit, true));
        }
        let reply = self.run(&cmd)?;
        cache.insert(&cmd, reply.clone(), ttl).await;
        Ok((reply, false))
    }

    async fn exec_batch(&self, cmds: Vec<Cmd>) -> Vec<Result<Value, DriverError>> {
        cmds.iter().map(|cmd| self.run(cmd)).collect()
    }

    async fn eval(&self, script: &Script, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError> {
        self.check_open()?;
        self.server.eval(script, keys, args)
    }

    async fn dedicate(
        &self,
        sink: mpsc::Sender<Message>,
    ) -> Result<Box<dyn DedicatedConnection>, DriverError> {
        self.check_open()?;
        let id = self.server.next_id();
        self.server.add_subscriber(id, sink);
        Ok(Box::new(MemoryDedicated {
            server: self.server.clone(),
            id,
        }))
    }

    fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.server.release_cache(self.id);
            debug!(id = self.id, "memory driver closed");
        }
    }
}

/// A pub/sub registration on the mock server. Dropping it unsubscribes
/// from everything and closes the message sink.
#[derive(Debug)]
struct MemoryDedicated {
    server: MemoryServer,
    id: u64,
}

impl Drop for MemoryDedicated {
    fn drop(&mut self) {
        self.server.remove_subscriber(self.id);
    }
}

#[async_trait]
impl DedicatedConnection for MemoryDedicated {
    async fn subscribe(&mut self, channels: &[String]) -> Result<(), DriverError> {
        self.server
            .update_subscriber(self.id, |c, _| c.extend(channels.iter().cloned()))
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<(), DriverError> {
        self.server.update_subscriber(self.id, |c, _| {
            if channels.is_empty() {
                c.clear();
            } else {
                for ch in channels {
                    c.remove(ch);
                }
            }
        })
    }

    async fn psubscribe(&mut self, patterns: &[String]) -> Result<(), DriverError> {
        self.server
            .update_subscriber(self.id, |_, p| p.extend(patterns.iter().cloned()))
    }

    async fn punsubscribe(&mut self, patterns: &[String]) -> Result<(), DriverError> {
        self.server.update_subscriber(self.id, |_, p| {
            if patterns.is_empty() {
                p.clear();
            } else {
                for pat in patterns {
                    p.remove(pat);
                }
            }
        })
    }

    async fn close(self: Box<Self>) {
        drop(self);
    }
}
