use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use dashmap::DashMap;
use redix_driver::{Cmd, DriverError, DriverOptions, LocalCache, Message, Script, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::keyspace::{Keyspace, glob_match, is_readonly};
use crate::scripts;

/// What the mock server claims to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryServerOptions {
    /// Reported as `redis_version` in `INFO`.
    pub version: String,
    /// Reported as `cluster_enabled` in `INFO`; cluster clients are refused
    /// when unset.
    pub cluster_enabled: bool,
    /// Whether `HELLO 3` succeeds.
    pub resp3: bool,
}

impl Default for MemoryServerOptions {
    fn default() -> Self {
        Self {
            version: "7.2.4".to_owned(),
            cluster_enabled: false,
            resp3: true,
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    sink: mpsc::Sender<Message>,
    channels: HashSet<String>,
    patterns: HashSet<String>,
}

#[derive(Debug, Default)]
struct ServerState {
    options: MemoryServerOptions,
    keyspace: Mutex<Keyspace>,
    subscribers: DashMap<u64, Subscriber>,
    caches: DashMap<u64, LocalCache>,
    connect_faults: Mutex<VecDeque<DriverError>>,
    connect_attempts: Mutex<Vec<DriverOptions>>,
    next_id: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-process stand-in for a Redis server.
///
/// Cloning yields another handle to the same server, so several clients
/// (and several delay-queue instances) can share one keyspace.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<ServerState>,
}

impl MemoryServer {
    /// A standalone server with RESP3 support.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MemoryServerOptions) -> Self {
        Self {
            state: Arc::new(ServerState {
                options,
                ..ServerState::default()
            }),
        }
    }

    /// A server reporting `cluster_enabled:1`.
    pub fn cluster() -> Self {
        Self::with_options(MemoryServerOptions {
            cluster_enabled: true,
            ..MemoryServerOptions::default()
        })
    }

    pub fn options(&self) -> &MemoryServerOptions {
        &self.state.options
    }

    /// Make the next connect attempt fail with `err`. Queued faults are
    /// consumed one per attempt, before any other check.
    pub fn fail_next_connect(&self, err: DriverError) {
        lock(&self.state.connect_faults).push_back(err);
    }

    /// Options of every successful connect, oldest first.
    pub fn connect_attempts(&self) -> Vec<DriverOptions> {
        lock(&self.state.connect_attempts).clone()
    }

    /// Number of dedicated pub/sub connections currently open.
    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.len()
    }

    /// Drop every key.
    pub fn flush(&self) {
        lock(&self.state.keyspace).clear();
        self.invalidate_caches();
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.state.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn take_connect_fault(&self) -> Option<DriverError> {
        lock(&self.state.connect_faults).pop_front()
    }

    pub(crate) fn record_connect(&self, options: &DriverOptions) {
        lock(&self.state.connect_attempts).push(options.clone());
    }

    pub(crate) fn register_cache(&self, id: u64, cache: LocalCache) {
        self.state.caches.insert(id, cache);
    }

    pub(crate) fn release_cache(&self, id: u64) {
        self.state.caches.remove(&id);
    }

    fn invalidate_caches(&self) {
        for cache in &self.state.caches {
            cache.value().invalidate_all();
        }
    }

    fn info(&self) -> String {
        format!(
            "# Server\r\nredis_version:{}\r\nredis_mode:{}\r\n\r\n# Cluster\r\ncluster_enabled:{}\r\n",
            self.state.options.version,
            if self.state.options.cluster_enabled { "cluster" } else { "standalone" },
            u8::from(self.state.options.cluster_enabled),
        )
    }

    /// Execute one command.
    pub(crate) fn execute(&self, cmd: &Cmd) -> Result<Value, DriverError> {
        let name = cmd.name();
        let args = cmd.tokens().get(1..).unwrap_or_default();
        match name.as_str() {
            "INFO" => Ok(Value::bulk(self.info())),
            "PUBLISH" => {
                let (Some(channel), Some(payload)) = (args.first(), args.get(1)) else {
                    return Err(DriverError::Server(
                        "ERR wrong number of arguments for 'publish' command".to_owned(),
                    ));
                };
                let receivers = self.publish(&String::from_utf8_lossy(channel), payload);
                Ok(Value::Int(i64::try_from(receivers).unwrap_or(i64::MAX)))
            }
            _ => {
                let reply = lock(&self.state.keyspace).execute(&name, args);
                if !is_readonly(&name) {
                    self.invalidate_caches();
                }
                reply
            }
        }
    }

    pub(crate) fn eval(&self, script: &Script, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError> {
        let Some(run) = scripts::lookup(script.name()) else {
            return Err(DriverError::Server(format!(
                "NOSCRIPT No matching script named '{}'",
                script.name()
            )));
        };
        let reply = run(&mut lock(&self.state.keyspace), keys, args);
        self.invalidate_caches();
        reply
    }

    fn publish(&self, channel: &str, payload: &Bytes) -> usize {
        let mut delivered = 0;
        for sub in &self.state.subscribers {
            let mut deliveries = Vec::new();
            if sub.channels.contains(channel) {
                deliveries.push(None);
            }
            for pattern in &sub.patterns {
                if glob_match(pattern.as_bytes(), channel.as_bytes()) {
                    deliveries.push(Some(pattern.clone()));
                }
            }
            for pattern in deliveries {
                let msg = Message {
                    channel: channel.to_owned(),
                    pattern,
                    payload: payload.clone(),
                };
                match sub.sink.try_send(msg) {
                    Ok(()) => delivered += 1,
                    Err(e) => debug!(subscriber = *sub.key(), error = %e, "dropping pub/sub message"),
                }
            }
        }
        delivered
    }

    pub(crate) fn add_subscriber(&self, id: u64, sink: mpsc::Sender<Message>) {
        self.state.subscribers.insert(
            id,
            Subscriber {
                sink,
                channels: HashSet::new(),
                patterns: HashSet::new(),
            },
        );
    }

    pub(crate) fn remove_subscriber(&self, id: u64) {
        self.state.subscribers.remove(&id);
    }

    /// Apply a subscription change. Returns `Closed` if the subscriber is gone.
    pub(crate) fn update_subscriber(
        &self,
        id: u64,
        update: impl FnOnce(&mut HashSet<String>, &mut HashSet<String>),
    ) -> Result<(), DriverError> {
        let mut sub = self.state.subscribers.get_mut(&id).ok_or(DriverError::Closed)?;
        let Subscriber { channels, patterns, .. } = &mut *sub;
        update(channels, patterns);
        Ok(())
    }
}
