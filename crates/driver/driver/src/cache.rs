//! Client-side cache storage shared by the driver backends.

use std::time::{Duration, Instant};

use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;

use crate::cmd::Cmd;
use crate::value::Value;

#[derive(Clone)]
struct Entry {
    value: Value,
    ttl: Duration,
}

/// Expire every entry after the TTL it was inserted with.
struct PerEntryTtl;

impl Expiry<Bytes, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &Bytes, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// A size-bounded cache of command replies keyed by the full command.
///
/// Entries live for the TTL of the call that populated them. Backends that
/// can observe writes call [`invalidate_all`](Self::invalidate_all) to drop
/// stale entries early.
#[derive(Clone)]
pub struct LocalCache {
    inner: Cache<Bytes, Entry>,
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

impl LocalCache {
    /// Create a cache holding at most roughly `max_bytes` of replies.
    pub fn new(max_bytes: usize) -> Self {
        let inner = Cache::builder()
            .max_capacity(u64::try_from(max_bytes).unwrap_or(u64::MAX))
            .weigher(|k: &Bytes, e: &Entry| {
                u32::try_from(k.len() + e.value.approximate_size()).unwrap_or(u32::MAX)
            })
            .expire_after(PerEntryTtl)
            .build();
        Self { inner }
    }

    /// Look up the cached reply to `cmd`.
    pub async fn get(&self, cmd: &Cmd) -> Option<Value> {
        self.inner.get(&cmd.cache_key()).await.map(|e| e.value)
    }

    /// Store the reply to `cmd` for `ttl`.
    pub async fn insert(&self, cmd: &Cmd, value: Value, ttl: Duration) {
        self.inner.insert(cmd.cache_key(), Entry { value, ttl }).await;
    }

    /// Drop every cached reply.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}
