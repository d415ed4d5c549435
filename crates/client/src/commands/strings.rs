use std::time::Duration;

use redix_driver::{Cmd, FromValue, IntoArg};

use super::spec;
use crate::{Client, ClientError};

impl Client {
    /// `GET key`. A missing key decodes to `None` for `Option` targets and
    /// to the nil error otherwise.
    pub async fn get<T: FromValue>(&self, key: &str) -> Result<T, ClientError> {
        self.call(&spec::GET, Cmd::new("GET").arg(key), &[key]).await
    }

    /// `SET key value`.
    pub async fn set(&self, key: &str, value: impl IntoArg) -> Result<(), ClientError> {
        self.call(&spec::SET, Cmd::new("SET").arg(key).arg(value), &[key])
            .await
    }

    /// `SET key value PX ttl`. Sub-millisecond TTLs round up to one
    /// millisecond.
    pub async fn set_ex(&self, key: &str, value: impl IntoArg, ttl: Duration) -> Result<(), ClientError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let cmd = Cmd::new("SET").arg(key).arg(value).arg("PX").arg(millis);
        self.call(&spec::SET, cmd, &[key]).await
    }

    /// `GETDEL key`, available from redis 6.2.
    pub async fn get_del<T: FromValue>(&self, key: &str) -> Result<T, ClientError> {
        self.call(&spec::GETDEL, Cmd::new("GETDEL").arg(key), &[key])
            .await
    }

    /// `DEL key [key ...]`, returning how many keys were removed.
    pub async fn del(&self, keys: &[&str]) -> Result<i64, ClientError> {
        self.call(&spec::DEL, Cmd::new("DEL").args(keys.iter().copied()), keys)
            .await
    }

    /// `EXISTS key [key ...]`, returning how many of the keys exist.
    pub async fn exists(&self, keys: &[&str]) -> Result<i64, ClientError> {
        self.call(&spec::EXISTS, Cmd::new("EXISTS").args(keys.iter().copied()), keys)
            .await
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, ClientError> {
        self.call(&spec::INCRBY, Cmd::new("INCRBY").arg(key).arg(delta), &[key])
            .await
    }

    /// `EXPIRE key seconds`. Returns `false` if the key does not exist.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ClientError> {
        let cmd = Cmd::new("EXPIRE").arg(key).arg(ttl.as_secs().max(1));
        self.call(&spec::EXPIRE, cmd, &[key]).await
    }

    /// `TTL key`: `None` for a key without expiry, the nil error for a
    /// missing key.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, ClientError> {
        let secs: i64 = self.call(&spec::TTL, Cmd::new("TTL").arg(key), &[key]).await?;
        match secs {
            -2 => Err(redix_driver::DriverError::Nil.into()),
            -1 => Ok(None),
            s => Ok(Some(Duration::from_secs(s.unsigned_abs()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use redix_core::ClientConfig;
    use redix_driver_memory::{MemoryConnector, MemoryServer};

    use super::*;

    async fn client() -> Client {
        Client::connect_with(ClientConfig::new(["127.0.0.1:6379"]), MemoryConnector::new(MemoryServer::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn set_get_del() {
        let c = client().await;
        c.set("greeting", "hello").await.unwrap();
        assert_eq!(c.get::<String>("greeting").await.unwrap(), "hello");
        assert_eq!(c.exists(&["greeting", "other"]).await.unwrap(), 1);
        assert_eq!(c.get_del::<String>("greeting").await.unwrap(), "hello");
        assert_eq!(c.get::<Option<String>>("greeting").await.unwrap(), None);
        assert_eq!(c.del(&["greeting"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_keys_are_nil() {
        let c = client().await;
        let err = c.get::<String>("nope").await.unwrap_err();
        assert!(err.is_nil());
        assert!(c.ttl("nope").await.unwrap_err().is_nil());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry() {
        let c = client().await;
        c.set("plain", "v").await.unwrap();
        assert_eq!(c.ttl("plain").await.unwrap(), None);
        assert!(c.expire("plain", Duration::from_secs(30)).await.unwrap());
        assert_eq!(c.ttl("plain").await.unwrap(), Some(Duration::from_secs(30)));
        assert!(!c.expire("absent", Duration::from_secs(30)).await.unwrap());

        c.set_ex("short", "v", Duration::from_secs(2)).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(c.get::<Option<String>>("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn counters() {
        let c = client().await;
        assert_eq!(c.incr_by("n", 5).await.unwrap(), 5);
        assert_eq!(c.incr_by("n", -2).await.unwrap(), 3);
        c.set("s", "text").await.unwrap();
        assert!(c.incr_by("s", 1).await.is_err());
    }
}
