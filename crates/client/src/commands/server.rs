use redix_driver::{Cmd, IntoArg};

use super::spec;
use crate::negotiate::info_text;
use crate::{Client, ClientError};

impl Client {
    pub async fn ping(&self) -> Result<String, ClientError> {
        self.call(&spec::PING, Cmd::new("PING"), &[] as &[&str]).await
    }

    /// `INFO [section ...]`. Against a cluster the reply of one node is
    /// returned.
    pub async fn info(&self, sections: &[&str]) -> Result<String, ClientError> {
        let cmd = Cmd::new("INFO").args(sections.iter().copied());
        let reply = self.call(&spec::INFO, cmd, &[] as &[&str]).await?;
        info_text(reply)
    }

    /// `KEYS pattern`. Forbidden in development mode: it blocks the server
    /// while scanning the whole keyspace.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, ClientError> {
        self.call(&spec::KEYS, Cmd::new("KEYS").arg(pattern), &[] as &[&str])
            .await
    }

    /// `PUBLISH channel payload`, returning the number of receivers.
    pub async fn publish(&self, channel: &str, payload: impl IntoArg) -> Result<i64, ClientError> {
        let cmd = Cmd::new("PUBLISH").arg(channel).arg(payload);
        self.call(&spec::PUBLISH, cmd, &[] as &[&str]).await
    }
}

#[cfg(test)]
mod tests {
    use redix_core::ClientConfig;
    use redix_driver_memory::{MemoryConnector, MemoryServer};

    use super::*;

    #[tokio::test]
    async fn ping_info_keys() {
        let c = Client::connect_with(ClientConfig::new(["127.0.0.1:6379"]), MemoryConnector::new(MemoryServer::new()))
            .await
            .unwrap();
        assert_eq!(c.ping().await.unwrap(), "PONG");
        assert!(c.info(&["server"]).await.unwrap().contains("redis_version:7.2.4"));

        c.set("user:1", "a").await.unwrap();
        c.set("user:2", "b").await.unwrap();
        c.set("order:1", "c").await.unwrap();
        assert_eq!(c.keys("user:*").await.unwrap(), vec!["user:1", "user:2"]);
        assert_eq!(c.publish("nobody", "hi").await.unwrap(), 0);
    }
}
