use redix_driver::{DedicatedConnection, DriverError, Message};
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::{Client, owned};
use crate::commands::spec;
use crate::error::ClientError;

/// Capacity of the channel between the connection and the subscriber.
pub const MESSAGE_BUFFER: usize = 100;

/// A dedicated pub/sub connection and the messages it receives.
///
/// Dropping the subscription releases the connection.
pub struct Subscription {
    conn: Option<Box<dyn DedicatedConnection>>,
    messages: mpsc::Receiver<Message>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("open", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Open a dedicated connection subscribed to `channels`.
    pub async fn subscribe(&self, channels: &[&str]) -> Result<Subscription, ClientError> {
        let mut sub = self.dedicate(&spec::SUBSCRIBE).await?;
        if !channels.is_empty() {
            sub.subscribe(channels).await?;
        }
        Ok(sub)
    }

    /// Open a dedicated connection subscribed to the glob `patterns`.
    pub async fn psubscribe(&self, patterns: &[&str]) -> Result<Subscription, ClientError> {
        let mut sub = self.dedicate(&spec::PSUBSCRIBE).await?;
        if !patterns.is_empty() {
            sub.psubscribe(patterns).await?;
        }
        Ok(sub)
    }

    async fn dedicate(&self, spec: &'static spec::CommandSpec) -> Result<Subscription, ClientError> {
        let guard = self.handler().before(self.scope(), spec, Vec::new)?;
        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        let result = self.cancellable(self.driver().dedicate(tx)).await;
        self.handler().after(guard, &result);
        Ok(Subscription {
            conn: Some(result?),
            messages: rx,
        })
    }
}

impl Subscription {
    fn conn(&mut self) -> Result<&mut Box<dyn DedicatedConnection>, ClientError> {
        self.conn
            .as_mut()
            .ok_or(ClientError::Driver(DriverError::Closed))
    }

    pub async fn subscribe(&mut self, channels: &[&str]) -> Result<(), ClientError> {
        Ok(self.conn()?.subscribe(&owned(channels)).await?)
    }

    pub async fn unsubscribe(&mut self, channels: &[&str]) -> Result<(), ClientError> {
        Ok(self.conn()?.unsubscribe(&owned(channels)).await?)
    }

    pub async fn psubscribe(&mut self, patterns: &[&str]) -> Result<(), ClientError> {
        Ok(self.conn()?.psubscribe(&owned(patterns)).await?)
    }

    pub async fn punsubscribe(&mut self, patterns: &[&str]) -> Result<(), ClientError> {
        Ok(self.conn()?.punsubscribe(&owned(patterns)).await?)
    }

    /// The receiving end of the message channel.
    pub fn messages(&mut self) -> &mut mpsc::Receiver<Message> {
        &mut self.messages
    }

    /// Wait for the next message. `None` once the subscription is closed
    /// and every buffered message has been received.
    pub async fn recv(&mut self) -> Option<Message> {
        self.messages.recv().await
    }

    /// Release the dedicated connection. Messages already buffered can
    /// still be received. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
            debug!("subscription closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use redix_core::ClientConfig;
    use redix_driver_memory::{MemoryConnector, MemoryServer};

    use super::*;

    async fn client(server: &MemoryServer) -> Client {
        Client::connect_with(ClientConfig::new(["127.0.0.1:6379"]), MemoryConnector::new(server.clone()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let server = MemoryServer::new();
        let c = client(&server).await;
        let mut sub = c.subscribe(&["news"]).await.unwrap();

        assert_eq!(c.publish("news", "one").await.unwrap(), 1);
        assert_eq!(c.publish("news", "two").await.unwrap(), 1);
        assert_eq!(c.publish("other", "x").await.unwrap(), 0);

        let first = sub.recv().await.unwrap();
        assert_eq!(first.channel, "news");
        assert_eq!(first.payload.as_ref(), b"one");
        assert!(first.pattern.is_none());
        assert_eq!(sub.recv().await.unwrap().payload.as_ref(), b"two");
    }

    #[tokio::test]
    async fn patterns_and_unsubscribe() {
        let server = MemoryServer::new();
        let c = client(&server).await;
        let mut sub = c.psubscribe(&["news.*"]).await.unwrap();
        c.publish("news.sport", "goal").await.unwrap();
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.pattern.as_deref(), Some("news.*"));
        assert_eq!(msg.channel, "news.sport");

        sub.punsubscribe(&["news.*"]).await.unwrap();
        assert_eq!(c.publish("news.sport", "late").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let server = MemoryServer::new();
        let c = client(&server).await;
        let mut sub = c.subscribe(&["ch"]).await.unwrap();
        c.publish("ch", "buffered").await.unwrap();

        sub.close().await;
        sub.close().await;
        assert_eq!(server.subscriber_count(), 0);
        assert_eq!(sub.recv().await.unwrap().payload.as_ref(), b"buffered");
        let end = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert!(end.is_none());
        assert!(matches!(
            sub.subscribe(&["ch"]).await,
            Err(ClientError::Driver(DriverError::Closed))
        ));
    }

    #[tokio::test]
    async fn drop_releases_the_connection() {
        let server = MemoryServer::new();
        let c = client(&server).await;
        let sub = c.subscribe(&["ch"]).await.unwrap();
        assert_eq!(server.subscriber_count(), 1);
        drop(sub);
        assert_eq!(server.subscriber_count(), 0);
        assert_eq!(c.publish("ch", "nobody").await.unwrap(), 0);
    }
}
