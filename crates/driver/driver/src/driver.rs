use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::cmd::Cmd;
use crate::error::DriverError;
use crate::options::DriverOptions;
use crate::script::Script;
use crate::value::Value;

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    /// The pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    pub payload: Bytes,
}

/// A connected backend able to run commands.
///
/// Implementations must be safe to share across tasks; all methods take
/// `&self`.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Execute a single command.
    async fn exec(&self, cmd: Cmd) -> Result<Value, DriverError>;

    /// Execute a read through the client-side cache.
    ///
    /// Returns the reply and whether it was served from the cache.
    async fn exec_cached(&self, cmd: Cmd, ttl: Duration) -> Result<(Value, bool), DriverError>;

    /// Execute a batch of commands, returning one result per command in
    /// submission order.
    async fn exec_batch(&self, cmds: Vec<Cmd>) -> Vec<Result<Value, DriverError>>;

    /// Run a server-side script.
    async fn eval(&self, script: &Script, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError>;

    /// Acquire a connection dedicated to pub/sub. Messages are pushed into
    /// `sink` until the connection is closed.
    async fn dedicate(
        &self,
        sink: mpsc::Sender<Message>,
    ) -> Result<Box<dyn DedicatedConnection>, DriverError>;

    /// Whether client-side caching is active on this driver.
    fn cache_enabled(&self) -> bool;

    /// Release every resource held by the driver.
    async fn close(&self);
}

/// A connection reserved for subscription commands.
#[async_trait]
pub trait DedicatedConnection: Send {
    async fn subscribe(&mut self, channels: &[String]) -> Result<(), DriverError>;

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<(), DriverError>;

    async fn psubscribe(&mut self, patterns: &[String]) -> Result<(), DriverError>;

    async fn punsubscribe(&mut self, patterns: &[String]) -> Result<(), DriverError>;

    /// Stop delivery and release the connection.
    async fn close(self: Box<Self>);
}

/// Builds drivers from options.
///
/// The connect negotiation calls this repeatedly with adjusted options, so
/// a failed attempt must not leave anything running.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &DriverOptions) -> Result<Arc<dyn Driver>, DriverError>;
}
