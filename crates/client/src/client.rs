use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redix_core::{ClientConfig, MetricsRegistry, Version};
use redix_driver::{Cmd, Connector, Driver, FromValue, Script, Value};
use redix_driver_redis::RedisConnector;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::spec::{self, CommandSpec};
use crate::error::ClientError;
use crate::handler::{Handler, Scope};
use crate::negotiate::negotiate;

/// A connected redis client.
///
/// Cloning is cheap: clones share the driver, the effective configuration,
/// and the metrics. The `with_*` methods and [`cache`](Self::cache) return
/// views of the same connection that carry per-call markers.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
    scope: Scope,
}

struct Inner {
    driver: Arc<dyn Driver>,
    config: ClientConfig,
    handler: Handler,
    metrics: Arc<MetricsRegistry>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("handler", &self.inner.handler)
            .field("skip_check", &self.scope.skip_check)
            .field("cache_ttl", &self.scope.cache_ttl)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("custom_connector", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connector: None,
            metrics: None,
        }
    }

    /// Connect through `connector` instead of the redis backend.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Report into an existing registry instead of a private one.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration, connect, and negotiate capabilities.
    pub async fn build(self) -> Result<Client, ClientError> {
        let mut config = self.config;
        config.validate()?;
        config.shuffle_addresses();

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(RedisConnector::new()));
        let metrics = self.metrics.unwrap_or_default();

        let negotiated = negotiate(config, connector.as_ref()).await?;
        let config = negotiated.config;
        let handler = Handler::new(
            negotiated.server.version,
            config.cluster(),
            config.development(),
            config.monitor(),
            &metrics,
        )
        .with_silent(ClientError::is_nil);

        info!(
            version = %negotiated.server.version,
            cluster = config.cluster(),
            cache = negotiated.driver.cache_enabled(),
            development = config.development(),
            "redis client ready"
        );

        Ok(Client {
            inner: Arc::new(Inner {
                driver: negotiated.driver,
                config,
                handler,
                metrics,
            }),
            scope: Scope::default(),
        })
    }
}

impl Client {
    /// Connect to redis with `config`.
    ///
    /// Capability mismatches with the server are negotiated away; the
    /// adjustments made are listed in
    /// [`config().adjustments()`](ClientConfig::adjustments).
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        ClientBuilder::new(config).build().await
    }

    /// Connect through a custom [`Connector`].
    pub async fn connect_with<C>(config: ClientConfig, connector: C) -> Result<Self, ClientError>
    where
        C: Connector + 'static,
    {
        ClientBuilder::new(config)
            .connector(Arc::new(connector))
            .build()
            .await
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// The effective configuration, after negotiation.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.inner.metrics
    }

    /// The server version probed at connect time.
    pub fn server_version(&self) -> Version {
        self.inner.handler.version()
    }

    pub fn is_cluster(&self) -> bool {
        self.inner.config.cluster()
    }

    /// Returns `true` if the connection has a client-side cache.
    pub fn cache_enabled(&self) -> bool {
        self.inner.driver.cache_enabled()
    }

    /// Close the connection. Every view and clone is closed with it.
    pub async fn close(&self) {
        self.inner.driver.close().await;
    }

    // -- views --

    /// A view whose calls bypass the development-mode preflight.
    #[must_use]
    pub fn with_skip_check(&self) -> Self {
        let mut view = self.clone();
        view.scope.skip_check = true;
        view
    }

    /// A view whose calls report `name` as their `s_command` label.
    #[must_use]
    pub fn with_sub_command_name(&self, name: &str) -> Self {
        let mut view = self.clone();
        view.scope.sub_command = Some(Arc::from(name));
        view
    }

    /// A view whose calls fail with [`ClientError::Cancelled`] once `token`
    /// is cancelled.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        let mut view = self.clone();
        view.scope.cancel = Some(token);
        view
    }

    /// A view serving read-only commands from the client-side cache for up
    /// to `ttl`. Returns an unchanged view when `ttl` is zero or the
    /// connection has no cache.
    #[must_use]
    pub fn cache(&self, ttl: Duration) -> Self {
        let mut view = self.clone();
        if !ttl.is_zero() && self.cache_enabled() {
            view.scope.cache_ttl = Some(ttl);
        }
        view
    }

    // -- call path --

    pub(crate) fn handler(&self) -> &Handler {
        &self.inner.handler
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Issue `cmd` through the handler and decode the reply.
    pub(crate) async fn call<T, K>(
        &self,
        spec: &'static CommandSpec,
        cmd: Cmd,
        keys: &[K],
    ) -> Result<T, ClientError>
    where
        T: FromValue,
        K: AsRef<str>,
    {
        let guard = self.handler().before(&self.scope, spec, || owned(keys))?;
        let result = self
            .dispatch(spec, cmd)
            .await
            .and_then(|v| v.decode::<T>().map_err(ClientError::from));
        self.handler().after(guard, &result);
        result
    }

    async fn dispatch(&self, spec: &'static CommandSpec, cmd: Cmd) -> Result<Value, ClientError> {
        let driver = self.driver();
        match self.scope.cache_ttl {
            Some(ttl) if spec.readonly => {
                let (value, hit) = self.cancellable(driver.exec_cached(cmd, ttl)).await?;
                self.handler().cache(spec, &self.scope, hit);
                Ok(value)
            }
            _ => Ok(self.cancellable(driver.exec(cmd)).await?),
        }
    }

    /// Race `fut` against the view's cancellation token, if any.
    pub(crate) async fn cancellable<T, E, F>(&self, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, E>>,
        ClientError: From<E>,
    {
        match &self.scope.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => Err(ClientError::Cancelled),
                r = fut => r.map_err(ClientError::from),
            },
            None => fut.await.map_err(ClientError::from),
        }
    }

    /// Run a server-side script.
    ///
    /// `script` is reported under the `scripting` class; use
    /// [`with_sub_command_name`](Self::with_sub_command_name) to tell
    /// scripts apart in the metrics.
    pub async fn eval<T, K>(&self, script: &Script, keys: &[K], args: &[bytes::Bytes]) -> Result<T, ClientError>
    where
        T: FromValue,
        K: AsRef<str>,
    {
        let guard = self.handler().before(&self.scope, &spec::EVAL, || owned(keys))?;
        let keys = owned(keys);
        let result = self
            .cancellable(self.driver().eval(script, &keys, args))
            .await
            .and_then(|v| v.decode::<T>().map_err(ClientError::from));
        self.handler().after(guard, &result);
        result
    }
}

pub(crate) fn owned<K: AsRef<str>>(keys: &[K]) -> Vec<String> {
    keys.iter().map(|k| k.as_ref().to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use redix_driver::DriverError;
    use redix_driver_memory::{MemoryConnector, MemoryServer, MemoryServerOptions};

    use super::*;
    use crate::handler::{CACHE_HITS, CACHE_MISS, EXEC_ERROR, EXEC_TIMING};

    async fn connect(server: &MemoryServer, config: ClientConfig) -> Client {
        Client::connect_with(config, MemoryConnector::new(server.clone()))
            .await
            .unwrap()
    }

    fn config() -> ClientConfig {
        ClientConfig::new(["127.0.0.1:6379"])
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let server = MemoryServer::new();
        let err = Client::connect_with(ClientConfig::new(["no-port"]), MemoryConnector::new(server.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        assert!(server.connect_attempts().is_empty());
    }

    #[tokio::test]
    async fn standalone_client_against_cluster_reports_cluster() {
        let server = MemoryServer::cluster();
        let client = connect(&server, config().with_cluster(false)).await;
        assert!(client.is_cluster());
        assert_eq!(client.ping().await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn probed_version_is_exposed() {
        let server = MemoryServer::with_options(MemoryServerOptions {
            version: "6.0.9".into(),
            ..MemoryServerOptions::default()
        });
        let client = connect(&server, config()).await;
        assert_eq!(client.server_version(), Version::new(6, 0, 9));
    }

    #[tokio::test]
    async fn development_preflight_guards_calls() {
        let server = MemoryServer::with_options(MemoryServerOptions {
            version: "6.0.0".into(),
            ..MemoryServerOptions::default()
        });
        let client = connect(&server, config().with_development(true)).await;

        let err = client.keys("*").await.unwrap_err();
        assert!(matches!(err, ClientError::Forbidden { .. }));
        let err = client.get_del::<Option<String>>("k").await.unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedVersion { .. }));

        let internal = client.with_skip_check();
        assert!(internal.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cross_slot_is_checked_against_clusters() {
        let server = MemoryServer::cluster();
        let client = connect(&server, config().with_cluster(true).with_development(true)).await;
        let err = client.del(&["a", "b"]).await.unwrap_err();
        assert!(matches!(err, ClientError::CrossSlot { .. }));
        assert_eq!(client.del(&["{t}a", "{t}b"]).await.unwrap(), 0);
        assert_eq!(client.with_skip_check().del(&["a", "b"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn monitor_records_latency_and_errors() {
        let server = MemoryServer::new();
        let client = connect(&server, config().with_monitor(true)).await;

        client.set("k", "v").await.unwrap();
        // A missing key is not an error.
        assert!(client.get::<String>("missing").await.unwrap_err().is_nil());
        client.zadd("k", [(1.0, "m")]).await.unwrap_err();

        let rendered = client.metrics().render().await;
        assert!(rendered.contains(&format!("{EXEC_TIMING}_count{{command=\"string\",s_command=\"set\"}} 1")));
        assert!(rendered.contains(&format!("{EXEC_TIMING}_count{{command=\"string\",s_command=\"get\"}} 1")));
        assert!(rendered.contains(&format!("{EXEC_ERROR}{{command=\"sorted_set\",s_command=\"zadd\"}} 1")));
    }

    #[tokio::test]
    async fn cached_view_reports_hits_and_misses() {
        let server = MemoryServer::new();
        let client = connect(&server, config().with_monitor(true)).await;
        assert!(client.cache_enabled());
        client.set("k", "v").await.unwrap();

        let cached = client.cache(Duration::from_secs(60));
        assert_eq!(cached.get::<String>("k").await.unwrap(), "v");
        assert_eq!(cached.get::<String>("k").await.unwrap(), "v");

        let rendered = client.metrics().render().await;
        assert!(rendered.contains(&format!("{CACHE_MISS}{{command=\"string\",s_command=\"get\"}} 1")));
        assert!(rendered.contains(&format!("{CACHE_HITS}{{command=\"string\",s_command=\"get\"}} 1")));

        // Writes through the cached view go to the server and invalidate.
        cached.set("k", "w").await.unwrap();
        assert_eq!(cached.get::<String>("k").await.unwrap(), "w");
    }

    #[tokio::test]
    async fn zero_ttl_or_disabled_cache_leaves_the_view_unchanged() {
        let server = MemoryServer::new();
        let client = connect(&server, config()).await;
        assert!(client.cache(Duration::ZERO).scope.cache_ttl.is_none());

        let uncached = connect(&server, config().with_cache_size_each_conn(0)).await;
        assert!(uncached.cache(Duration::from_secs(1)).scope.cache_ttl.is_none());
    }

    #[tokio::test]
    async fn cancelled_views_fail_fast() {
        let server = MemoryServer::new();
        let client = connect(&server, config()).await;
        let token = CancellationToken::new();
        token.cancel();
        let err = client.with_cancellation(token).ping().await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(client.ping().await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn closed_client_reports_closed() {
        let server = MemoryServer::new();
        let client = connect(&server, config()).await;
        client.close().await;
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ClientError::Driver(DriverError::Closed)));
    }
}
