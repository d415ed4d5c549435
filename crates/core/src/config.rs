use std::fmt;
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use serde::Deserialize;

use crate::error::CoreError;

/// RESP protocol version preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// RESP2. Client-side caching is unavailable.
    V2,
    /// RESP3. Required for client-side caching.
    #[default]
    V3,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V2 => f.write_str("RESP2"),
            Self::V3 => f.write_str("RESP3"),
        }
    }
}

/// A well-known change the connect negotiation may apply to a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigAdjustment {
    /// Client-side caching was switched off.
    DisableCache,
    /// The cluster flag was inverted to match the server.
    FlipCluster,
    /// The protocol was pinned to RESP2.
    ForceV2,
    /// Cluster-aware routing was suppressed.
    ForceSingleClient,
}

impl fmt::Display for ConfigAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DisableCache => "disable client-side cache",
            Self::FlipCluster => "flip cluster flag",
            Self::ForceV2 => "force RESP2",
            Self::ForceSingleClient => "force single client",
        };
        f.write_str(s)
    }
}

/// Connection and tuning options for a redix client.
///
/// Construct with [`ClientConfig::new`] and the `with_*` builders, or load
/// from TOML with [`ClientConfig::from_toml_str`]. Once handed to the client
/// the record is only read through its getters; the connect negotiation is
/// the one place that may change it, and every change it makes is recorded
/// in [`adjustments`](Self::adjustments).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct ClientConfig {
    addresses: Vec<String>,
    protocol: Protocol,
    always_v2: bool,
    username: Option<String>,
    password: Option<String>,
    db: i64,
    client_name: Option<String>,
    master_set: Option<String>,
    cluster: bool,
    cache_size_each_conn: usize,
    ring_scale_each_conn: u32,
    blocking_pool_size: usize,
    read_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    development: bool,
    monitor: bool,
    force_single_client: bool,
    #[serde(skip)]
    adjustments: Vec<ConfigAdjustment>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addresses: vec![String::from("127.0.0.1:6379")],
            protocol: Protocol::V3,
            always_v2: false,
            username: None,
            password: None,
            db: 0,
            client_name: None,
            master_set: None,
            cluster: false,
            cache_size_each_conn: 128 * 1024 * 1024,
            ring_scale_each_conn: 10,
            blocking_pool_size: 10,
            read_timeout_ms: None,
            write_timeout_ms: None,
            development: false,
            monitor: false,
            force_single_client: false,
            adjustments: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given `host:port` endpoints.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse a configuration from a TOML document.
    ///
    /// # Example
    ///
    /// ```
    /// use redix_core::ClientConfig;
    ///
    /// let cfg = ClientConfig::from_toml_str(r#"
    ///     addresses = ["10.0.0.1:6379", "10.0.0.2:6379"]
    ///     cluster = true
    ///     read_timeout_ms = 500
    /// "#).unwrap();
    /// assert!(cfg.cluster());
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, CoreError> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that can never connect.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.addresses.is_empty() {
            return Err(CoreError::Config("at least one address is required".into()));
        }
        if let Some(bad) = self.addresses.iter().find(|a| !a.contains(':')) {
            return Err(CoreError::Config(format!(
                "address {bad:?} is not in host:port form"
            )));
        }
        if self.db < 0 {
            return Err(CoreError::Config("db index must not be negative".into()));
        }
        Ok(())
    }

    // -- builders --

    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn with_always_v2(mut self, always_v2: bool) -> Self {
        self.always_v2 = always_v2;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    #[must_use]
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_master_set(mut self, master_set: impl Into<String>) -> Self {
        self.master_set = Some(master_set.into());
        self
    }

    #[must_use]
    pub fn with_cluster(mut self, cluster: bool) -> Self {
        self.cluster = cluster;
        self
    }

    #[must_use]
    pub fn with_cache_size_each_conn(mut self, bytes: usize) -> Self {
        self.cache_size_each_conn = bytes;
        self
    }

    #[must_use]
    pub fn with_ring_scale_each_conn(mut self, scale: u32) -> Self {
        self.ring_scale_each_conn = scale;
        self
    }

    #[must_use]
    pub fn with_blocking_pool_size(mut self, size: usize) -> Self {
        self.blocking_pool_size = size;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = Some(duration_to_ms(timeout));
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = Some(duration_to_ms(timeout));
        self
    }

    #[must_use]
    pub fn with_development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    #[must_use]
    pub fn with_force_single_client(mut self, force: bool) -> Self {
        self.force_single_client = force;
        self
    }

    // -- getters --

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// The protocol that will actually be requested, honoring `always_v2`.
    pub fn protocol(&self) -> Protocol {
        if self.always_v2 {
            Protocol::V2
        } else {
            self.protocol
        }
    }

    pub fn always_v2(&self) -> bool {
        self.always_v2
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn db(&self) -> i64 {
        self.db
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn master_set(&self) -> Option<&str> {
        self.master_set.as_deref()
    }

    pub fn cluster(&self) -> bool {
        self.cluster
    }

    /// Client-side cache budget per connection; 0 means caching is off.
    pub fn cache_size_each_conn(&self) -> usize {
        self.cache_size_each_conn
    }

    /// Whether client-side caching can be used with these settings.
    pub fn cache_enabled(&self) -> bool {
        self.cache_size_each_conn > 0 && self.protocol() == Protocol::V3
    }

    pub fn ring_scale_each_conn(&self) -> u32 {
        self.ring_scale_each_conn
    }

    pub fn blocking_pool_size(&self) -> usize {
        self.blocking_pool_size
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn development(&self) -> bool {
        self.development
    }

    pub fn monitor(&self) -> bool {
        self.monitor
    }

    pub fn force_single_client(&self) -> bool {
        self.force_single_client
    }

    /// Adjustments applied by connect negotiation, in the order applied.
    pub fn adjustments(&self) -> &[ConfigAdjustment] {
        &self.adjustments
    }

    /// Returns `true` if `adjustment` has already been applied.
    pub fn is_adjusted(&self, adjustment: ConfigAdjustment) -> bool {
        self.adjustments.contains(&adjustment)
    }

    /// Apply a negotiation adjustment and record it.
    pub fn apply(&mut self, adjustment: ConfigAdjustment) {
        match adjustment {
            ConfigAdjustment::DisableCache => self.cache_size_each_conn = 0,
            ConfigAdjustment::FlipCluster => self.cluster = !self.cluster,
            ConfigAdjustment::ForceV2 => self.always_v2 = true,
            ConfigAdjustment::ForceSingleClient => self.force_single_client = true,
        }
        self.adjustments.push(adjustment);
    }

    /// Shuffle the address list so clients spread their first connection.
    pub fn shuffle_addresses(&mut self) {
        // Fisher-Yates.
        for i in (1..self.addresses.len()).rev() {
            let bound = u64::try_from(i + 1).unwrap_or(u64::MAX);
            let j = usize::try_from(OsRng.next_u64() % bound).unwrap_or(0);
            self.addresses.swap(i, j);
        }
    }
}

fn duration_to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.addresses(), ["127.0.0.1:6379"]);
        assert_eq!(cfg.protocol(), Protocol::V3);
        assert!(!cfg.cluster());
        assert!(cfg.cache_enabled());
        assert_eq!(cfg.blocking_pool_size(), 10);
        assert!(cfg.read_timeout().is_none());
        assert!(cfg.adjustments().is_empty());
    }

    #[test]
    fn always_v2_wins_over_preference() {
        let cfg = ClientConfig::default().with_always_v2(true);
        assert_eq!(cfg.protocol(), Protocol::V2);
        assert!(!cfg.cache_enabled());
    }

    #[test]
    fn loads_from_toml() {
        let toml = r#"
            addresses = ["a:1", "b:2"]
            protocol = "v2"
            username = "app"
            password = "secret"
            db = 3
            cluster = true
            development = true
            monitor = true
            read_timeout_ms = 250
        "#;
        let cfg = ClientConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.addresses(), ["a:1", "b:2"]);
        assert_eq!(cfg.protocol(), Protocol::V2);
        assert_eq!(cfg.username(), Some("app"));
        assert_eq!(cfg.password(), Some("secret"));
        assert_eq!(cfg.db(), 3);
        assert!(cfg.cluster());
        assert!(cfg.development());
        assert!(cfg.monitor());
        assert_eq!(cfg.read_timeout(), Some(Duration::from_millis(250)));
        assert!(cfg.write_timeout().is_none());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.addresses(), ["127.0.0.1:6379"]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(ClientConfig::from_toml_str("bogus = 1").is_err());
    }

    #[test]
    fn validation_rejects_bad_addresses() {
        assert!(ClientConfig::new(Vec::<String>::new()).validate().is_err());
        assert!(ClientConfig::new(["localhost"]).validate().is_err());
        assert!(ClientConfig::new(["localhost:6379"]).validate().is_ok());
    }

    #[test]
    fn adjustments_are_applied_and_recorded() {
        let mut cfg = ClientConfig::default();
        cfg.apply(ConfigAdjustment::DisableCache);
        cfg.apply(ConfigAdjustment::FlipCluster);
        cfg.apply(ConfigAdjustment::ForceV2);
        cfg.apply(ConfigAdjustment::ForceSingleClient);

        assert_eq!(cfg.cache_size_each_conn(), 0);
        assert!(cfg.cluster());
        assert_eq!(cfg.protocol(), Protocol::V2);
        assert!(cfg.force_single_client());
        assert_eq!(cfg.adjustments().len(), 4);
        assert!(cfg.is_adjusted(ConfigAdjustment::FlipCluster));
    }

    #[test]
    fn shuffle_keeps_every_address() {
        let mut cfg = ClientConfig::new(["a:1", "b:2", "c:3", "d:4"]);
        cfg.shuffle_addresses();
        let mut got = cfg.addresses().to_vec();
        got.sort();
        assert_eq!(got, ["a:1", "b:2", "c:3", "d:4"]);
    }
}
