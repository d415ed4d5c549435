use std::time::Duration;

use redix_core::{ClientConfig, Protocol};

/// Everything a [`Connector`](crate::Connector) needs to build a driver.
///
/// Derived from the effective [`ClientConfig`] on every connect attempt, so
/// negotiation adjustments are reflected here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    pub addresses: Vec<String>,
    pub protocol: Protocol,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    pub client_name: Option<String>,
    pub master_set: Option<String>,
    pub cluster: bool,
    pub force_single_client: bool,
    /// Client-side cache budget in bytes; 0 disables caching.
    pub cache_size: usize,
    pub ring_scale: u32,
    pub pool_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl DriverOptions {
    /// Whether the caller asked for client-side caching.
    pub fn cache_requested(&self) -> bool {
        self.cache_size > 0 && self.protocol == Protocol::V3
    }

    /// Buffer size derived from the ring scale (`2^scale`, capped).
    pub fn ring_capacity(&self) -> usize {
        1usize << self.ring_scale.min(20)
    }

    /// The timeout applied to a full request/response exchange.
    pub fn request_timeout(&self) -> Option<Duration> {
        match (self.read_timeout, self.write_timeout) {
            (Some(r), Some(w)) => Some(r + w),
            (Some(t), None) | (None, Some(t)) => Some(t),
            (None, None) => None,
        }
    }
}

impl From<&ClientConfig> for DriverOptions {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            addresses: cfg.addresses().to_vec(),
            protocol: cfg.protocol(),
            username: cfg.username().map(str::to_owned),
            password: cfg.password().map(str::to_owned),
            db: cfg.db(),
            client_name: cfg.client_name().map(str::to_owned),
            master_set: cfg.master_set().map(str::to_owned),
            cluster: cfg.cluster(),
            force_single_client: cfg.force_single_client(),
            cache_size: cfg.cache_size_each_conn(),
            ring_scale: cfg.ring_scale_each_conn(),
            pool_size: cfg.blocking_pool_size(),
            read_timeout: cfg.read_timeout(),
            write_timeout: cfg.write_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use redix_core::ConfigAdjustment;

    use super::*;

    #[test]
    fn reflects_adjusted_config() {
        let mut cfg = ClientConfig::new(["h:1"]);
        let before = DriverOptions::from(&cfg);
        assert!(before.cache_requested());
        assert!(!before.cluster);

        cfg.apply(ConfigAdjustment::DisableCache);
        cfg.apply(ConfigAdjustment::FlipCluster);
        let after = DriverOptions::from(&cfg);
        assert!(!after.cache_requested());
        assert!(after.cluster);
    }

    #[test]
    fn request_timeout_combines_both_sides() {
        let cfg = ClientConfig::default()
            .with_read_timeout(Duration::from_millis(100))
            .with_write_timeout(Duration::from_millis(50));
        let opts = DriverOptions::from(&cfg);
        assert_eq!(opts.request_timeout(), Some(Duration::from_millis(150)));
        assert_eq!(opts.ring_capacity(), 1024);
    }
}
