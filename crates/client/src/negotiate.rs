//! Capability negotiation at connect time.
//!
//! The requested configuration may not match the server: a RESP2-only
//! server cannot serve client-side caching, a standalone server refuses a
//! cluster client, and so on. Instead of failing, connect adjusts the
//! effective configuration and retries, applying each adjustment at most
//! once.

use std::sync::Arc;

use redix_core::{ClientConfig, ConfigAdjustment, Protocol, ServerInfo};
use redix_driver::{Cmd, Connector, Driver, DriverError, DriverOptions, Value};
use tracing::{debug, warn};

use crate::error::ClientError;

/// A connected driver together with the facts probed from the server.
pub(crate) struct Negotiated {
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) config: ClientConfig,
    pub(crate) server: ServerInfo,
}

/// Connect with `config`, adjusting it until the server accepts it or no
/// rule applies.
pub(crate) async fn negotiate(
    mut config: ClientConfig,
    connector: &dyn Connector,
) -> Result<Negotiated, ClientError> {
    loop {
        let options = DriverOptions::from(&config);
        let error = match connector.connect(&options).await {
            Ok(driver) => match probe(driver.as_ref(), &config).await {
                Ok(server) => {
                    debug!(
                        version = %server.version,
                        cluster = config.cluster(),
                        protocol = %options.protocol,
                        adjustments = ?config.adjustments(),
                        "connected to redis"
                    );
                    return Ok(Negotiated {
                        driver,
                        config,
                        server,
                    });
                }
                Err(e) => {
                    driver.close().await;
                    e
                }
            },
            Err(e) => ClientError::Driver(e),
        };

        let ClientError::Driver(cause) = &error else {
            return Err(error);
        };
        let Some(adjustment) = next_adjustment(&config, cause) else {
            return Err(error);
        };
        warn!(error = %cause, adjustment = %adjustment, "redis connect failed, retrying with adjusted configuration");
        config.apply(adjustment);
    }
}

/// Pick the configuration change that answers `err`, unless it has already
/// been tried.
pub(crate) fn next_adjustment(config: &ClientConfig, err: &DriverError) -> Option<ConfigAdjustment> {
    let adjustment = match err {
        DriverError::NoCache => ConfigAdjustment::DisableCache,
        DriverError::ClusterDisabled(_) | DriverError::ClusterSettingConflict { .. } => {
            ConfigAdjustment::FlipCluster
        }
        DriverError::ClusterAddressFormat(_) | DriverError::Resp3Unsupported(_)
            if config.protocol() != Protocol::V2 =>
        {
            ConfigAdjustment::ForceV2
        }
        DriverError::NoSlotNode if !config.force_single_client() => ConfigAdjustment::ForceSingleClient,
        _ => return None,
    };
    (!config.is_adjusted(adjustment)).then_some(adjustment)
}

/// Ask the server for its version and cluster mode, and check the latter
/// against the configuration.
async fn probe(driver: &dyn Driver, config: &ClientConfig) -> Result<ServerInfo, ClientError> {
    let reply = driver
        .exec(Cmd::new("INFO").arg("cluster").arg("server"))
        .await?;
    let text = info_text(reply)?;
    let server = ServerInfo::parse(&text)?;
    if server.cluster_enabled != config.cluster() {
        return Err(DriverError::ClusterSettingConflict {
            configured: config.cluster(),
            observed: server.cluster_enabled,
        }
        .into());
    }
    Ok(server)
}

/// Cluster clients answer `INFO` with one entry per node; any node will do.
pub(crate) fn info_text(reply: Value) -> Result<String, ClientError> {
    let reply = match reply {
        Value::Map(pairs) => pairs
            .into_iter()
            .next()
            .map(|(_, v)| v)
            .ok_or_else(|| ClientError::Probe("empty INFO reply".into()))?,
        other => other,
    };
    Ok(reply.decode::<String>()?)
}

#[cfg(test)]
mod tests {
    use redix_driver_memory::{MemoryConnector, MemoryServer, MemoryServerOptions};

    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new(["127.0.0.1:6379"])
    }

    #[test]
    fn each_rule_applies_once() {
        let mut cfg = config();
        assert_eq!(
            next_adjustment(&cfg, &DriverError::NoCache),
            Some(ConfigAdjustment::DisableCache)
        );
        cfg.apply(ConfigAdjustment::DisableCache);
        assert_eq!(next_adjustment(&cfg, &DriverError::NoCache), None);
    }

    #[test]
    fn protocol_rules_need_resp3() {
        let cfg = config().with_protocol(Protocol::V2);
        assert_eq!(
            next_adjustment(&cfg, &DriverError::Resp3Unsupported("x".into())),
            None
        );
        assert_eq!(
            next_adjustment(&config(), &DriverError::ClusterAddressFormat("x".into())),
            Some(ConfigAdjustment::ForceV2)
        );
    }

    #[test]
    fn unrelated_errors_are_fatal() {
        assert_eq!(next_adjustment(&config(), &DriverError::Connection("refused".into())), None);
        assert_eq!(next_adjustment(&config(), &DriverError::Nil), None);
        let single = config().with_force_single_client(true);
        assert_eq!(next_adjustment(&single, &DriverError::NoSlotNode), None);
    }

    #[test]
    fn cluster_info_takes_the_first_node() {
        let reply = Value::Map(vec![(
            Value::Status("127.0.0.1:7000".into()),
            Value::bulk("redis_version:7.0.0\r\ncluster_enabled:1\r\n"),
        )]);
        assert!(info_text(reply).unwrap().starts_with("redis_version"));
        assert!(matches!(info_text(Value::Map(Vec::new())), Err(ClientError::Probe(_))));
    }

    #[tokio::test]
    async fn standalone_client_flips_to_cluster() {
        let server = MemoryServer::cluster();
        let connector = MemoryConnector::new(server.clone());
        let out = negotiate(config(), &connector).await.unwrap();
        assert!(out.config.cluster());
        assert_eq!(out.config.adjustments(), &[ConfigAdjustment::FlipCluster]);
        assert!(out.server.cluster_enabled);
        // The rejected attempt was closed; the accepted one is recorded too.
        assert_eq!(server.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn cluster_client_flips_to_standalone() {
        let server = MemoryServer::new();
        let connector = MemoryConnector::new(server);
        let out = negotiate(config().with_cluster(true), &connector)
            .await
            .unwrap();
        assert!(!out.config.cluster());
    }

    #[tokio::test]
    async fn resp2_server_drops_cache_then_protocol() {
        let server = MemoryServer::with_options(MemoryServerOptions {
            resp3: false,
            ..MemoryServerOptions::default()
        });
        let connector = MemoryConnector::new(server);
        let cfg = config().with_cache_size_each_conn(1 << 20);
        let out = negotiate(cfg, &connector).await.unwrap();
        assert_eq!(
            out.config.adjustments(),
            &[ConfigAdjustment::DisableCache, ConfigAdjustment::ForceV2]
        );
        assert_eq!(out.config.protocol(), Protocol::V2);
        assert!(!out.driver.cache_enabled());
    }

    #[tokio::test]
    async fn slot_errors_force_a_single_client() {
        let server = MemoryServer::new();
        server.fail_next_connect(DriverError::NoSlotNode);
        let connector = MemoryConnector::new(server);
        let out = negotiate(config(), &connector).await.unwrap();
        assert!(out.config.force_single_client());
    }

    #[tokio::test]
    async fn exhausted_rules_surface_the_last_error() {
        let server = MemoryServer::new();
        server.fail_next_connect(DriverError::NoCache);
        server.fail_next_connect(DriverError::NoCache);
        let connector = MemoryConnector::new(server);
        let err = negotiate(config(), &connector).await.err().unwrap();
        assert!(matches!(err, ClientError::Driver(DriverError::NoCache)));
    }

    #[tokio::test]
    async fn unknown_connect_errors_are_fatal() {
        let server = MemoryServer::new();
        server.fail_next_connect(DriverError::Connection("refused".into()));
        let connector = MemoryConnector::new(server.clone());
        let err = negotiate(config(), &connector).await.err().unwrap();
        assert!(matches!(err, ClientError::Driver(DriverError::Connection(_))));
        assert!(server.connect_attempts().is_empty());
    }
}
