//! Redis driver backend for redix.
//!
//! [`RedisConnector`] builds a [`RedisDriver`] from
//! [`DriverOptions`](redix_driver::DriverOptions):
//!
//! | Options | Transport |
//! |---------|-----------|
//! | `master_set` set | sentinel lookup, then a pooled connection to the master |
//! | `cluster` set | `redis` cluster connection (unless `force_single_client`) |
//! | otherwise | `deadpool-redis` pool of multiplexed connections |
//!
//! Server errors are mapped onto the typed capability variants of
//! [`DriverError`](redix_driver::DriverError) so that the client's connect
//! negotiation can react to them.

mod connector;
mod convert;
mod driver;
mod pubsub;
mod url;

pub use connector::RedisConnector;
pub use driver::RedisDriver;

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use redix_core::{ClientConfig, Protocol};
    use redix_driver::{Connector, DriverOptions};

    use super::*;

    fn test_options() -> DriverOptions {
        let addr = std::env::var("REDIS_ADDR").unwrap_or_else(|_| "127.0.0.1:6379".to_string());
        DriverOptions::from(&ClientConfig::new([addr]))
    }

    #[tokio::test]
    async fn driver_conformance() {
        let driver = RedisConnector::new()
            .connect(&test_options())
            .await
            .expect("connect should succeed");
        redix_driver::testing::run_driver_conformance_tests(driver.as_ref())
            .await
            .expect("conformance tests should pass");
        driver.close().await;
    }

    #[tokio::test]
    async fn driver_conformance_resp2() {
        let mut options = test_options();
        options.protocol = Protocol::V2;
        options.cache_size = 0;
        let driver = RedisConnector::new()
            .connect(&options)
            .await
            .expect("connect should succeed");
        assert!(!driver.cache_enabled());
        redix_driver::testing::run_driver_conformance_tests(driver.as_ref())
            .await
            .expect("conformance tests should pass");
    }
}
