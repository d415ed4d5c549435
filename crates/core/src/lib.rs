pub mod config;
pub mod error;
pub mod metrics;
pub mod slot;
pub mod version;

pub use config::{ClientConfig, ConfigAdjustment, Protocol};
pub use error::{CoreError, MultiError};
pub use metrics::{Collector, CounterVec, MetricFamily, MetricKind, MetricsRegistry, Sample, SummaryVec};
pub use slot::{key_slot, same_slot};
pub use version::{ServerInfo, Version};
