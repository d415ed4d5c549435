//! Redix client
//!
//! A redis client that negotiates its capabilities with the server at
//! connect time and can guard every command with development-mode checks
//! and a metrics tap.
//!
//! # Quick Start
//!
//! ```no_run
//! use redix_client::{Client, ClientError};
//! use redix_core::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ClientError> {
//!     let config = ClientConfig::new(["127.0.0.1:6379"])
//!         .with_development(true)
//!         .with_monitor(true);
//!     let client = Client::connect(config).await?;
//!
//!     client.set("greeting", "hello").await?;
//!     let value: String = client.get("greeting").await?;
//!     println!("{value}");
//!
//!     print!("{}", client.metrics().render().await);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - Connect negotiation: client-side caching, RESP3, and cluster mode are
//!   turned off or flipped when the server cannot serve them
//! - Development-mode preflight: forbidden commands, version floors,
//!   cross-slot keys, and deprecation warnings
//! - Metrics tap: per-command latency summaries, error and cache counters
//! - Client-side cache views with a per-call TTL
//! - Pipelines and dedicated pub/sub connections
//!
//! # Views
//!
//! [`Client::with_skip_check`], [`Client::with_sub_command_name`],
//! [`Client::with_cancellation`], and [`Client::cache`] return cheap views
//! that share the connection but carry per-call markers:
//!
//! ```no_run
//! # use redix_client::Client;
//! # use std::time::Duration;
//! # async fn demo(client: Client) -> Result<(), redix_client::ClientError> {
//! let cached = client.cache(Duration::from_secs(30));
//! let hot: Option<String> = cached.get("hot-key").await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod commands;
mod error;
mod handler;
mod negotiate;
mod pipeline;
mod pubsub;

pub use client::{Client, ClientBuilder};
pub use commands::{GeoLocation, GeoUnit};
pub use error::ClientError;
pub use handler::{CACHE_HITS, CACHE_MISS, EXEC_ERROR, EXEC_TIMING};
pub use pipeline::{Pipeline, PipelineError};
pub use pubsub::{MESSAGE_BUFFER, Subscription};

// Re-exported so callers don't need a direct `redix_driver` dependency.
pub use redix_driver::{FromValue, Message, ScoredMember, Script, Value};
