//! An in-process Redis look-alike for tests.
//!
//! [`MemoryServer`] holds a keyspace (strings, sorted sets, geo members),
//! routes pub/sub messages, runs a fixed set of native script handlers,
//! and reports a configurable version and cluster mode through `INFO`.
//! [`MemoryConnector`] hands out drivers bound to it, and connect faults
//! can be queued to exercise capability negotiation.

mod driver;
mod geo;
mod keyspace;
mod scripts;
mod server;

pub use driver::{MemoryConnector, MemoryDriver};
pub use server::{MemoryServer, MemoryServerOptions};
