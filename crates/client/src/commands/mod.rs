//! The typed command façade.
//!
//! Each submodule adds an `impl Client` block for one command group. Every
//! method builds a [`Cmd`](redix_driver::Cmd), names its keys for the
//! cluster preflight, and decodes the reply.

mod geo;
mod server;
mod sorted_set;
pub mod spec;
mod strings;

pub use geo::{GeoLocation, GeoUnit};
