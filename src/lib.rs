//! Pluggable load generation for data stores.
//!
//! The driver pulls keys from a configurable key generator, paces them
//! through a swappable rate limiter, and issues reads/writes against a
//! backend [`client::Client`] while the monitor aggregates counters and
//! latency histograms. A separate backfill engine seeds or verifies a
//! keyspace in parallel, bypassing rate limits.

pub mod backfill;
pub mod client;
pub mod config;
pub mod driver;
pub mod monitor;
pub mod ratelimit;
pub mod workload;

pub use config::Config;
pub use driver::Driver;
pub use monitor::Monitor;
