//! rtt-bench library crate exposing modules for reuse and testing.

pub mod identity;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod roles;
pub mod transport;
pub mod wire;

// Optional re-exports for convenience in downstream code/tests
pub use identity::ClientId;
pub use metrics::stats::{Stats, Summary};
pub use roles::requester::{BenchError, RequesterConfig};
pub use transport::{ConnectOptions, Engine, Topology, Transport, TransportBuilder, TransportError};
