//! Transport abstraction: trait, topology, and builder factory.

#[cfg(feature = "transport-amqp-0-9")]
pub mod amqp;
pub mod config;
#[cfg(any(test, feature = "transport-mock"))]
pub mod mock;

use std::collections::BTreeMap;

use crate::identity::ClientId;
use bytes::Bytes;

pub const RESPONSES_EXCHANGE: &str = "responses";
pub const REQUESTS_QUEUE: &str = "requests";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Engine {
    Amqp,
    #[cfg(any(test, feature = "transport-mock"))]
    Mock,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub params: BTreeMap<String, String>,
    /// Enable connection retry with backoff (default: false)
    pub retry_enabled: bool,
    /// Maximum number of retry attempts (default: 3)
    pub retry_count: u32,
    /// Initial delay between retries in milliseconds (default: 1000)
    pub retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds (default: 30000)
    pub retry_max_delay_ms: u64,
}

/// Broker-side names the client needs before the first request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    /// Durable direct exchange replies are routed through.
    pub responses_exchange: String,
    /// Shared queue requests are published to.
    pub requests_queue: String,
    /// Exact-match key binding the private reply queue to the exchange.
    pub binding_key: String,
}

impl Topology {
    pub fn for_client(client: &ClientId) -> Self {
        Self {
            responses_exchange: RESPONSES_EXCHANGE.to_string(),
            requests_queue: REQUESTS_QUEUE.to_string(),
            binding_key: client.routing_key(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("setup: {0}")]
    Setup(String),
    #[error("publish: {0}")]
    Publish(String),
    #[error("receive: {0}")]
    Receive(String),
    #[error("disconnected")]
    Disconnected,
    #[error("other: {0}")]
    Other(String),
}

#[derive(Clone, Debug)]
pub struct TransportMessage {
    pub payload: Bytes,
}

/// A bound request/reply session with the broker.
///
/// Implementations own their connection for the whole run. `recv` yields
/// deliveries from the private reply queue in arrival order.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Server-assigned name of the private reply queue.
    fn reply_queue(&self) -> &str;
    /// Key the reply queue was bound with.
    fn binding_key(&self) -> &str;
    async fn publish(&self, payload: Bytes) -> Result<(), TransportError>;
    async fn recv(&self) -> Result<TransportMessage, TransportError>;
    async fn shutdown(&self) -> Result<(), TransportError>;
}

pub struct TransportBuilder;

impl TransportBuilder {
    /// Connect and establish the full reply topology.
    pub async fn connect(
        engine: Engine,
        opts: ConnectOptions,
        topology: &Topology,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match engine {
            Engine::Amqp => {
                #[cfg(feature = "transport-amqp-0-9")]
                {
                    return crate::transport::amqp::connect(opts, topology).await;
                }
                #[cfg(not(feature = "transport-amqp-0-9"))]
                {
                    let _ = (opts, topology);
                    Err(TransportError::Connect("amqp feature disabled".into()))
                }
            }
            #[cfg(any(test, feature = "transport-mock"))]
            Engine::Mock => {
                return crate::transport::mock::connect(opts, topology).await;
            }
        }
    }

    /// Connect with optional retry logic based on ConnectOptions settings.
    /// If retry_enabled is false, behaves identically to connect().
    /// If retry_enabled is true, retries up to retry_count times with exponential backoff.
    pub async fn connect_with_retry(
        engine: Engine,
        opts: ConnectOptions,
        topology: &Topology,
    ) -> Result<Box<dyn Transport>, TransportError> {
        if !opts.retry_enabled {
            return Self::connect(engine, opts, topology).await;
        }

        let max_attempts = opts.retry_count.max(1);
        let initial_delay = std::time::Duration::from_millis(opts.retry_delay_ms.max(100));
        let max_delay = std::time::Duration::from_millis(
            opts.retry_max_delay_ms
                .max(initial_delay.as_millis() as u64),
        );
        let mut current_delay = initial_delay;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match Self::connect(engine.clone(), opts.clone(), topology).await {
                Ok(transport) => {
                    if attempt > 1 {
                        tracing::info!("Connection succeeded on attempt {}", attempt);
                    }
                    return Ok(transport);
                }
                Err(e) => {
                    tracing::warn!(
                        "Connection attempt {}/{} failed: {}. Retrying in {:?}...",
                        attempt,
                        max_attempts,
                        e,
                        current_delay
                    );
                    last_error = Some(e);

                    if attempt < max_attempts {
                        tokio::time::sleep(current_delay).await;
                        current_delay = std::cmp::min(current_delay * 2, max_delay);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::Connect("Connection failed after all retry attempts".into())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_binds_on_client_identity() {
        let id = ClientId::generate();
        let topo = Topology::for_client(&id);
        assert_eq!(topo.responses_exchange, "responses");
        assert_eq!(topo.requests_queue, "requests");
        assert_eq!(topo.binding_key, id.to_string());
    }

    #[tokio::test]
    async fn retry_disabled_connects_once() {
        let id = ClientId::generate();
        let topo = Topology::for_client(&id);
        let t = TransportBuilder::connect_with_retry(
            Engine::Mock,
            ConnectOptions::default(),
            &topo,
        )
        .await
        .expect("connect");
        assert_eq!(t.binding_key(), topo.binding_key);
        t.shutdown().await.expect("shutdown");
    }
}
