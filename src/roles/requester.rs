use crate::identity::ClientId;
use crate::metrics::stats::{Stats, Summary};
use crate::output::OutputWriter;
use crate::transport::{
    ConnectOptions, Engine, Topology, Transport, TransportBuilder, TransportError,
};
use crate::wire::{decode_response, encode_request, CodecError, Reply};
use anyhow::Result;
use futures::Future;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{debug, info, warn};

pub const DEFAULT_SAMPLES: u32 = 10_000;

pub struct RequesterConfig {
    pub engine: Engine,
    pub connect: ConnectOptions,
    /// Successful round trips to collect.
    pub samples: NonZeroU32,
    pub origin: String,
    pub destination: String,
    /// Bound on each reply wait; `None` waits forever.
    pub reply_timeout_ms: Option<u64>,
    /// Consecutive domain errors tolerated per cycle; `None` retries forever.
    pub max_retries: Option<u64>,
    /// Log each returned path at info (debug otherwise).
    pub log_paths: bool,
    pub output_file: Option<String>,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Amqp,
            connect: ConnectOptions::default(),
            samples: NonZeroU32::new(DEFAULT_SAMPLES).unwrap_or(NonZeroU32::MIN),
            origin: "A".into(),
            destination: "E".into(),
            reply_timeout_ms: None,
            max_retries: None,
            log_paths: true,
            output_file: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BenchError {
    #[error("topology setup failed: {0}")]
    Setup(#[source] TransportError),
    #[error("request encoding failed: {0}")]
    Encode(#[source] CodecError),
    #[error("request publish failed: {0}")]
    Transmit(#[source] TransportError),
    #[error("reply receive failed: {0}")]
    Receive(#[source] TransportError),
    #[error("malformed reply: {0}")]
    Decode(#[source] CodecError),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("cycle {cycle} failed {attempts} times in a row")]
    RetriesExhausted { cycle: usize, attempts: u64 },
    #[error("cancelled")]
    Cancelled,
}

/// Connect, bind the reply topology, run the benchmark until the target
/// sample count is reached or Ctrl+C arrives, and report the summary.
pub async fn run_requester(config: RequesterConfig) -> Result<Summary> {
    let client = ClientId::generate();
    let topology = Topology::for_client(&client);
    info!(
        engine = ?config.engine,
        client_id = %client,
        samples = config.samples.get(),
        origin = %config.origin,
        destination = %config.destination,
        reply_timeout_ms = ?config.reply_timeout_ms,
        max_retries = ?config.max_retries,
        "Starting requester"
    );

    let transport = TransportBuilder::connect_with_retry(
        config.engine.clone(),
        config.connect.clone(),
        &topology,
    )
    .await
    .map_err(BenchError::Setup)?;

    run_session(transport, client, &config, async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            futures::future::pending::<()>().await;
        }
    })
    .await
}

/// Drive an already bound transport. `cancel` resolving aborts the run.
/// The transport is shut down on every exit path.
pub async fn run_session<F>(
    transport: Box<dyn Transport>,
    client: ClientId,
    config: &RequesterConfig,
    cancel: F,
) -> Result<Summary>
where
    F: Future,
{
    info!(
        reply_queue = transport.reply_queue(),
        binding_key = transport.binding_key(),
        "Reply queue bound"
    );

    let outcome = tokio::select! {
        res = drive(transport.as_ref(), &client, config) => res,
        _ = cancel => {
            info!("Cancellation received, stopping requester");
            Err(BenchError::Cancelled)
        }
    };

    if let Err(e) = transport.shutdown().await {
        warn!(error = %e, "Transport shutdown error");
    }

    let stats = outcome?;
    let summary = stats.summary().ok_or_else(|| {
        anyhow::anyhow!("benchmark finished without samples")
    })?;
    info!(
        samples = summary.sample_count,
        sent = summary.sent_count,
        retries = summary.retry_count,
        mean_ms = summary.mean_ns / 1_000_000.0,
        std_dev_ms = summary.std_dev_ns / 1_000_000.0,
        "Final Requester Statistics"
    );

    let mut output = if let Some(ref path) = config.output_file {
        OutputWriter::new_csv(path.clone()).await?
    } else {
        OutputWriter::new_stdout()
    };
    output.write_summary(&summary).await?;
    Ok(summary)
}

/// Sequential request/measure loop: one request in flight at a time.
///
/// A reply carrying a domain error re-issues the same cycle and is not
/// sampled. Transport and decode failures end the run.
pub async fn drive(
    transport: &dyn Transport,
    client: &ClientId,
    config: &RequesterConfig,
) -> Result<Stats, BenchError> {
    let target = config.samples.get() as usize;
    let reply_timeout = config.reply_timeout_ms.map(Duration::from_millis);
    let mut stats = Stats::with_capacity(target);
    let mut failures_in_a_row = 0u64;

    while stats.sample_count() < target {
        let request = encode_request(&config.origin, &config.destination, client)
            .map_err(BenchError::Encode)?;

        let start = Instant::now();
        transport
            .publish(request)
            .await
            .map_err(BenchError::Transmit)?;
        stats.record_sent();

        let message = match reply_timeout {
            Some(limit) => tokio::time::timeout(limit, transport.recv())
                .await
                .map_err(|_| BenchError::Timeout(limit))?,
            None => transport.recv().await,
        }
        .map_err(BenchError::Receive)?;

        match decode_response(&message.payload).map_err(BenchError::Decode)? {
            Reply::Failure { reason } => {
                stats.record_retry();
                failures_in_a_row += 1;
                warn!(
                    cycle = stats.sample_count(),
                    attempt = failures_in_a_row,
                    reason = %reason,
                    "Responder returned an error, retrying"
                );
                if let Some(max) = config.max_retries {
                    if failures_in_a_row > max {
                        return Err(BenchError::RetriesExhausted {
                            cycle: stats.sample_count(),
                            attempts: failures_in_a_row,
                        });
                    }
                }
            }
            Reply::Success { path } => {
                let rtt = start.elapsed();
                stats.record_sample(rtt);
                failures_in_a_row = 0;
                if config.log_paths {
                    info!(?path, rtt_us = rtt.as_micros() as u64, "shortest path received");
                } else {
                    debug!(?path, rtt_us = rtt.as_micros() as u64, "shortest path received");
                }
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockBroker;
    use crate::wire::{decode_request, encode_response};
    use bytes::Bytes;

    fn ok(path: &[&str]) -> Bytes {
        encode_response(&Reply::Success {
            path: path.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    fn failure(reason: &str) -> Bytes {
        encode_response(&Reply::Failure {
            reason: reason.into(),
        })
        .unwrap()
    }

    fn config(samples: u32) -> RequesterConfig {
        RequesterConfig {
            engine: Engine::Mock,
            samples: NonZeroU32::new(samples).unwrap(),
            ..Default::default()
        }
    }

    async fn bound(broker: &MockBroker) -> (Box<dyn Transport>, ClientId) {
        let client = ClientId::generate();
        let t = broker
            .connect(&Topology::for_client(&client))
            .await
            .expect("connect");
        (t, client)
    }

    #[tokio::test]
    async fn collects_exactly_the_target_sample_count() {
        let broker = MockBroker::echo();
        let (t, client) = bound(&broker).await;
        let stats = drive(t.as_ref(), &client, &config(25)).await.unwrap();
        assert_eq!(stats.sample_count(), 25);
        assert_eq!(broker.publish_count(), 25);
        assert_eq!(broker.receive_count(), 25);
        assert!(stats.samples().iter().all(|d| *d >= Duration::ZERO));
    }

    #[tokio::test]
    async fn single_sample_run() {
        let broker = MockBroker::scripted([ok(&["A", "E"])]);
        let (t, client) = bound(&broker).await;
        let stats = drive(t.as_ref(), &client, &config(1)).await.unwrap();
        assert_eq!(broker.publish_count(), 1);
        assert_eq!(broker.receive_count(), 1);
        let summary = stats.summary().unwrap();
        assert_eq!(summary.mean(), stats.samples()[0]);
        assert_eq!(summary.std_dev_ns, 0.0);
    }

    #[tokio::test]
    async fn domain_error_is_retried_without_sampling() {
        let broker = MockBroker::scripted([
            ok(&["A", "B", "E"]),
            failure("no route"),
            ok(&["A", "E"]),
            ok(&["A", "D", "E"]),
        ]);
        let (t, client) = bound(&broker).await;
        let stats = drive(t.as_ref(), &client, &config(3)).await.unwrap();
        assert_eq!(broker.publish_count(), 4);
        assert_eq!(stats.sample_count(), 3);
        assert_eq!(stats.sent_count(), 4);
        assert_eq!(stats.retry_count(), 1);
    }

    #[tokio::test]
    async fn every_request_carries_the_binding_key() {
        let broker = MockBroker::echo();
        let (t, client) = bound(&broker).await;
        drive(t.as_ref(), &client, &config(5)).await.unwrap();

        let bindings = broker.bindings();
        assert_eq!(bindings.len(), 1);
        for (queue, body) in broker.published() {
            assert_eq!(queue, "requests");
            let req = decode_request(&body).unwrap();
            assert_eq!(req.client_uuid.to_string(), bindings[0].routing_key);
            assert_eq!(req.origin, "A");
            assert_eq!(req.destination, "E");
        }
    }

    #[tokio::test]
    async fn malformed_reply_is_fatal() {
        let broker = MockBroker::scripted([ok(&["A"]), Bytes::from_static(b"<html>")]);
        let (t, client) = bound(&broker).await;
        let err = drive(t.as_ref(), &client, &config(3)).await.unwrap_err();
        assert!(matches!(err, BenchError::Decode(_)), "got {:?}", err);
        assert_eq!(broker.publish_count(), 2);
    }

    #[tokio::test]
    async fn publish_failure_is_fatal() {
        let broker = MockBroker::echo();
        broker.fail_publishes();
        let (t, client) = bound(&broker).await;
        let err = drive(t.as_ref(), &client, &config(3)).await.unwrap_err();
        assert!(matches!(err, BenchError::Transmit(_)), "got {:?}", err);
        assert_eq!(broker.receive_count(), 0);
    }

    #[tokio::test]
    async fn reply_timeout_is_reported() {
        let broker = MockBroker::scripted(Vec::<Bytes>::new());
        let (t, client) = bound(&broker).await;
        let cfg = RequesterConfig {
            reply_timeout_ms: Some(20),
            ..config(1)
        };
        let err = drive(t.as_ref(), &client, &cfg).await.unwrap_err();
        assert!(matches!(err, BenchError::Timeout(d) if d == Duration::from_millis(20)));
        assert_eq!(broker.publish_count(), 1);
    }

    #[tokio::test]
    async fn retry_cap_stops_a_failing_responder() {
        let broker = MockBroker::scripted((0..10).map(|_| failure("down")));
        let (t, client) = bound(&broker).await;
        let cfg = RequesterConfig {
            max_retries: Some(2),
            ..config(1)
        };
        let err = drive(t.as_ref(), &client, &cfg).await.unwrap_err();
        assert!(matches!(
            err,
            BenchError::RetriesExhausted {
                cycle: 0,
                attempts: 3
            }
        ));
        assert_eq!(broker.publish_count(), 3);
    }

    #[tokio::test]
    async fn retry_cap_counts_consecutive_failures_only() {
        let broker = MockBroker::scripted([
            failure("busy"),
            ok(&["A"]),
            failure("busy"),
            ok(&["A"]),
        ]);
        let (t, client) = bound(&broker).await;
        let cfg = RequesterConfig {
            max_retries: Some(1),
            ..config(2)
        };
        let stats = drive(t.as_ref(), &client, &cfg).await.unwrap();
        assert_eq!(stats.sample_count(), 2);
        assert_eq!(stats.retry_count(), 2);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let broker = MockBroker::scripted(Vec::<Bytes>::new());
        let (t, client) = bound(&broker).await;
        let err = run_session(
            t,
            client,
            &config(1),
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BenchError>(),
            Some(BenchError::Cancelled)
        ));
        assert_eq!(broker.publish_count(), 1);
    }

    #[tokio::test]
    async fn session_returns_summary() {
        let broker = MockBroker::echo();
        let (t, client) = bound(&broker).await;
        let summary = run_session(t, client, &config(4), futures::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!(summary.sample_count, 4);
        assert_eq!(summary.sent_count, 4);
        assert_eq!(summary.retry_count, 0);
    }
}
