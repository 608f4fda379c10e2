//! Mock transport for tests and dry runs: an in-process broker with a
//! pluggable responder.

use super::{ConnectOptions, Topology, Transport, TransportError, TransportMessage};
use crate::wire::{decode_request, encode_response, Reply};
use bytes::Bytes;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

type Responder = Box<dyn FnMut(&[u8]) -> Option<Bytes> + Send + 'static>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
}

struct Broker {
    responder: Responder,
    published: Vec<(String, Bytes)>,
    bindings: Vec<Binding>,
    received: usize,
    fail_publish: bool,
    queues_created: u32,
}

/// Shared handle to the in-process broker; clones observe the same state.
#[derive(Clone)]
pub struct MockBroker(Arc<Mutex<Broker>>);

impl MockBroker {
    fn with_responder(responder: Responder) -> Self {
        Self(Arc::new(Mutex::new(Broker {
            responder,
            published: Vec::new(),
            bindings: Vec::new(),
            received: 0,
            fail_publish: false,
            queues_created: 0,
        })))
    }

    /// Answers every request with the path `[ori, dest]`.
    pub fn echo() -> Self {
        Self::with_responder(Box::new(|data| {
            let req = decode_request(data).ok()?;
            encode_response(&Reply::Success {
                path: vec![req.origin, req.destination],
            })
            .ok()
        }))
    }

    /// Replies with the given raw bodies in order, one per publish. Once the
    /// script runs out, requests go unanswered.
    pub fn scripted<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut queue: VecDeque<Bytes> = replies.into_iter().collect();
        Self::with_responder(Box::new(move |_| queue.pop_front()))
    }

    /// Make every subsequent publish fail.
    pub fn fail_publishes(&self) {
        self.lock().fail_publish = true;
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.lock().published.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.lock().published.len()
    }

    pub fn receive_count(&self) -> usize {
        self.lock().received
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.lock().bindings.clone()
    }

    pub async fn connect(&self, topology: &Topology) -> Result<Box<dyn Transport>, TransportError> {
        let reply_queue = {
            let mut broker = self.lock();
            broker.queues_created += 1;
            let name = format!("amq.gen-mock-{}", broker.queues_created);
            broker.bindings.push(Binding {
                exchange: topology.responses_exchange.clone(),
                routing_key: topology.binding_key.clone(),
                queue: name.clone(),
            });
            name
        };
        let (tx, rx) = flume::unbounded();
        Ok(Box::new(MockTransport {
            broker: self.clone(),
            requests_queue: topology.requests_queue.clone(),
            reply_queue,
            binding_key: topology.binding_key.clone(),
            tx,
            rx,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, Broker> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub async fn connect(
    _opts: ConnectOptions,
    topology: &Topology,
) -> Result<Box<dyn Transport>, TransportError> {
    MockBroker::echo().connect(topology).await
}

pub struct MockTransport {
    broker: MockBroker,
    requests_queue: String,
    reply_queue: String,
    binding_key: String,
    tx: flume::Sender<Bytes>,
    rx: flume::Receiver<Bytes>,
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    fn binding_key(&self) -> &str {
        &self.binding_key
    }

    async fn publish(&self, payload: Bytes) -> Result<(), TransportError> {
        let reply = {
            let mut broker = self.broker.lock();
            if broker.fail_publish {
                return Err(TransportError::Publish("channel closed".into()));
            }
            broker
                .published
                .push((self.requests_queue.clone(), payload.clone()));
            (broker.responder)(payload.as_ref())
        };
        if let Some(reply) = reply {
            self.tx
                .send(reply)
                .map_err(|e| TransportError::Publish(e.to_string()))?;
        }
        Ok(())
    }

    async fn recv(&self) -> Result<TransportMessage, TransportError> {
        let payload = self
            .rx
            .recv_async()
            .await
            .map_err(|_| TransportError::Disconnected)?;
        self.broker.lock().received += 1;
        Ok(TransportMessage { payload })
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ClientId;
    use crate::wire::{decode_response, encode_request};

    #[tokio::test]
    async fn echo_replies_with_origin_and_destination() {
        let broker = MockBroker::echo();
        let id = ClientId::generate();
        let t = broker
            .connect(&Topology::for_client(&id))
            .await
            .expect("connect");
        t.publish(encode_request("A", "E", &id).unwrap())
            .await
            .expect("publish");
        let msg = t.recv().await.expect("recv");
        assert_eq!(
            decode_response(&msg.payload).unwrap(),
            Reply::Success {
                path: vec!["A".into(), "E".into()]
            }
        );
        assert_eq!(broker.publish_count(), 1);
        assert_eq!(broker.receive_count(), 1);
        assert_eq!(broker.published()[0].0, "requests");
    }

    #[tokio::test]
    async fn binding_records_identity() {
        let broker = MockBroker::echo();
        let id = ClientId::generate();
        let t = broker
            .connect(&Topology::for_client(&id))
            .await
            .expect("connect");
        let bindings = broker.bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].exchange, "responses");
        assert_eq!(bindings[0].routing_key, id.routing_key());
        assert_eq!(bindings[0].queue, t.reply_queue());
    }

    #[tokio::test]
    async fn failing_publish_is_reported() {
        let broker = MockBroker::echo();
        broker.fail_publishes();
        let id = ClientId::generate();
        let t = broker
            .connect(&Topology::for_client(&id))
            .await
            .expect("connect");
        let err = t.publish(Bytes::from_static(b"{}")).await.unwrap_err();
        assert!(matches!(err, TransportError::Publish(_)));
        assert_eq!(broker.publish_count(), 0);
    }
}
