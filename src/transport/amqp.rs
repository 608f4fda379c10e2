//! AMQP (RabbitMQ) adapter using lapin. Replies are consumed with auto-ack.
use crate::transport::{
    ConnectOptions, Topology, Transport, TransportError, TransportMessage,
};
use crate::wire::CONTENT_TYPE;
use bytes::Bytes;
use futures::Future;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{FieldTable, ShortString},
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct AmqpTransport {
    conn: Connection,
    channel: Channel,
    requests_queue: String,
    reply_queue: String,
    binding_key: String,
    replies: flume::Receiver<Result<Bytes, TransportError>>,
    consumer_task: JoinHandle<()>,
}

/// Build the broker URL from `url` or from `host`/`port`/`user`/`pass`/`vhost`.
pub fn broker_url(opts: &ConnectOptions) -> String {
    if let Some(u) = opts.params.get("url").cloned() {
        return u;
    }
    let host = opts
        .params
        .get("host")
        .cloned()
        .unwrap_or_else(|| "localhost".into());
    let port: u16 = opts
        .params
        .get("port")
        .and_then(|s| s.parse().ok())
        .unwrap_or(5672);
    let user = opts
        .params
        .get("user")
        .cloned()
        .unwrap_or_else(|| "guest".into());
    let pass = opts
        .params
        .get("pass")
        .cloned()
        .unwrap_or_else(|| "guest".into());
    let vhost = opts
        .params
        .get("vhost")
        .cloned()
        .unwrap_or_else(|| "%2f".into());
    format!("amqp://{}:{}@{}:{}/{}", user, pass, host, port, vhost)
}

/// Durable direct exchange replies are routed through.
pub fn responses_exchange_options() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        auto_delete: false,
        internal: false,
        ..Default::default()
    }
}

/// Shared with other clients and the responder; never exclusive.
pub fn requests_queue_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: false,
        auto_delete: false,
        exclusive: false,
        ..Default::default()
    }
}

/// Declared with an empty name so the broker assigns one. Exclusive queues
/// go away with the connection.
pub fn reply_queue_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: false,
        auto_delete: false,
        exclusive: true,
        ..Default::default()
    }
}

pub fn reply_consume_options() -> BasicConsumeOptions {
    BasicConsumeOptions {
        no_ack: true,
        ..Default::default()
    }
}

/// Run `close` before handing a setup error back, so failed attempts do not
/// leave connections behind.
pub async fn close_on_setup_error<T, C, Fut>(
    result: Result<T, TransportError>,
    close: C,
) -> Result<T, TransportError>
where
    C: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    if result.is_err() {
        close().await;
    }
    result
}

async fn close_quietly(conn: &Connection) {
    if let Err(e) = conn.close(200, "setup failed").await {
        debug!(error = %e, "Connection close after setup failure");
    }
}

struct BoundTopology {
    requests_queue: String,
    reply_queue: String,
    consumer: Consumer,
}

async fn bind_topology(
    channel: &Channel,
    topology: &Topology,
) -> Result<BoundTopology, TransportError> {
    channel
        .exchange_declare(
            &topology.responses_exchange,
            ExchangeKind::Direct,
            responses_exchange_options(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| TransportError::Setup(format!("declare exchange: {}", e)))?;

    let requests = channel
        .queue_declare(
            &topology.requests_queue,
            requests_queue_options(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| TransportError::Setup(format!("declare requests queue: {}", e)))?;

    let replies = channel
        .queue_declare("", reply_queue_options(), FieldTable::default())
        .await
        .map_err(|e| TransportError::Setup(format!("declare reply queue: {}", e)))?;
    let reply_queue = replies.name().as_str().to_string();

    channel
        .queue_bind(
            &reply_queue,
            &topology.responses_exchange,
            &topology.binding_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| TransportError::Setup(format!("bind reply queue: {}", e)))?;

    let consumer = channel
        .basic_consume(
            &reply_queue,
            "",
            reply_consume_options(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| TransportError::Setup(format!("consume reply queue: {}", e)))?;

    Ok(BoundTopology {
        requests_queue: requests.name().as_str().to_string(),
        reply_queue,
        consumer,
    })
}

pub async fn connect(
    opts: ConnectOptions,
    topology: &Topology,
) -> Result<Box<dyn Transport>, TransportError> {
    let url = broker_url(&opts);
    let conn = Connection::connect(&url, ConnectionProperties::default())
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    let channel = close_on_setup_error(
        conn.create_channel()
            .await
            .map_err(|e| TransportError::Connect(e.to_string())),
        || close_quietly(&conn),
    )
    .await?;

    let bound = close_on_setup_error(bind_topology(&channel, topology).await, || {
        close_quietly(&conn)
    })
    .await?;
    let BoundTopology {
        requests_queue,
        reply_queue,
        mut consumer,
    } = bound;

    info!(
        exchange = %topology.responses_exchange,
        requests_queue = %requests_queue,
        reply_queue = %reply_queue,
        binding_key = %topology.binding_key,
        "AMQP topology ready"
    );

    let (tx, rx) = flume::unbounded();
    let consumer_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(delivery) = consumer.next().await {
            let item = match delivery {
                Ok(mut delivery) => Ok(Bytes::from(std::mem::take(&mut delivery.data))),
                Err(e) => Err(TransportError::Receive(e.to_string())),
            };
            let failed = item.is_err();
            if tx.send_async(item).await.is_err() || failed {
                break;
            }
        }
        debug!("Reply consumer stopped");
    });

    Ok(Box::new(AmqpTransport {
        conn,
        channel,
        requests_queue,
        reply_queue,
        binding_key: topology.binding_key.clone(),
        replies: rx,
        consumer_task,
    }))
}

#[async_trait::async_trait]
impl Transport for AmqpTransport {
    fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    fn binding_key(&self) -> &str {
        &self.binding_key
    }

    async fn publish(&self, payload: Bytes) -> Result<(), TransportError> {
        // Default exchange: the routing key is the queue name.
        self.channel
            .basic_publish(
                "",
                &self.requests_queue,
                BasicPublishOptions::default(),
                payload.as_ref(),
                BasicProperties::default().with_content_type(ShortString::from(CONTENT_TYPE)),
            )
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn recv(&self) -> Result<TransportMessage, TransportError> {
        let payload = self
            .replies
            .recv_async()
            .await
            .map_err(|_| TransportError::Disconnected)??;
        Ok(TransportMessage { payload })
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.consumer_task.abort();
        self.channel
            .close(200, "bye")
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        self.conn
            .close(200, "bye")
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(())
    }
}
