//! RabbitMQ transport over AMQP 0-9-1.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::stream::{self, StreamExt};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{info, warn};

use super::{BrokerError, BrokerMessage, EventBroker, MessageStream};
use crate::config::BrokerConfig;

const CONNECTION_NAME: &str = "reviews";

/// Broker backed by a single AMQP connection. Publishing shares one channel;
/// every consumer gets a channel of its own.
#[derive(Clone)]
pub struct AmqpBroker {
    connection: Arc<Connection>,
    channel: Channel,
}

impl AmqpBroker {
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        Self::connect_uri(&config.amqp_uri(), config.timeout()).await
    }

    /// Open a connection to `uri`, giving up after `timeout`.
    pub async fn connect_uri(uri: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let properties =
            ConnectionProperties::default().with_connection_name(CONNECTION_NAME.into());
        let connection = tokio::time::timeout(timeout, Connection::connect(uri, properties))
            .await
            .map_err(|_| BrokerError::Connect(format!("no answer within {timeout:?}")))?
            .map_err(connect_error)?;
        let channel = connection.create_channel().await.map_err(connect_error)?;

        info!(
            host = %redact_credentials(uri),
            "connected to message broker"
        );
        Ok(Self {
            connection: Arc::new(connection),
            channel,
        })
    }

    async fn consumer_channel(&self) -> Result<Channel, BrokerError> {
        self.connection
            .create_channel()
            .await
            .map_err(subscribe_error)
    }

    async fn publish_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;
        Ok(())
    }
}

#[async_trait]
impl EventBroker for AmqpBroker {
    async fn send_to_queue(&self, queue: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(queue, work_queue_options(), FieldTable::default())
            .await
            .map_err(publish_error)?;
        // Default exchange routes by queue name.
        self.publish_raw("", queue, &payload).await
    }

    async fn consume_queue(&self, queue: &str) -> Result<MessageStream, BrokerError> {
        let channel = self.consumer_channel().await?;
        channel
            .queue_declare(queue, work_queue_options(), FieldTable::default())
            .await
            .map_err(subscribe_error)?;
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag(queue),
                consume_options(),
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_error)?;
        Ok(delivery_stream(queue.to_string(), consumer))
    }

    async fn publish_fanout(&self, exchange: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                fanout_exchange_options(),
                FieldTable::default(),
            )
            .await
            .map_err(publish_error)?;
        self.publish_raw(exchange, "", &payload).await
    }

    async fn subscribe_fanout(&self, exchanges: &[&str]) -> Result<MessageStream, BrokerError> {
        let channel = self.consumer_channel().await?;
        let mut streams = Vec::with_capacity(exchanges.len());
        for exchange in exchanges {
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Fanout,
                    fanout_exchange_options(),
                    FieldTable::default(),
                )
                .await
                .map_err(subscribe_error)?;
            // Server-named queue, deleted with the connection.
            let queue = channel
                .queue_declare("", exclusive_queue_options(), FieldTable::default())
                .await
                .map_err(subscribe_error)?;
            let queue_name = queue.name().as_str();
            channel
                .queue_bind(
                    queue_name,
                    exchange,
                    "",
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(subscribe_error)?;
            let consumer = channel
                .basic_consume(
                    queue_name,
                    &consumer_tag(exchange),
                    consume_options(),
                    FieldTable::default(),
                )
                .await
                .map_err(subscribe_error)?;
            streams.push(delivery_stream((*exchange).to_string(), consumer));
        }

        Ok(stream::select_all(streams).boxed())
    }
}

/// Review notifications are plain non-durable queues.
fn work_queue_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: false,
        ..QueueDeclareOptions::default()
    }
}

fn fanout_exchange_options() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        ..ExchangeDeclareOptions::default()
    }
}

fn exclusive_queue_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        exclusive: true,
        ..QueueDeclareOptions::default()
    }
}

/// Deliveries are acknowledged on receipt.
fn consume_options() -> BasicConsumeOptions {
    BasicConsumeOptions {
        no_ack: true,
        ..BasicConsumeOptions::default()
    }
}

fn consumer_tag(source: &str) -> String {
    format!("{CONNECTION_NAME}-{source}")
}

/// Deliveries of `consumer` tagged with `source`; ends on the first error.
fn delivery_stream(source: String, consumer: Consumer) -> MessageStream {
    consumer
        .take_while(move |delivery| {
            if let Err(err) = delivery {
                warn!(error = %err, "broker consumer failed");
            }
            future::ready(delivery.is_ok())
        })
        .filter_map(move |delivery| {
            let message = delivery.ok().map(|delivery| BrokerMessage {
                topic: source.clone(),
                payload: Bytes::from(delivery.data),
            });
            future::ready(message)
        })
        .boxed()
}

/// `uri` with any `user:password@` part removed, for logging.
fn redact_credentials(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}{}", &uri[..scheme_end + 3], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}

fn connect_error(err: lapin::Error) -> BrokerError {
    BrokerError::Connect(err.to_string())
}

fn publish_error(err: lapin::Error) -> BrokerError {
    BrokerError::Publish(err.to_string())
}

fn subscribe_error(err: lapin::Error) -> BrokerError {
    BrokerError::Subscribe(err.to_string())
}
