use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    Channel, Connection, ConnectionProperties,
    message::Delivery,
    options::{BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions},
    types::FieldTable,
};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::broker::{
    BrokerClient, BrokerConnector, BrokerError, DeliveryHandler, Fault, Message,
    dispatch::Dispatcher,
};
use crate::config::{ConnectionParams, rabbit::ConsumerSettings};

/// How long `close` waits for in-flight handlers before giving up on them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens AMQP connections (`amqp://` / `amqps://` URIs).
#[derive(Debug, Clone)]
pub struct RabbitMQConnector {
    settings: ConsumerSettings,
}

impl RabbitMQConnector {
    pub fn new(settings: ConsumerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BrokerConnector for RabbitMQConnector {
    type Client = RabbitMQClient;

    async fn connect(&self, params: &ConnectionParams) -> Result<RabbitMQClient, BrokerError> {
        info!("🐰 Connecting to RabbitMQ for {}", params);

        let connection =
            Connection::connect(&params.connection_string, ConnectionProperties::default())
                .await
                .map_err(|e| BrokerError::Connect(e.into()))?;

        info!("✅ Connected to RabbitMQ");

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connect(e.into()))?;

        debug!("✅ Created RabbitMQ channel");

        if self.settings.declare_queue {
            channel
                .queue_declare(
                    &params.queue_name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Connect(e.into()))?;

            debug!("✅ Declared queue: {}", params.queue_name);
        }

        Ok(RabbitMQClient {
            queue_name: params.queue_name.clone(),
            settings: self.settings.clone(),
            connection,
            channel,
            dispatcher: None,
            closed: false,
        })
    }
}

pub struct RabbitMQClient {
    queue_name: String,
    settings: ConsumerSettings,
    connection: Connection,
    channel: Channel,
    dispatcher: Option<Dispatcher>,
    closed: bool,
}

impl RabbitMQClient {
    fn subscribe_error(&self, e: lapin::Error) -> BrokerError {
        BrokerError::Subscribe {
            queue: self.queue_name.clone(),
            source: e.into(),
        }
    }
}

/// Keep the parts of a delivery the handler needs; receive errors become faults.
fn map_delivery(delivery: Result<Delivery, lapin::Error>) -> Result<Message, Fault> {
    match delivery {
        Ok(Delivery {
            delivery_tag,
            redelivered,
            data,
            ..
        }) => Ok(Message::new(delivery_tag, redelivered, data)),
        Err(e) => Err(Fault::from_error(&e)),
    }
}

#[async_trait]
impl BrokerClient for RabbitMQClient {
    async fn register(&mut self, handler: Arc<dyn DeliveryHandler>) -> Result<(), BrokerError> {
        if self.dispatcher.is_some() {
            debug!("Handlers already registered on queue {}", self.queue_name);
            return Ok(());
        }

        if let Some(prefetch) = self.settings.prefetch {
            self.channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| self.subscribe_error(e))?;
            debug!("QoS prefetch count set to {}", prefetch);
        }

        // no_ack: the broker drops each message as soon as it is pushed to us.
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                &self.settings.consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| self.subscribe_error(e))?;

        info!(
            "🔍 Started consuming from queue: {} (tag {})",
            self.queue_name, self.settings.consumer_tag
        );

        self.dispatcher = Some(Dispatcher::spawn(consumer.map(map_delivery), handler));

        Ok(())
    }

    async fn consumption_ended(&mut self) {
        match self.dispatcher.as_mut() {
            Some(dispatcher) => dispatcher.ended().await,
            None => pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let dispatcher = self.dispatcher.take();

        if let Err(e) = self.channel.close(200, "Normal shutdown").await {
            debug!("Channel was not open on close: {}", e);
        }
        let closed = self
            .connection
            .close(200, "Normal shutdown")
            .await
            .map_err(|e| BrokerError::Close(e.into()));

        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.drain(DRAIN_TIMEOUT).await {
                warn!("Dispatch task did not finish cleanly: {}", e);
            }
        }

        closed
    }

    fn is_connected(&self) -> bool {
        !self.closed
            && self.connection.status().connected()
            && !self.dispatcher.as_ref().is_some_and(Dispatcher::has_ended)
    }
}
