//! Broker client seam.
//!
//! The worker only ever talks to a [`BrokerConnector`] and the [`BrokerClient`] it
//! hands back. Delivery mode is always receive-and-delete: a message is gone from
//! the queue once it has been handed to the [`DeliveryHandler`].

mod dispatch;
pub mod memory;
pub mod rabbit;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::config::ConnectionParams;

pub use memory::{InMemoryBroker, InMemoryClient};
pub use rabbit::{RabbitMQClient, RabbitMQConnector};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] BoxError),

    #[error("failed to subscribe to queue '{queue}': {source}")]
    Subscribe {
        queue: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to close broker connection: {0}")]
    Close(#[source] BoxError),

    #[error("delivery stream for queue '{queue}' ended unexpectedly")]
    ConsumerEnded { queue: String },
}

/// A delivered message. Only `body` is acted on, the rest is broker bookkeeping.
#[derive(Debug, Clone)]
pub struct Message {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub received_at: DateTime<Utc>,
}

impl Message {
    pub fn new(delivery_tag: u64, redelivered: bool, body: Vec<u8>) -> Self {
        Self {
            body,
            delivery_tag,
            redelivered,
            received_at: Utc::now(),
        }
    }
}

/// A failure reported by the client's receive loop, independent of any message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: String,
    pub message: String,
}

impl Fault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// `kind` is the fully qualified type name of `E`.
    ///
    /// The name is resolved statically, so a trait object such as `&dyn Error`
    /// yields the trait object's name, not the concrete type behind it. Pass the
    /// concrete error where one is available.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
        }
    }
}

/// Callbacks invoked by a client once registered. Calls may run concurrently.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_message(&self, message: Message);

    async fn on_fault(&self, fault: Fault);
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Client: BrokerClient;

    /// Open a receive-and-delete connection to `params.queue_name`.
    async fn connect(&self, params: &ConnectionParams) -> Result<Self::Client, BrokerError>;
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Subscribe `handler` to the queue.
    ///
    /// One-shot: the first call subscribes, later calls return `Ok(())` and change
    /// nothing.
    async fn register(&mut self, handler: Arc<dyn DeliveryHandler>) -> Result<(), BrokerError>;

    /// Resolve once the subscription has stopped delivering on its own, for
    /// example when the broker cancels the consumer or drops the connection.
    /// Never resolves before `register` has succeeded.
    async fn consumption_ended(&mut self);

    /// Release the connection and wait for in-flight handlers.
    ///
    /// The dispatch task is drained or aborted even when releasing the connection
    /// fails. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;
}
