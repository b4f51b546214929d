//! Owns the broker client and bridges it to the host's start/stop calls.
//!
//! ```text
//! Stopped -> Connecting -> RegisteringHandlers -> Running -> Closing -> Stopped
//! ```
//!
//! Handlers are registered exactly once per run; after that the worker waits for
//! the shutdown token. If the broker stops delivering first, `start` fails with
//! [`BrokerError::ConsumerEnded`] so the host shuts down instead of idling.
//! `stop` always ends in `Stopped` and always logs the closure, whether or not a
//! connection was ever made.

use async_trait::async_trait;
use std::future::pending;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::broker::{BrokerClient, BrokerConnector, BrokerError, DeliveryHandler};
use crate::config::ConnectionParams;
use crate::error::{Error, Result};
use crate::handler::LoggingHandler;
use crate::host::HostedService;
use crate::shutdown::ShutdownToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Connecting,
    RegisteringHandlers,
    Running,
    Closing,
}

pub struct Worker<C: BrokerConnector> {
    params: ConnectionParams,
    connector: C,
    handler: Arc<dyn DeliveryHandler>,
    client: Option<C::Client>,
    state: WorkerState,
}

impl<C: BrokerConnector> Worker<C> {
    /// A worker that logs every message and fault through [`LoggingHandler`].
    pub fn new(params: ConnectionParams, connector: C) -> Self {
        Self::with_handler(params, connector, Arc::new(LoggingHandler))
    }

    pub fn with_handler(
        params: ConnectionParams,
        connector: C,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Self {
        Self {
            params,
            connector,
            handler,
            client: None,
            state: WorkerState::Stopped,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| c.is_connected())
    }

    fn transition(&mut self, next: WorkerState) {
        debug!("Worker state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[async_trait]
impl<C> HostedService for Worker<C>
where
    C: BrokerConnector,
{
    async fn start(&mut self, mut token: ShutdownToken) -> Result<()> {
        if self.state != WorkerState::Stopped {
            return Err(Error::InvalidState(self.state));
        }

        self.transition(WorkerState::Connecting);
        let client = match self.connector.connect(&self.params).await {
            Ok(client) => client,
            Err(e) => {
                self.transition(WorkerState::Stopped);
                return Err(e.into());
            }
        };
        // Held before registering so that stop closes it even if registration fails.
        self.client = Some(client);

        self.transition(WorkerState::RegisteringHandlers);
        let handler = self.handler.clone();
        if let Some(client) = self.client.as_mut() {
            client.register(handler).await?;
        }

        self.transition(WorkerState::Running);
        info!("🚀 Started processing messages from {}", self.params);

        let queue = self.params.queue_name.clone();
        let client = self.client.as_mut();
        let ended = async move {
            match client {
                Some(client) => client.consumption_ended().await,
                None => pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = token.wait() => {
                debug!("Shutdown requested, leaving steady state");
                Ok(())
            }
            _ = ended => {
                error!("❌ Stopped receiving messages from queue {}, shutting down", queue);
                Err(BrokerError::ConsumerEnded { queue }.into())
            }
        }
    }

    async fn stop(&mut self, _token: ShutdownToken) -> Result<()> {
        self.transition(WorkerState::Closing);

        let closed = match self.client.take() {
            Some(mut client) => client.close().await,
            None => Ok(()),
        };
        self.transition(WorkerState::Stopped);
        closed?;

        info!("✅ Broker connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::shutdown::shutdown_channel;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn params() -> ConnectionParams {
        ConnectionParams::new("memory://", "orders")
    }

    #[tokio::test]
    async fn test_start_reaches_running_and_registers_once() {
        let broker = InMemoryBroker::new();
        let (sender, token) = shutdown_channel();
        let mut worker = Worker::new(params(), broker.clone());

        let watcher = broker.clone();
        let observer = tokio::spawn(async move {
            while watcher.registrations() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            sender.shutdown();
        });

        tokio::time::timeout(Duration::from_secs(5), worker.start(token.clone()))
            .await
            .expect("start should return after shutdown")
            .unwrap();
        observer.await.unwrap();

        assert_eq!(worker.state(), WorkerState::Running);
        assert!(worker.is_connected());
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(broker.registrations(), 1);

        worker.stop(token).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(!worker.is_connected());
        assert_eq!(broker.closes(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_is_returned_and_leaves_worker_stopped() {
        let broker = InMemoryBroker::new();
        broker.refuse_connections(true);
        let (_sender, token) = shutdown_channel();
        let mut worker = Worker::new(params(), broker.clone());

        let result = worker.start(token).await;

        assert!(matches!(result, Err(Error::Broker(_))));
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(broker.registrations(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let broker = InMemoryBroker::new();
        let (sender, token) = shutdown_channel();
        sender.shutdown();
        let mut worker = Worker::new(params(), broker.clone());

        worker.start(token.clone()).await.unwrap();
        let second = worker.start(token.clone()).await;

        assert!(matches!(
            second,
            Err(Error::InvalidState(WorkerState::Running))
        ));
        assert_eq!(broker.connect_attempts(), 1);
        worker.stop(token).await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stop_without_start_still_logs_closure() {
        let broker = InMemoryBroker::new();
        let (_sender, token) = shutdown_channel();
        let mut worker = Worker::new(params(), broker.clone());

        worker.stop(token.clone()).await.unwrap();
        worker.stop(token).await.unwrap();

        assert!(logs_contain("Broker connection closed"));
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(broker.closes(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_consumer_cancel_ends_start_with_error() {
        let broker = InMemoryBroker::new();
        let (_sender, token) = shutdown_channel();
        let mut worker = Worker::new(params(), broker.clone());

        let watcher = broker.clone();
        tokio::spawn(async move {
            while !watcher.cancel_consumer("orders") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = tokio::time::timeout(Duration::from_secs(5), worker.start(token.clone()))
            .await
            .expect("start should return once consumption ends");

        assert!(matches!(
            result,
            Err(Error::Broker(BrokerError::ConsumerEnded { ref queue })) if queue == "orders"
        ));
        assert!(logs_contain("Stopped receiving messages from queue orders"));
        assert!(!worker.is_connected());

        worker.stop(token).await.unwrap();
        assert_eq!(broker.closes(), 1);
    }
}
