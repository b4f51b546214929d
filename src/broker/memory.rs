//! In-process broker for tests and local development.
//!
//! Behaves like a receive-and-delete queue: a message published while a handler
//! is registered is handed over immediately and is no longer in the queue;
//! messages published with no handler wait in the queue until one registers.
//! Every connect, registration and close is counted so callers can assert on how
//! the broker was used.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::future::pending;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broker::{
    BrokerClient, BrokerConnector, BrokerError, DeliveryHandler, Fault, Message,
    dispatch::Dispatcher,
};
use crate::config::ConnectionParams;

type Delivery = Result<Message, Fault>;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Message>,
    subscriber: Option<mpsc::UnboundedSender<Delivery>>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    refuse_connections: bool,
    fail_registrations: bool,
    fail_closes: bool,
    next_delivery_tag: u64,
    connect_attempts: usize,
    registrations: usize,
    closes: usize,
}

/// Shared handle to an in-memory broker. Clones see the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A poisoned lock only means a test thread panicked mid-update; the
        // counters are still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make subsequent `connect` calls fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Make subsequent `register` calls fail. Nothing is subscribed or counted.
    pub fn fail_registrations(&self, fail: bool) {
        self.lock().fail_registrations = fail;
    }

    /// Make subsequent `close` calls report an error. The close is still counted
    /// and the client still stops delivering.
    pub fn fail_closes(&self, fail: bool) {
        self.lock().fail_closes = fail;
    }

    /// Drop the subscription on `queue` as a broker-side consumer cancel would.
    ///
    /// Already handed over messages are still processed; new ones stay queued.
    /// Returns `false` when nothing is registered there.
    pub fn cancel_consumer(&self, queue: &str) -> bool {
        self.lock()
            .queues
            .get_mut(queue)
            .and_then(|q| q.subscriber.take())
            .is_some()
    }

    /// Enqueue a message, delivering it at once if a handler is registered.
    pub fn publish(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        state.next_delivery_tag += 1;
        let message = Message::new(state.next_delivery_tag, false, body.into());

        let queue = state.queues.entry(queue.to_string()).or_default();
        match &queue.subscriber {
            Some(subscriber) => {
                if let Err(mpsc::error::SendError(Ok(message))) = subscriber.send(Ok(message)) {
                    queue.pending.push_back(message);
                }
            }
            None => queue.pending.push_back(message),
        }
    }

    /// Push a receive fault to the handler registered on `queue`.
    ///
    /// Returns `false` when nothing is registered there.
    pub fn report_fault(&self, queue: &str, fault: Fault) -> bool {
        let state = self.lock();
        state
            .queues
            .get(queue)
            .and_then(|q| q.subscriber.as_ref())
            .is_some_and(|subscriber| subscriber.send(Err(fault)).is_ok())
    }

    /// Messages still sitting in `queue`, not yet handed to any handler.
    pub fn pending(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.pending.len())
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn registrations(&self) -> usize {
        self.lock().registrations
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    type Client = InMemoryClient;

    async fn connect(&self, params: &ConnectionParams) -> Result<InMemoryClient, BrokerError> {
        let mut state = self.lock();
        state.connect_attempts += 1;

        if state.refuse_connections {
            return Err(BrokerError::Connect(Box::new(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "in-memory broker is refusing connections",
            ))));
        }

        state.queues.entry(params.queue_name.clone()).or_default();
        debug!("In-memory connection opened for {}", params);

        Ok(InMemoryClient {
            broker: self.clone(),
            queue_name: params.queue_name.clone(),
            dispatcher: None,
            closed: false,
        })
    }
}

pub struct InMemoryClient {
    broker: InMemoryBroker,
    queue_name: String,
    dispatcher: Option<Dispatcher>,
    closed: bool,
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    async fn register(&mut self, handler: Arc<dyn DeliveryHandler>) -> Result<(), BrokerError> {
        if self.dispatcher.is_some() {
            debug!("Handlers already registered on queue {}", self.queue_name);
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut state = self.broker.lock();
            if state.fail_registrations {
                return Err(BrokerError::Subscribe {
                    queue: self.queue_name.clone(),
                    source: "in-memory broker is rejecting registrations".into(),
                });
            }
            state.registrations += 1;

            let queue = state.queues.entry(self.queue_name.clone()).or_default();
            for message in queue.pending.drain(..) {
                // rx is alive, this cannot fail.
                let _ = tx.send(Ok(message));
            }
            queue.subscriber = Some(tx);
        }

        info!("🔍 Started consuming from in-memory queue: {}", self.queue_name);

        let deliveries = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
        self.dispatcher = Some(Dispatcher::spawn(deliveries, handler));

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

        let closed = {
            let mut state = self.broker.lock();
            state.closes += 1;
            // Dropping the sender ends the delivery stream once it is drained.
            if let Some(queue) = state.queues.get_mut(&self.queue_name) {
                queue.subscriber = None;
            }
            if state.fail_closes {
                Err(BrokerError::Close(
                    "in-memory broker failed to close the connection".into(),
                ))
            } else {
                Ok(())
            }
        };

        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.drain(DRAIN_TIMEOUT).await {
                warn!("Dispatch task did not finish cleanly: {}", e);
            }
        }

        closed
    }

    fn is_connected(&self) -> bool {
        !self.closed && !self.dispatcher.as_ref().is_some_and(Dispatcher::has_ended)
    }
}
