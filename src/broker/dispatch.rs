use futures::{Stream, StreamExt};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, warn};

use crate::broker::{DeliveryHandler, Fault, Message};

/// A running dispatch task and the flag it raises once its stream has ended.
pub(crate) struct Dispatcher {
    handle: JoinHandle<()>,
    ended: watch::Receiver<bool>,
}

impl Dispatcher {
    /// Spawn [`dispatch`] in the current span.
    pub(crate) fn spawn<S>(deliveries: S, handler: Arc<dyn DeliveryHandler>) -> Self
    where
        S: Stream<Item = Result<Message, Fault>> + Send + 'static,
    {
        let (tx, ended) = watch::channel(false);
        let handle = tokio::spawn(
            async move {
                dispatch(deliveries, handler).await;
                let _ = tx.send(true);
            }
            .in_current_span(),
        );
        Self { handle, ended }
    }

    pub(crate) fn has_ended(&self) -> bool {
        *self.ended.borrow() || self.handle.is_finished()
    }

    /// Resolve once the delivery stream is over, whatever the reason.
    pub(crate) async fn ended(&mut self) {
        // A dropped sender means the task is gone too.
        let _ = self.ended.wait_for(|ended| *ended).await;
    }

    /// Wait up to `timeout` for in-flight handlers, then abort the task.
    pub(crate) async fn drain(self, timeout: Duration) -> Result<(), tokio::task::JoinError> {
        let mut handle = self.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Handlers still running after {:?}, abandoning them", timeout);
                handle.abort();
                Ok(())
            }
        }
    }
}

/// Drive `deliveries` until it ends, one task per message.
///
/// Faults go straight to the handler and do not stop consumption. Returns once the
/// stream has ended and every spawned handler has finished.
pub(crate) async fn dispatch<S>(deliveries: S, handler: Arc<dyn DeliveryHandler>)
where
    S: Stream<Item = Result<Message, Fault>>,
{
    let mut deliveries = pin!(deliveries);
    let mut in_flight = JoinSet::new();

    while let Some(delivery) = deliveries.next().await {
        match delivery {
            Ok(message) => {
                let handler = handler.clone();
                in_flight.spawn(
                    async move { handler.on_message(message).await }.in_current_span(),
                );
            }
            Err(fault) => handler.on_fault(fault).await,
        }

        while let Some(finished) = in_flight.try_join_next() {
            report_join(finished);
        }
    }

    info!("📥 Message consumption loop ended");
    debug!("Waiting for {} handler(s)", in_flight.len());
    while let Some(finished) = in_flight.join_next().await {
        report_join(finished);
    }
}

fn report_join(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        error!("❌ Message handler task failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        bodies: Mutex<Vec<Vec<u8>>>,
        faults: Mutex<Vec<Fault>>,
    }

    #[async_trait]
    impl DeliveryHandler for Recorder {
        async fn on_message(&self, message: Message) {
            self.bodies.lock().unwrap().push(message.body);
        }

        async fn on_fault(&self, fault: Fault) {
            self.faults.lock().unwrap().push(fault);
        }
    }

    #[tokio::test]
    async fn test_all_handlers_finish_before_return() {
        let recorder = Arc::new(Recorder::default());
        let deliveries = futures::stream::iter(vec![
            Ok(Message::new(1, false, b"a".to_vec())),
            Err(Fault::new("Timeout", "receive timed out")),
            Ok(Message::new(2, false, b"b".to_vec())),
        ]);

        dispatch(deliveries, recorder.clone()).await;

        let mut bodies = recorder.bodies.lock().unwrap().clone();
        bodies.sort();
        assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(
            *recorder.faults.lock().unwrap(),
            vec![Fault::new("Timeout", "receive timed out")]
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_consumption() {
        struct Flaky(Mutex<u32>);

        #[async_trait]
        impl DeliveryHandler for Flaky {
            async fn on_message(&self, message: Message) {
                if message.body == b"boom" {
                    panic!("handler blew up");
                }
                *self.0.lock().unwrap() += 1;
            }

            async fn on_fault(&self, _fault: Fault) {}
        }

        let handler = Arc::new(Flaky(Mutex::new(0)));
        let deliveries = futures::stream::iter(vec![
            Ok(Message::new(1, false, b"boom".to_vec())),
            Ok(Message::new(2, false, b"fine".to_vec())),
        ]);

        dispatch(deliveries, handler.clone()).await;

        assert_eq!(*handler.0.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_reports_end_of_stream() {
        let recorder = Arc::new(Recorder::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let deliveries = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));

        let mut dispatcher = Dispatcher::spawn(deliveries, recorder.clone());
        tx.send(Ok(Message::new(1, false, b"a".to_vec()))).unwrap();
        assert!(!dispatcher.has_ended());

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), dispatcher.ended())
            .await
            .expect("end of stream should be signalled");

        assert!(dispatcher.has_ended());
        dispatcher.drain(Duration::from_secs(1)).await.unwrap();
        assert_eq!(*recorder.bodies.lock().unwrap(), vec![b"a".to_vec()]);
    }

    #[tokio::test]
    async fn test_drain_aborts_a_stuck_dispatcher() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::spawn(futures::stream::pending(), recorder);

        let drained = tokio::time::timeout(
            Duration::from_secs(1),
            dispatcher.drain(Duration::from_millis(20)),
        )
        .await
        .expect("drain should give up after its timeout");

        assert!(drained.is_ok());
    }
}
