use async_trait::async_trait;
use std::str::Utf8Error;
use tracing::{debug, error, info};

use crate::broker::{DeliveryHandler, Fault, Message};

/// Logs every message body and every fault. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

pub fn decode_body(body: &[u8]) -> Result<&str, Utf8Error> {
    std::str::from_utf8(body)
}

#[async_trait]
impl DeliveryHandler for LoggingHandler {
    async fn on_message(&self, message: Message) {
        debug!(
            delivery_tag = message.delivery_tag,
            redelivered = message.redelivered,
            received_at = %message.received_at,
            "Handling message"
        );

        // Already removed from the queue: an undecodable body is lost.
        match decode_body(&message.body) {
            Ok(text) => info!("[New message received] {}", text),
            Err(e) => error!(
                "[Failure] message {} body is not valid UTF-8: {}",
                message.delivery_tag, e
            ),
        }
    }

    async fn on_fault(&self, fault: Fault) {
        error!("[Failure] {} {}", fault.kind, fault.message);
    }
}
