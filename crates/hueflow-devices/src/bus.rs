/*!
 * Message bus abstraction.
 *
 * The bridge only needs four operations from a bus client: publish,
 * subscribe, install a handler for inbound messages, and close.
 */
use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::device::{DeviceError, Result};

/// A message received from or sent to the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Raw payload
    pub payload: Bytes,
    /// Whether the message was retained by the broker
    pub retain: bool,
}

impl BusMessage {
    /// Create a new non-retained message
    pub fn new<T: Into<String>, P: Into<Bytes>>(topic: T, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    /// Mark the message as retained
    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    /// Payload decoded as UTF-8, replacing invalid sequences
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Receives inbound bus traffic
///
/// A bus error is delivered as `Err` so the handler can log it; there is no
/// way to answer a message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound message or bus error
    async fn handle(&self, message: std::result::Result<BusMessage, DeviceError>);
}

/// Publish/subscribe client used by the bridge
#[async_trait]
pub trait MessageBus: Send + Sync + Debug {
    /// Publish `payload` on `topic`
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()>;

    /// Subscribe to a topic filter (`+` and `#` wildcards allowed)
    async fn subscribe(&self, filter: &str) -> Result<()>;

    /// Install the handler that receives every inbound message
    ///
    /// Replaces any previously installed handler.
    fn set_handler(&self, handler: Arc<dyn MessageHandler>);

    /// Close the connection to the broker
    async fn close(&self) -> Result<()>;
}
