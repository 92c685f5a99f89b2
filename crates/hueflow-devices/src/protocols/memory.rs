/*!
 * In-memory message bus.
 *
 * [`MemoryBus`] records everything published on it and delivers injected
 * messages to the installed handler when a subscription matches, the same
 * way a broker would. Used by the virtual run mode and by tests.
 */
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::bus::{BusMessage, MessageBus, MessageHandler};
use crate::device::{DeviceError, Result};
use crate::topic;

/// A bus that never leaves the process
#[derive(Default)]
pub struct MemoryBus {
    published: Mutex<Vec<BusMessage>>,
    subscriptions: Mutex<Vec<String>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    closes: AtomicUsize,
    failing: AtomicBool,
}

impl fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBus")
            .field("published", &self.published().len())
            .field("subscriptions", &self.subscriptions())
            .finish()
    }
}

impl MemoryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    fn current_handler(&self) -> Option<Arc<dyn MessageHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver a message as if it came from the broker
    ///
    /// Returns false when no subscription matches the topic or no handler is
    /// installed; the message is dropped in that case.
    pub async fn inject(&self, topic: &str, payload: &str) -> bool {
        let subscribed = self
            .subscriptions()
            .iter()
            .any(|filter| topic::matches_filter(filter, topic));
        if !subscribed {
            debug!("Dropping message on {}: no matching subscription", topic);
            return false;
        }

        match self.current_handler() {
            Some(handler) => {
                handler
                    .handle(Ok(BusMessage::new(topic, payload.to_string())))
                    .await;
                true
            }
            None => false,
        }
    }

    /// Deliver a bus error to the handler
    pub async fn inject_error(&self, error: DeviceError) -> bool {
        match self.current_handler() {
            Some(handler) => {
                handler.handle(Err(error)).await;
                true
            }
            None => false,
        }
    }

    /// Every message published so far, oldest first
    pub fn published(&self) -> Vec<BusMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages published on one topic
    pub fn published_to(&self, topic: &str) -> Vec<BusMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    /// Last retained payload on a topic, as a broker would replay it
    pub fn retained_value(&self, topic: &str) -> Option<String> {
        self.published_to(topic)
            .into_iter()
            .rev()
            .find(|m| m.retain)
            .map(|m| m.payload_str().into_owned())
    }

    /// Forget recorded publishes
    pub fn clear_published(&self) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Active subscription filters
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a handler is installed
    pub fn has_handler(&self) -> bool {
        self.current_handler().is_some()
    }

    /// Make every subsequent publish and subscribe fail
    pub fn fail_operations(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self, what: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::bus(format!("{} rejected: broker unavailable", what)));
        }
        Ok(())
    }

    /// Number of times the bus was closed
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        self.check_available("publish")?;
        let mut message = BusMessage::new(topic, payload.to_vec());
        message.retain = retain;
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.check_available("subscribe")?;
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !subscriptions.iter().any(|s| s == filter) {
            subscriptions.push(filter.to_string());
        }
        Ok(())
    }

    fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
