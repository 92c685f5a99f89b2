/*!
 * MQTT bus implementation for HueFlow.
 *
 * [`MqttBus`] wraps a `rumqttc` client. The event loop runs on a background
 * task that forwards every incoming publish to the installed handler and
 * restores subscriptions whenever the broker connection comes back.
 */
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hueflow_core::config::MqttConfig;

use crate::bus::{BusMessage, MessageBus, MessageHandler};
use crate::device::{DeviceError, Result};

const QOS: QoS = QoS::AtLeastOnce;
const CHANNEL_CAPACITY: usize = 100;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type HandlerSlot = Arc<RwLock<Option<Arc<dyn MessageHandler>>>>;

/// Message bus backed by an MQTT broker
pub struct MqttBus {
    client: AsyncClient,
    broker: String,
    handler: HandlerSlot,
    subscriptions: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for MqttBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttBus")
            .field("broker", &self.broker)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl MqttBus {
    /// Create the client and start its event loop
    ///
    /// The broker connection is established by the event loop; until it is
    /// up, publishes and subscriptions queue in the client.
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(DeviceError::bus("MQTT host is empty"));
        }

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive());
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, event_loop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        let broker = format!("{}:{}", config.host, config.port);
        info!("MQTT bus connecting to {} as {}", broker, config.client_id);

        let bus = Self {
            client,
            broker,
            handler: Arc::new(RwLock::new(None)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            event_loop: Mutex::new(None),
        };

        let task = tokio::spawn(run_event_loop(
            event_loop,
            bus.client.clone(),
            bus.handler.clone(),
            bus.subscriptions.clone(),
            bus.closed.clone(),
        ));
        *bus.event_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        Ok(bus)
    }

    /// Broker address, `host:port`
    pub fn broker(&self) -> &str {
        &self.broker
    }
}

fn current_handler(slot: &HandlerSlot) -> Option<Arc<dyn MessageHandler>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn deliver(slot: &HandlerSlot, message: std::result::Result<BusMessage, DeviceError>) {
    match current_handler(slot) {
        Some(handler) => {
            tokio::spawn(async move { handler.handle(message).await });
        }
        None => debug!("No handler installed, dropping inbound message"),
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    handler: HandlerSlot,
    subscriptions: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
) {
    loop {
        if closed.load(Ordering::SeqCst) {
            break;
        }

        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "MQTT received: {} ({} bytes)",
                    publish.topic,
                    publish.payload.len()
                );
                let mut message = BusMessage::new(publish.topic, publish.payload.to_vec());
                message.retain = publish.retain;
                deliver(&handler, Ok(message));
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected to broker");
                let filters = subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for filter in filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QOS) {
                        warn!("Failed to restore subscription {}: {}", filter, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT disconnected from broker");
            }
            Ok(_) => {}
            Err(e) => {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                error!("MQTT error: {}", e);
                deliver(&handler, Err(DeviceError::bus(e.to_string())));
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    debug!("MQTT event loop stopped");
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        self.client
            .publish(topic, QOS, retain, payload.to_vec())
            .await
            .map_err(|e| DeviceError::bus(format!("publish to {} failed: {}", topic, e)))?;
        debug!("MQTT sent to topic: {}", topic);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.client
            .subscribe(filter, QOS)
            .await
            .map_err(|e| DeviceError::bus(format!("subscribe to {} failed: {}", filter, e)))?;

        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !subscriptions.iter().any(|s| s == filter) {
            subscriptions.push(filter.to_string());
        }
        debug!("MQTT subscribed to: {}", filter);
        Ok(())
    }

    fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect failed: {}", e);
        }
        let task = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!("MQTT bus to {} closed", self.broker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            client_id: "hueflow-test".to_string(),
            ..MqttConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_host() {
        let config = MqttConfig {
            host: " ".to_string(),
            ..config()
        };
        assert!(matches!(MqttBus::connect(&config), Err(DeviceError::Bus(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let bus = MqttBus::connect(&config()).unwrap();
        assert_eq!(bus.broker(), "127.0.0.1:1");
        bus.close().await.unwrap();
        bus.close().await.unwrap();
        assert!(bus.closed.load(Ordering::SeqCst));
    }
}
