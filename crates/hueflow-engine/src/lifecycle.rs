/*!
 * Bridge lifecycle.
 *
 * [`BridgeController::start`] brings a bridge onto the bus in a fixed order:
 * check settings, connect and authenticate, build one adapter per light,
 * announce and publish every attribute, subscribe, and only then install
 * the handler that turns bus messages into commands.
 */
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn, Instrument};

use hueflow_core::config::{BridgeConfig, PairingConfig};
use hueflow_core::logging::component_span;
use hueflow_core::utils::{spawn_and_log, Sleeper, TokioSleeper};
use hueflow_devices::topic::{self, Route};
use hueflow_devices::{
    BridgeConnector, BridgeRegistry, BusMessage, DeviceAdapter, DeviceError, MessageBus,
    MessageHandler,
};

use crate::error::{Error, Result};
use crate::pairing::PairingCoordinator;

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::configuration(format!("{} is not set", what)))
}

/// Connects one bridge to the bus and keeps it there until stopped
pub struct BridgeController {
    connector: Arc<dyn BridgeConnector>,
    bus: Arc<dyn MessageBus>,
    registry: OnceLock<Arc<BridgeRegistry>>,
    pairing: PairingConfig,
    sleeper: Arc<dyn Sleeper>,
    pairing_active: Arc<AtomicBool>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl fmt::Debug for BridgeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeController")
            .field("connector", &self.connector.name())
            .field("bus", &self.bus)
            .field("devices", &self.registry().map_or(0, |r| r.len()))
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

impl BridgeController {
    /// Create a controller for the bridge reached through `connector`
    pub fn new(connector: Arc<dyn BridgeConnector>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            connector,
            bus,
            registry: OnceLock::new(),
            pairing: PairingConfig::default(),
            sleeper: Arc::new(TokioSleeper),
            pairing_active: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Settings for pairing flows triggered over the bus
    pub fn with_pairing(mut self, pairing: PairingConfig) -> Self {
        self.pairing = pairing;
        self
    }

    /// Source of delays for pairing flows
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Registered devices, once the bridge is online
    pub fn registry(&self) -> Option<&Arc<BridgeRegistry>> {
        self.registry.get()
    }

    /// Whether a pairing flow is running
    pub fn is_pairing(&self) -> bool {
        self.pairing_active.load(Ordering::SeqCst)
    }

    /// Bring the bridge onto the bus
    ///
    /// Fails without touching the network when the address or token is
    /// missing. Succeeds at most once, and never after [`stop`](Self::stop).
    pub async fn start(&self, settings: &BridgeConfig) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::runtime("bridge controller stopped"));
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::runtime("bridge controller already started"));
        }

        let result = self
            .start_inner(settings)
            .instrument(component_span("bridge", settings.address.as_deref()))
            .await;
        if result.is_err() {
            self.started.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn start_inner(&self, settings: &BridgeConfig) -> Result<()> {
        let address = required(&settings.address, "bridge address")?;
        let token = required(&settings.auth_token, "bridge auth token")?;

        let session = self.connector.connect(address).await?;
        session.authenticate(token).await?;
        let bridge_name = session.friendly_name().to_string();
        info!("Authenticated with bridge {:?} at {}", bridge_name, address);

        let registry = Arc::new(BridgeRegistry::new());
        for light in session.lights().await? {
            let adapter =
                DeviceAdapter::for_light(&settings.namespace, &bridge_name, light, self.bus.clone());
            registry.register(adapter)?;
        }

        for adapter in registry.adapters() {
            adapter.publish_discovery().await?;
            adapter.publish_state().await?;
            self.bus.subscribe(&adapter.subscription_filter()).await?;
        }

        self.bus
            .subscribe(&topic::register_filter(&settings.namespace))
            .await?;
        self.bus.set_handler(Arc::new(BridgeHandler {
            registry: registry.clone(),
            connector: self.connector.clone(),
            pairing: self.pairing.clone(),
            sleeper: self.sleeper.clone(),
            pairing_active: self.pairing_active.clone(),
        }));

        info!(
            "Bridge {:?} online with {} devices",
            bridge_name,
            registry.len()
        );
        // Only reachable once per controller, guarded by `started`.
        let _ = self.registry.set(registry);
        Ok(())
    }

    /// Disconnect from the bus
    ///
    /// The bus is closed whether or not `start` succeeded. Later calls do
    /// nothing.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus.close().await?;
        info!("Bridge controller stopped");
        Ok(())
    }
}

/// Turns inbound bus traffic into commands and pairing flows
struct BridgeHandler {
    registry: Arc<BridgeRegistry>,
    connector: Arc<dyn BridgeConnector>,
    pairing: PairingConfig,
    sleeper: Arc<dyn Sleeper>,
    pairing_active: Arc<AtomicBool>,
}

impl BridgeHandler {
    fn start_pairing(&self, address: String) {
        if self.pairing_active.swap(true, Ordering::SeqCst) {
            warn!("Pairing already in progress, ignoring request for {}", address);
            return;
        }

        let coordinator = PairingCoordinator::new(self.connector.clone(), &self.pairing)
            .with_sleeper(self.sleeper.clone());
        let active = self.pairing_active.clone();
        spawn_and_log("pairing", async move {
            let result = coordinator.pair(&address).await;
            active.store(false, Ordering::SeqCst);
            result
        });
    }
}

#[async_trait]
impl MessageHandler for BridgeHandler {
    async fn handle(&self, message: std::result::Result<BusMessage, DeviceError>) {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                error!("Bus error: {}", e);
                return;
            }
        };

        match topic::route(&message.topic) {
            Route::Register { address } => self.start_pairing(address),
            Route::Command { .. } => {
                let payload = message.payload_str();
                debug!("Command on {}: {:?}", message.topic, payload);
                if let Err(e) = self.registry.dispatch(&message.topic, &payload).await {
                    warn!("Command on {} failed: {}", message.topic, e);
                }
            }
            Route::Ignored => trace!("Ignoring message on {}", message.topic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hueflow_devices::capability::names;
    use hueflow_devices::protocols::{MemoryBus, VirtualBridge};

    #[derive(Debug)]
    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {
            tokio::task::yield_now().await;
        }
    }

    const TOKEN: &str = "0123456789abcdef";

    fn settings() -> BridgeConfig {
        BridgeConfig {
            address: Some("192.168.1.20".to_string()),
            auth_token: Some(TOKEN.to_string()),
            ..BridgeConfig::default()
        }
    }

    fn controller(bridge: &VirtualBridge) -> (BridgeController, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let controller = BridgeController::new(Arc::new(bridge.clone()), bus.clone())
            .with_sleeper(Arc::new(NoSleep));
        (controller, bus)
    }

    fn living_room() -> VirtualBridge {
        VirtualBridge::new("Living room")
            .with_light("Kitchen")
            .with_light("Desk")
            .with_token(TOKEN)
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_missing_settings_fail_before_connecting() {
        let bridge = living_room();
        let (controller, bus) = controller(&bridge);

        for settings in [
            BridgeConfig {
                address: None,
                ..settings()
            },
            BridgeConfig {
                auth_token: Some("  ".to_string()),
                ..settings()
            },
        ] {
            let err = controller.start(&settings).await.unwrap_err();
            assert!(matches!(err, Error::Configuration(_)));
        }
        assert_eq!(bridge.connect_calls(), 0);
        assert!(bus.published().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_start_announces_every_attribute() {
        let bridge = living_room();
        let (controller, bus) = controller(&bridge);
        tokio_test::assert_ok!(controller.start(&settings()).await);

        assert_eq!(controller.registry().unwrap().device_ids(), vec!["Desk", "Kitchen"]);
        let published = bus.published();
        assert_eq!(published.len(), 2 * 2 * 10);
        assert!(published.iter().all(|m| m.retain));
        assert_eq!(
            bus.retained_value("New/Hue/Living room/Device/Kitchen/On").as_deref(),
            Some("on bool : Turns the light on or off")
        );
        assert_eq!(
            bus.retained_value("Hue/Living room/Device/Kitchen/On").as_deref(),
            Some("false")
        );
        assert_eq!(
            bus.subscriptions(),
            vec![
                "Hue/Living room/Device/Desk/#".to_string(),
                "Hue/Living room/Device/Kitchen/#".to_string(),
                "Hue/Service/+/Register".to_string(),
            ]
        );
        assert!(bus.has_handler());
    }

    #[tokio::test]
    async fn test_bad_token_propagates() {
        let bridge = living_room();
        let (controller, bus) = controller(&bridge);
        let settings = BridgeConfig {
            auth_token: Some("stale".to_string()),
            ..settings()
        };
        let err = controller.start(&settings).await.unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::Authentication(_))));
        assert!(!bus.has_handler());
    }

    #[tokio::test]
    async fn test_unreachable_bridge_propagates() {
        let bridge = living_room().unreachable();
        let (controller, _) = controller(&bridge);
        let err = controller.start(&settings()).await.unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::Connect(_))));
    }

    #[tokio::test]
    async fn test_duplicate_light_names_are_fatal() {
        let bridge = living_room().with_light("Kitchen");
        let (controller, _) = controller(&bridge);
        let err = controller.start(&settings()).await.unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::DuplicateDevice(_))));
        assert!(controller.registry().is_none());
    }

    #[tokio::test]
    async fn test_second_start_fails() {
        let bridge = living_room();
        let (controller, _) = controller(&bridge);
        controller.start(&settings()).await.unwrap();
        let err = controller.start(&settings()).await.unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[tokio::test]
    async fn test_commands_reach_the_light() {
        let bridge = living_room();
        let (controller, bus) = controller(&bridge);
        controller.start(&settings()).await.unwrap();
        bus.clear_published();

        assert!(
            bus.inject("Hue/Living room/Device/Kitchen/Brightness/Set", "77")
                .await
        );
        assert_eq!(bridge.light("Kitchen").unwrap().snapshot().bri, 77);
        assert_eq!(
            bus.retained_value("Hue/Living room/Device/Kitchen/Brightness").as_deref(),
            Some("77")
        );

        // Invalid and unknown commands are logged, not published
        bus.inject("Hue/Living room/Device/Kitchen/Saturation/Set", "300")
            .await;
        bus.inject("Hue/Living room/Device/Kitchen/Volume/Set", "3")
            .await;
        bus.inject_error(DeviceError::bus("connection lost")).await;
        assert_eq!(bus.published().len(), 1);
        assert_eq!(
            controller
                .registry()
                .unwrap()
                .lookup("Kitchen")
                .unwrap()
                .get_attribute(names::SATURATION)
                .await
                .unwrap(),
            "140"
        );
    }

    #[tokio::test]
    async fn test_register_topic_starts_pairing() {
        let bridge = living_room();
        let (controller, bus) = controller(&bridge);
        controller.start(&settings()).await.unwrap();

        bridge.press_link_button();
        assert!(bus.inject("Hue/Service/192.168.1.20/Register", "").await);
        wait_for(|| bridge.create_user_calls() == 1 && !controller.is_pairing()).await;
        assert_eq!(bridge.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_only_one_pairing_flow_at_a_time() {
        let bridge = living_room();
        let (controller, bus) = controller(&bridge);
        let controller = controller.with_pairing(PairingConfig {
            poll_interval_secs: 0,
            max_attempts: 50,
        });
        controller.start(&settings()).await.unwrap();

        bus.inject("Hue/Service/192.168.1.20/Register", "").await;
        assert!(controller.is_pairing());
        bus.inject("Hue/Service/192.168.1.20/Register", "").await;

        wait_for(|| !controller.is_pairing()).await;
        assert_eq!(bridge.connect_calls(), 2);
        assert_eq!(bridge.create_user_calls(), 50);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let bridge = living_room();
        let (controller, bus) = controller(&bridge);

        controller.start(&settings()).await.unwrap();
        controller.stop().await.unwrap();
        controller.stop().await.unwrap();
        assert_eq!(bus.close_count(), 1);
        assert!(!bus.has_handler());
    }

    #[tokio::test]
    async fn test_stop_closes_bus_after_failed_start() {
        let bridge = living_room().with_light("Kitchen");
        let (controller, bus) = controller(&bridge);
        assert!(controller.start(&settings()).await.is_err());

        controller.stop().await.unwrap();
        controller.stop().await.unwrap();
        assert_eq!(bus.close_count(), 1);
    }

    #[tokio::test]
    async fn test_start_after_stop_is_rejected() {
        let bridge = living_room();
        let (controller, bus) = controller(&bridge);
        controller.stop().await.unwrap();
        assert_eq!(bus.close_count(), 1);

        let err = controller.start(&settings()).await.unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert_eq!(bridge.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_light_listing_failure_aborts_start() {
        let bridge = living_room().failing_light_listing();
        let (controller, bus) = controller(&bridge);

        let err = controller.start(&settings()).await.unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::Communication(_))));
        assert!(bus.published().is_empty());
        assert!(!bus.has_handler());
        assert!(controller.registry().is_none());
    }

    #[tokio::test]
    async fn test_bus_failure_aborts_start() {
        let bridge = living_room();
        let (controller, bus) = controller(&bridge);
        bus.fail_operations(true);

        let err = controller.start(&settings()).await.unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::Bus(_))));
        assert!(bus.subscriptions().is_empty());
        assert!(!bus.has_handler());
        assert!(controller.registry().is_none());

        // A failed start can be retried once the broker is back
        bus.fail_operations(false);
        tokio_test::assert_ok!(controller.start(&settings()).await);
        assert!(bus.has_handler());
        assert_eq!(controller.registry().unwrap().len(), 2);
    }
}
