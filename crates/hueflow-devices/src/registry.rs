/*!
 * Bridge registry for HueFlow.
 *
 * The registry owns every [`DeviceAdapter`] of a running bridge and routes
 * inbound command topics to them. It is filled once at startup and only
 * read afterwards, so lookups take a read lock that is released before the
 * command runs.
 */
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::adapter::DeviceAdapter;
use crate::device::{DeviceError, Result};
use crate::topic::{self, Route};

/// All device adapters of one bridge, keyed by device id
#[derive(Debug, Default)]
pub struct BridgeRegistry {
    devices: RwLock<HashMap<String, Arc<DeviceAdapter>>>,
}

impl BridgeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its device id
    pub fn register(&self, adapter: DeviceAdapter) -> Result<Arc<DeviceAdapter>> {
        let mut devices = self.devices.write().map_err(|_| {
            DeviceError::LockPoisoned("Failed to acquire write lock on bridge registry".to_string())
        })?;

        let id = adapter.device_id().to_string();
        if devices.contains_key(&id) {
            return Err(DeviceError::DuplicateDevice(id));
        }

        let adapter = Arc::new(adapter);
        devices.insert(id.clone(), adapter.clone());
        debug!("Registered device {}", id);
        Ok(adapter)
    }

    /// Adapter registered under `device_id`
    pub fn lookup(&self, device_id: &str) -> Option<Arc<DeviceAdapter>> {
        // Writers only insert whole entries, so a poisoned map is still consistent.
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    /// Route an inbound message to the addressed device
    ///
    /// Only command topics (`.../<deviceId>/<attribute>/Set`) are acted on;
    /// anything else, including the bridge's own state echoes, is ignored.
    pub async fn dispatch(&self, topic: &str, payload: &str) -> Result<()> {
        let Route::Command {
            device_id,
            attribute,
        } = topic::route(topic)
        else {
            trace!("Ignoring message on {}", topic);
            return Ok(());
        };

        let adapter = self
            .lookup(&device_id)
            .ok_or_else(|| DeviceError::UnknownDevice(device_id.clone()))?;
        adapter.set_attribute(&attribute, payload).await
    }

    /// Ids of all registered devices, sorted
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// All registered adapters, sorted by device id
    pub fn adapters(&self) -> Vec<Arc<DeviceAdapter>> {
        let mut adapters: Vec<Arc<DeviceAdapter>> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        adapters.sort_by(|a, b| a.device_id().cmp(b.device_id()));
        adapters
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no device is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::names;
    use crate::protocols::memory::MemoryBus;
    use crate::protocols::virtual_bridge::VirtualLight;

    fn registry_with(ids: &[&str]) -> (BridgeRegistry, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let registry = BridgeRegistry::new();
        for id in ids {
            let light = Arc::new(VirtualLight::new(*id));
            registry
                .register(DeviceAdapter::for_light("Hue", "Bridge", light, bus.clone()))
                .unwrap();
        }
        (registry, bus)
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let (registry, bus) = registry_with(&["Kitchen"]);
        let dup = DeviceAdapter::for_light(
            "Hue",
            "Bridge",
            Arc::new(VirtualLight::new("Kitchen")),
            bus,
        );
        assert!(matches!(
            registry.register(dup),
            Err(DeviceError::DuplicateDevice(id)) if id == "Kitchen"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_enumeration_is_sorted() {
        let (registry, _) = registry_with(&["Kitchen", "Desk", "Hall"]);
        assert_eq!(registry.device_ids(), vec!["Desk", "Hall", "Kitchen"]);
        let ids: Vec<_> = registry
            .adapters()
            .iter()
            .map(|a| a.device_id().to_string())
            .collect();
        assert_eq!(ids, registry.device_ids());
        assert!(!registry.is_empty());
        assert!(BridgeRegistry::new().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_command() {
        let (registry, bus) = registry_with(&["Kitchen"]);
        registry
            .dispatch("Hue/Bridge/Device/Kitchen/Brightness/Set", "42")
            .await
            .unwrap();
        assert_eq!(
            bus.retained_value("Hue/Bridge/Device/Kitchen/Brightness").as_deref(),
            Some("42")
        );
    }

    #[tokio::test]
    async fn test_dispatch_unknown_device_publishes_nothing() {
        let (registry, bus) = registry_with(&["Kitchen"]);
        registry
            .dispatch("Hue/Bridge/Device/Kitchen/On/Set", "true")
            .await
            .unwrap();
        let before = bus.published();

        let err = registry
            .dispatch("Hue/Bridge/Device/Garage/On/Set", "true")
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::UnknownDevice(id) if id == "Garage"));
        assert_eq!(bus.published(), before);

        let kitchen = registry.lookup("Kitchen").unwrap();
        assert_eq!(kitchen.get_attribute(names::ON).await.unwrap(), "true");
    }

    #[tokio::test]
    async fn test_dispatch_ignores_non_commands() {
        let (registry, bus) = registry_with(&["Kitchen"]);
        registry
            .dispatch("Hue/Bridge/Device/Kitchen/On", "true")
            .await
            .unwrap();
        registry.dispatch("Set", "true").await.unwrap();
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_dispatch() {
        let (registry, bus) = registry_with(&["A", "B", "C"]);
        let registry = Arc::new(registry);

        let tasks: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|id| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .dispatch(&format!("Hue/Bridge/Device/{}/On/Set", id), "true")
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for id in ["A", "B", "C"] {
            let topic = format!("Hue/Bridge/Device/{}/On", id);
            assert_eq!(bus.retained_value(&topic).as_deref(), Some("true"));
        }
    }
}
