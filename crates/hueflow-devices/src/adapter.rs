/*!
 * Device adapter.
 *
 * A [`DeviceAdapter`] binds one light to its capability set and to the
 * topic prefix its attributes are published under.
 */
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::capability::{Capability, CapabilityInfo, CapabilitySet};
use crate::device::{DeviceError, LightHandle, Result};
use crate::topic;

/// One addressable light and its attributes
pub struct DeviceAdapter {
    device_id: String,
    topic_path: String,
    light: Arc<dyn LightHandle>,
    capabilities: CapabilitySet,
    bus: Arc<dyn MessageBus>,
}

impl fmt::Debug for DeviceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAdapter")
            .field("device_id", &self.device_id)
            .field("topic_path", &self.topic_path)
            .field("capabilities", &self.capabilities.len())
            .finish()
    }
}

impl DeviceAdapter {
    /// Create an adapter with an explicit topic prefix and capability set
    pub fn new(
        device_id: impl Into<String>,
        topic_path: impl Into<String>,
        light: Arc<dyn LightHandle>,
        capabilities: CapabilitySet,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            topic_path: topic_path.into(),
            light,
            capabilities,
            bus,
        }
    }

    /// Create an adapter for a light with the standard capability set
    ///
    /// The device id is the light's id made safe for use as a topic segment.
    pub fn for_light(
        namespace: &str,
        bridge_name: &str,
        light: Arc<dyn LightHandle>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let device_id = topic::sanitize_segment(light.id());
        let topic_path = topic::device_path(namespace, bridge_name, &device_id);
        Self::new(device_id, topic_path, light, CapabilitySet::standard(), bus)
    }

    /// Identifier the adapter is registered under
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Topic prefix of every attribute
    pub fn topic_path(&self) -> &str {
        &self.topic_path
    }

    /// The underlying light
    pub fn light(&self) -> &Arc<dyn LightHandle> {
        &self.light
    }

    /// State topic of an attribute
    pub fn attribute_topic(&self, name: &str) -> String {
        format!("{}/{}", self.topic_path, name)
    }

    /// Filter covering every topic below this device
    pub fn subscription_filter(&self) -> String {
        format!("{}/#", self.topic_path)
    }

    fn capability(&self, name: &str) -> Result<&Arc<dyn Capability>> {
        self.capabilities.get(name).ok_or_else(|| {
            DeviceError::UnknownAttribute(format!("{} on {}", name, self.device_id))
        })
    }

    /// Apply a command payload to an attribute and republish the result
    ///
    /// Nothing is published when the command fails.
    pub async fn set_attribute(&self, name: &str, payload: &str) -> Result<()> {
        let capability = self.capability(name)?;
        if !capability.is_writable() {
            return Err(DeviceError::unsupported(format!(
                "{} on {} is read only",
                name, self.device_id
            )));
        }

        debug!("Setting {}/{} to {:?}", self.device_id, name, payload);
        let applied = capability.apply(self.light.as_ref(), payload).await?;

        let value = match applied.value {
            Some(value) => value,
            None => capability.read(self.light.as_ref()).await?,
        };
        self.publish_attribute(name, &value).await?;

        for (linked, value) in applied.linked {
            let value = match value {
                Some(value) => value,
                None => self.get_attribute(linked).await?,
            };
            self.publish_attribute(linked, &value).await?;
        }

        Ok(())
    }

    /// Current value of an attribute, read from the device
    pub async fn get_attribute(&self, name: &str) -> Result<String> {
        self.capability(name)?.read(self.light.as_ref()).await
    }

    /// Name, payload shape and description of every attribute
    pub fn list_capabilities(&self) -> Vec<CapabilityInfo> {
        self.capabilities.iter().map(|c| c.info()).collect()
    }

    /// Publish the retained discovery message of every attribute
    pub async fn publish_discovery(&self) -> Result<()> {
        for info in self.list_capabilities() {
            let topic = topic::discovery_topic(&self.attribute_topic(info.name));
            self.bus
                .publish(&topic, info.discovery_payload().as_bytes(), true)
                .await?;
        }
        Ok(())
    }

    /// Publish the retained current state of every attribute
    pub async fn publish_state(&self) -> Result<()> {
        for capability in self.capabilities.iter() {
            let value = capability.read(self.light.as_ref()).await?;
            self.publish_attribute(capability.name(), &value).await?;
        }
        info!(
            "Published state of {} attributes for {}",
            self.capabilities.len(),
            self.device_id
        );
        Ok(())
    }

    async fn publish_attribute(&self, name: &str, value: &str) -> Result<()> {
        self.bus
            .publish(&self.attribute_topic(name), value.as_bytes(), true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{names, Ranged, Switch};
    use crate::protocols::memory::MemoryBus;
    use crate::protocols::virtual_bridge::VirtualLight;

    fn adapter() -> (DeviceAdapter, Arc<VirtualLight>, Arc<MemoryBus>) {
        let light = Arc::new(VirtualLight::new("Kitchen"));
        let bus = Arc::new(MemoryBus::new());
        let adapter = DeviceAdapter::for_light("Hue", "Philips hue", light.clone(), bus.clone());
        (adapter, light, bus)
    }

    #[test]
    fn test_topic_path() {
        let (adapter, _, _) = adapter();
        assert_eq!(adapter.device_id(), "Kitchen");
        assert_eq!(adapter.topic_path(), "Hue/Philips hue/Device/Kitchen");
        assert_eq!(adapter.attribute_topic("On"), "Hue/Philips hue/Device/Kitchen/On");
        assert_eq!(adapter.subscription_filter(), "Hue/Philips hue/Device/Kitchen/#");
    }

    #[test_log::test(tokio::test)]
    async fn test_set_on_publishes_new_state() {
        let (adapter, _, bus) = adapter();
        for payload in ["true", "false"] {
            adapter.set_attribute(names::ON, payload).await.unwrap();
            let last = bus.published().pop().unwrap();
            assert_eq!(last.topic, "Hue/Philips hue/Device/Kitchen/On");
            assert_eq!(last.payload_str(), payload);
            assert!(last.retain);
        }
    }

    #[tokio::test]
    async fn test_validation_failure_publishes_nothing() {
        let (adapter, light, bus) = adapter();
        let err = adapter.set_attribute(names::ON, "yes please").await.unwrap_err();
        assert!(matches!(err, DeviceError::Validation(_)));

        let err = adapter
            .set_attribute(names::SATURATION, "300")
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Validation(_)));

        assert!(bus.published().is_empty());
        assert_eq!(light.apply_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_attribute() {
        let (adapter, _, bus) = adapter();
        let err = adapter.set_attribute("Volume", "11").await.unwrap_err();
        assert!(matches!(err, DeviceError::UnknownAttribute(_)));
        assert!(matches!(
            adapter.get_attribute("Volume").await,
            Err(DeviceError::UnknownAttribute(_))
        ));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_attribute_rejects_commands() {
        let (adapter, light, bus) = adapter();
        let err = adapter
            .set_attribute(names::COLOR_MODE, "xy")
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::UnsupportedOperation(_)));
        assert_eq!(light.apply_count(), 0);
        assert!(bus.published().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_named_color_publishes_name_and_coordinates() {
        let (adapter, light, bus) = adapter();
        adapter.set_attribute(names::COLOR_NAME, "Red").await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, adapter.attribute_topic(names::COLOR_NAME));
        assert_eq!(published[0].payload_str(), "Red");
        assert_eq!(published[1].topic, adapter.attribute_topic(names::XY_COLOR));
        assert_eq!(published[1].payload_str(), "0.6915,0.3083");
        assert_eq!(light.snapshot().xy, [0.6915, 0.3083]);
    }

    #[tokio::test]
    async fn test_clearing_named_color_skips_device() {
        let (adapter, light, bus) = adapter();
        for payload in ["None", ""] {
            adapter.set_attribute(names::COLOR_NAME, payload).await.unwrap();
        }

        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|m| m.payload_str() == "None"));
        assert_eq!(light.apply_count(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_xy_color_clears_color_name() {
        let (adapter, _, bus) = adapter();
        adapter.set_attribute(names::XY_COLOR, "0.4,0.5").await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, adapter.attribute_topic(names::XY_COLOR));
        assert_eq!(published[0].payload_str(), "0.4,0.5");
        assert_eq!(published[1].topic, adapter.attribute_topic(names::COLOR_NAME));
        assert_eq!(published[1].payload_str(), "None");
    }

    #[tokio::test]
    async fn test_communication_failure_publishes_nothing() {
        let (adapter, light, bus) = adapter();
        light.fail_commands(true);
        let err = adapter.set_attribute(names::HUE, "1000").await.unwrap_err();
        assert!(matches!(err, DeviceError::Communication(_)));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_and_state_for_two_attributes() {
        let light = Arc::new(VirtualLight::new("Desk"));
        let bus = Arc::new(MemoryBus::new());
        let capabilities: CapabilitySet = vec![
            Arc::new(Switch) as Arc<dyn Capability>,
            Arc::new(Ranged::brightness()),
        ]
        .into_iter()
        .collect();
        let adapter = DeviceAdapter::new("Desk", "Hue/B/Device/Desk", light, capabilities, bus.clone());

        tokio_test::assert_ok!(adapter.publish_discovery().await);
        tokio_test::assert_ok!(adapter.publish_state().await);

        let published = bus.published();
        assert_eq!(published.len(), 4);
        assert!(published.iter().all(|m| m.retain));
        assert_eq!(published[0].topic, "New/Hue/B/Device/Desk/On");
        assert_eq!(published[0].payload_str(), "on bool : Turns the light on or off");
        assert_eq!(published[1].topic, "New/Hue/B/Device/Desk/Brightness");
        assert_eq!(published[2].topic, "Hue/B/Device/Desk/On");
        assert_eq!(published[2].payload_str(), "false");
        assert_eq!(published[3].topic, "Hue/B/Device/Desk/Brightness");
    }

    #[test]
    fn test_list_capabilities_is_restartable() {
        let (adapter, _, _) = adapter();
        let first = adapter.list_capabilities();
        let second = adapter.list_capabilities();
        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
    }
}
