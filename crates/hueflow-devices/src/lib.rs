/*!
 * HueFlow Devices
 *
 * This crate exposes lights as topic-addressable attributes: capability
 * descriptors, the per-light device adapter, the bridge registry that
 * routes commands, and the transports that reach bridges and the bus.
 */

#![warn(missing_docs)]

pub mod adapter;
pub mod bus;
pub mod capability;
pub mod colors;
pub mod device;
pub mod protocol;
pub mod protocols;
pub mod registry;
pub mod topic;

pub use adapter::DeviceAdapter;
pub use bus::{BusMessage, MessageBus, MessageHandler};
pub use capability::{Capability, CapabilityInfo, CapabilitySet};
pub use device::{DeviceError, LightHandle, LightState, LightStateUpdate, Result};
pub use protocol::{BridgeConnector, BridgeSession};
pub use registry::BridgeRegistry;

/// HueFlow devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> std::result::Result<(), hueflow_core::error::Error> {
    tracing::info!(
        "HueFlow Devices {} initialized with transports: {}",
        VERSION,
        available_protocols().join(", ")
    );
    Ok(())
}

/// Transports compiled into this build
pub fn available_protocols() -> Vec<&'static str> {
    let mut protocols = vec!["virtual"];

    #[cfg(feature = "mqtt")]
    protocols.push("mqtt");

    #[cfg(feature = "hue-http")]
    protocols.push("hue-http");

    protocols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_protocols() {
        let protocols = available_protocols();
        assert_eq!(protocols[0], "virtual");
        assert_eq!(protocols.contains(&"mqtt"), cfg!(feature = "mqtt"));
        assert_eq!(protocols.contains(&"hue-http"), cfg!(feature = "hue-http"));
    }
}
