/*!
 * Transport and bus implementations for HueFlow.
 *
 * The in-memory implementations are always available; the network ones sit
 * behind the `mqtt` and `hue-http` features.
 */

pub mod memory;
pub mod virtual_bridge;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "hue-http")]
pub mod hue_http;

pub use memory::MemoryBus;
pub use virtual_bridge::{VirtualBridge, VirtualLight, VirtualSession};

#[cfg(feature = "mqtt")]
pub use mqtt::MqttBus;

#[cfg(feature = "hue-http")]
pub use hue_http::{HttpConnector, HttpLight, HttpSession};
