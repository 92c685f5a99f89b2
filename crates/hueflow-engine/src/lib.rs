/*!
 * HueFlow Engine
 *
 * This crate drives a bridge: the lifecycle controller that puts its lights
 * on the bus and the coordinator that pairs with a new bridge.
 */

#![warn(missing_docs)]

pub mod error;
pub mod lifecycle;
pub mod pairing;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use lifecycle::BridgeController;
pub use pairing::{PairingCoordinator, PairingState};

/// HueFlow engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
