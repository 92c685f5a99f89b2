/*!
 * Bridge transport definitions for HueFlow.
 *
 * This module provides the traits a device transport implements: a
 * [`BridgeConnector`] opens a [`BridgeSession`] to a bridge at a network
 * address, and the session authenticates, pairs and enumerates lights.
 */
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::device::{LightHandle, Result};

/// Opens sessions to bridges
#[async_trait]
pub trait BridgeConnector: Send + Sync + Debug {
    /// Get the transport name
    fn name(&self) -> &'static str;

    /// Open a session with the bridge at `address`
    ///
    /// Fails with [`DeviceError::Connect`](crate::DeviceError::Connect) when the
    /// bridge cannot be reached.
    async fn connect(&self, address: &str) -> Result<Arc<dyn BridgeSession>>;
}

/// An open session with one bridge
#[async_trait]
pub trait BridgeSession: Send + Sync + Debug {
    /// Network address the session was opened with
    fn address(&self) -> &str;

    /// Human readable bridge name, used as a topic segment
    fn friendly_name(&self) -> &str;

    /// Authenticate the session with a previously paired token
    async fn authenticate(&self, token: &str) -> Result<()>;

    /// Ask the bridge to whitelist a new client and return its token
    ///
    /// Fails with [`DeviceError::NotAuthorizedYet`](crate::DeviceError::NotAuthorizedYet)
    /// until the link button has been pressed.
    async fn create_user(&self, device_type: &str) -> Result<String>;

    /// Enumerate all lights known to the bridge
    async fn lights(&self) -> Result<Vec<Arc<dyn LightHandle>>>;
}

/// Transport utilities
pub mod util {
    /// Base URL for a bridge address
    ///
    /// Bare hosts get an `http://` scheme; trailing slashes are removed.
    pub fn base_url(address: &str) -> String {
        let address = address.trim().trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }

    /// Client identifier sent to the bridge when pairing
    ///
    /// Bridges cap the identifier at 40 characters.
    pub fn client_identifier(application: &str, timestamp: i64) -> String {
        let mut id = format!("{}#{}", application, timestamp);
        if let Some((end, _)) = id.char_indices().nth(40) {
            id.truncate(end);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::util::*;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("192.168.1.20"), "http://192.168.1.20");
        assert_eq!(base_url("192.168.1.20:8080/"), "http://192.168.1.20:8080");
        assert_eq!(base_url("https://bridge.local"), "https://bridge.local");
    }

    #[test]
    fn test_client_identifier() {
        assert_eq!(client_identifier("hueflow", 1700000000), "hueflow#1700000000");
        let long = client_identifier(&"x".repeat(60), 1);
        assert_eq!(long.len(), 40);

        let accented = client_identifier(&"é".repeat(45), 1);
        assert_eq!(accented.chars().count(), 40);
        assert!(accented.chars().all(|c| c == 'é'));
    }
}
