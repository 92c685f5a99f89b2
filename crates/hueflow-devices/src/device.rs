/*!
 * Light handle trait and core device abstractions.
 *
 * This module defines the error type shared by every device-facing
 * component, the light state model reported by a bridge, and the
 * [`LightHandle`] trait through which capabilities talk to a light.
 */
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hueflow_core::error::Error as CoreError;

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The command payload could not be parsed or is out of range
    #[error("Validation error: {0}")]
    Validation(String),

    /// The transport failed while carrying out a valid command
    #[error("Device communication error: {0}")]
    Communication(String),

    /// The bridge could not be reached
    #[error("Unable to connect to bridge: {0}")]
    Connect(String),

    /// The bridge rejected the supplied credential
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The link button has not been pressed yet
    #[error("Not authorized yet: press the link button on the bridge")]
    NotAuthorizedYet,

    /// No device with this identifier is registered
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// The device has no attribute with this name
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// The attribute does not accept commands
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A device with this identifier is already registered
    #[error("Device already registered: {0}")]
    DuplicateDevice(String),

    /// The message bus rejected an operation
    #[error("Message bus error: {0}")]
    Bus(String),

    /// A lock guarding shared state was poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a new validation error
    pub fn validation<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Validation(msg.as_ref().to_string())
    }

    /// Create a new communication error
    pub fn communication<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Communication(msg.as_ref().to_string())
    }

    /// Create a new bus error
    pub fn bus<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Bus(msg.as_ref().to_string())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::UnsupportedOperation(msg.as_ref().to_string())
    }
}

/// State of a light as reported by the bridge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    /// Whether the light is on
    #[serde(default)]
    pub on: bool,
    /// Brightness, 0-254
    #[serde(default)]
    pub bri: u8,
    /// Hue, 0-65535
    #[serde(default)]
    pub hue: u16,
    /// Saturation, 0-254
    #[serde(default)]
    pub sat: u8,
    /// Dynamic effect ("none" or "colorloop")
    #[serde(default)]
    pub effect: String,
    /// CIE xy color coordinates
    #[serde(default)]
    pub xy: [f32; 2],
    /// Color temperature in mireds
    #[serde(default)]
    pub ct: u16,
    /// Alert effect ("none", "select" or "lselect")
    #[serde(default)]
    pub alert: String,
    /// Mode last used to set the color ("hs", "xy" or "ct")
    #[serde(default, rename = "colormode")]
    pub color_mode: String,
    /// Whether the bridge can currently reach the light
    #[serde(default)]
    pub reachable: bool,
}

/// A partial state change sent to a light
///
/// Only the fields that are set are transmitted, which matches the body of a
/// Hue `PUT /lights/<id>/state` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LightStateUpdate {
    /// Switch the light on or off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    /// Brightness
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    /// Hue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    /// Saturation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    /// Effect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    /// CIE xy coordinates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xy: Option<[f32; 2]>,
    /// Color temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,
    /// Alert
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
}

impl LightStateUpdate {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the power state
    pub fn power(mut self, on: bool) -> Self {
        self.on = Some(on);
        self
    }

    /// Turn the light on as part of this update
    pub fn turn_on(self) -> Self {
        self.power(true)
    }

    /// Whether the update changes nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the update to a locally held state
    ///
    /// Mirrors what a bridge does, including the color mode switch that
    /// follows a hue/saturation, xy or color temperature change.
    pub fn apply_to(&self, state: &mut LightState) {
        if let Some(on) = self.on {
            state.on = on;
        }
        if let Some(bri) = self.bri {
            state.bri = bri;
        }
        if let Some(hue) = self.hue {
            state.hue = hue;
            state.color_mode = "hs".to_string();
        }
        if let Some(sat) = self.sat {
            state.sat = sat;
            state.color_mode = "hs".to_string();
        }
        if let Some(effect) = &self.effect {
            state.effect = effect.clone();
        }
        if let Some(xy) = self.xy {
            state.xy = xy;
            state.color_mode = "xy".to_string();
        }
        if let Some(ct) = self.ct {
            state.ct = ct;
            state.color_mode = "ct".to_string();
        }
        if let Some(alert) = &self.alert {
            state.alert = alert.clone();
        }
    }
}

/// Live handle to one light behind a bridge
///
/// Implementations talk to the transport on every call; state is never
/// cached by the handle, so a read after a write reflects what the
/// device reports.
#[async_trait]
pub trait LightHandle: Send + Sync + Debug {
    /// Stable identifier of the light (its name on the bridge)
    fn id(&self) -> &str;

    /// Read the current state from the device
    async fn state(&self) -> Result<LightState>;

    /// Send a state change to the device
    async fn apply(&self, update: LightStateUpdate) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_serializes_only_set_fields() {
        let update = LightStateUpdate {
            sat: Some(100),
            ..LightStateUpdate::new().turn_on()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "on": true, "sat": 100 }));
    }

    #[test]
    fn test_update_switches_color_mode() {
        let mut state = LightState {
            color_mode: "hs".to_string(),
            ..LightState::default()
        };

        LightStateUpdate {
            xy: Some([0.3, 0.4]),
            ..Default::default()
        }
        .apply_to(&mut state);
        assert_eq!(state.color_mode, "xy");
        assert_eq!(state.xy, [0.3, 0.4]);

        LightStateUpdate {
            ct: Some(300),
            ..Default::default()
        }
        .apply_to(&mut state);
        assert_eq!(state.color_mode, "ct");
    }

    #[test]
    fn test_state_deserializes_bridge_json() {
        let state: LightState = serde_json::from_str(
            r#"{"on":true,"bri":144,"hue":13088,"sat":212,"effect":"none",
                "xy":[0.5128,0.4147],"ct":467,"alert":"none","colormode":"xy","reachable":true}"#,
        )
        .unwrap();
        assert!(state.on);
        assert_eq!(state.bri, 144);
        assert_eq!(state.color_mode, "xy");
        assert_eq!(state.xy, [0.5128, 0.4147]);
    }

    #[test]
    fn test_empty_update() {
        assert!(LightStateUpdate::new().is_empty());
        assert!(!LightStateUpdate::new().power(false).is_empty());
    }
}
