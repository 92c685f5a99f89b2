/*!
 * Capability descriptors.
 *
 * A capability is one attribute of a light exposed on the bus: it knows its
 * wire encoding, how to apply an incoming payload to a light, and how to
 * render the light's current state. Capabilities hold no state; the light
 * is passed in on every call.
 */
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::colors::{self, NO_COLOR};
use crate::device::{DeviceError, LightHandle, LightState, LightStateUpdate, Result};

/// Attribute names of the standard light capability set
pub mod names {
    /// Power
    pub const ON: &str = "On";
    /// Brightness
    pub const BRIGHTNESS: &str = "Brightness";
    /// Hue
    pub const HUE: &str = "Hue";
    /// Saturation
    pub const SATURATION: &str = "Saturation";
    /// Dynamic effect
    pub const EFFECT: &str = "Effect";
    /// CIE xy color
    pub const XY_COLOR: &str = "XY Color";
    /// Named color
    pub const COLOR_NAME: &str = "Color Name";
    /// Color temperature
    pub const COLOR_TEMP: &str = "Color Temp";
    /// Alert effect
    pub const ALERT: &str = "Alert";
    /// Color mode (read only)
    pub const COLOR_MODE: &str = "Color Mode";
}

/// What to republish after a successful apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Value for the attribute itself; `None` re-reads it from the device
    pub value: Option<String>,
    /// Other attributes changed as a side effect, with the same convention
    pub linked: Vec<(&'static str, Option<String>)>,
}

impl Applied {
    /// Republish by reading the attribute back from the device
    pub fn read_back() -> Self {
        Self::default()
    }

    /// Republish a known value without a device round trip
    pub fn literal<S: Into<String>>(value: S) -> Self {
        Self {
            value: Some(value.into()),
            linked: Vec::new(),
        }
    }

    /// Also republish another attribute
    pub fn with_linked(mut self, attribute: &'static str, value: Option<String>) -> Self {
        self.linked.push((attribute, value));
        self
    }
}

/// Self-describing summary of a capability, announced on discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityInfo {
    /// Attribute name
    pub name: &'static str,
    /// Expected payload shape
    pub param_spec: &'static str,
    /// What the attribute does
    pub description: &'static str,
}

impl CapabilityInfo {
    /// Discovery payload, `"<paramSpec> : <description>"`
    pub fn discovery_payload(&self) -> String {
        format!("{} : {}", self.param_spec, self.description)
    }
}

/// One attribute of a light
#[async_trait]
pub trait Capability: Send + Sync + Debug {
    /// Attribute name, unique within a device
    fn name(&self) -> &'static str;

    /// Expected payload shape
    fn param_spec(&self) -> &'static str;

    /// What the attribute does
    fn description(&self) -> &'static str;

    /// Whether the attribute accepts commands
    fn is_writable(&self) -> bool {
        true
    }

    /// Summary used for discovery
    fn info(&self) -> CapabilityInfo {
        CapabilityInfo {
            name: self.name(),
            param_spec: self.param_spec(),
            description: self.description(),
        }
    }

    /// Parse `payload`, validate it and send it to the light
    ///
    /// Applying the same payload twice leaves the light in the same state.
    async fn apply(&self, light: &dyn LightHandle, payload: &str) -> Result<Applied> {
        let _ = (light, payload);
        Err(DeviceError::unsupported(format!(
            "{} is read only",
            self.name()
        )))
    }

    /// Render the light's current state for this attribute
    async fn read(&self, light: &dyn LightHandle) -> Result<String>;
}

/// Parse a boolean payload: `true`/`false`, `1`/`0` or `t`/`f` in common casings
fn parse_bool(payload: &str) -> Result<bool> {
    match payload.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(DeviceError::validation(format!(
            "expected true or false, got {:?}",
            other
        ))),
    }
}

/// Parse an `x,y` payload; both coordinates must lie in [0, 1]
pub fn parse_xy(payload: &str) -> Result<[f32; 2]> {
    let parts: Vec<&str> = payload.split(',').collect();
    if parts.len() != 2 {
        return Err(DeviceError::validation(format!(
            "expected exactly two comma-separated values, got {:?}",
            payload
        )));
    }

    let mut xy = [0.0f32; 2];
    for (slot, part) in xy.iter_mut().zip(&parts) {
        let value: f32 = part.trim().parse().map_err(|_| {
            DeviceError::validation(format!("invalid coordinate {:?}", part.trim()))
        })?;
        if !(0.0..=1.0).contains(&value) {
            return Err(DeviceError::validation(format!(
                "coordinate {} out of range 0-1",
                value
            )));
        }
        *slot = value;
    }
    Ok(xy)
}

/// Power switch
#[derive(Debug, Clone, Copy, Default)]
pub struct Switch;

#[async_trait]
impl Capability for Switch {
    fn name(&self) -> &'static str {
        names::ON
    }

    fn param_spec(&self) -> &'static str {
        "on bool"
    }

    fn description(&self) -> &'static str {
        "Turns the light on or off"
    }

    async fn apply(&self, light: &dyn LightHandle, payload: &str) -> Result<Applied> {
        let on = parse_bool(payload)?;
        light.apply(LightStateUpdate::new().power(on)).await?;
        Ok(Applied::read_back())
    }

    async fn read(&self, light: &dyn LightHandle) -> Result<String> {
        Ok(light.state().await?.on.to_string())
    }
}

/// Numeric fields of a light state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    /// `bri`
    Brightness,
    /// `hue`
    Hue,
    /// `sat`
    Saturation,
    /// `ct`
    ColorTemp,
}

impl NumericField {
    fn get(self, state: &LightState) -> u32 {
        match self {
            NumericField::Brightness => u32::from(state.bri),
            NumericField::Hue => u32::from(state.hue),
            NumericField::Saturation => u32::from(state.sat),
            NumericField::ColorTemp => u32::from(state.ct),
        }
    }

    // Callers have range-checked `value` against bounds that fit the field.
    fn update(self, value: u32) -> LightStateUpdate {
        let mut update = LightStateUpdate::new().turn_on();
        match self {
            NumericField::Brightness => update.bri = Some(value as u8),
            NumericField::Hue => update.hue = Some(value as u16),
            NumericField::Saturation => update.sat = Some(value as u8),
            NumericField::ColorTemp => update.ct = Some(value as u16),
        }
        update
    }
}

/// Integer attribute with an inclusive range
///
/// Out-of-range values are rejected, never clamped.
#[derive(Debug, Clone, Copy)]
pub struct Ranged {
    name: &'static str,
    param_spec: &'static str,
    description: &'static str,
    field: NumericField,
    min: u32,
    max: u32,
}

impl Ranged {
    /// Brightness, 0-254
    pub const fn brightness() -> Self {
        Self {
            name: names::BRIGHTNESS,
            param_spec: "value uint8",
            description: "Sets the light brightness from 0-254",
            field: NumericField::Brightness,
            min: 0,
            max: 254,
        }
    }

    /// Hue, 0-65535
    pub const fn hue() -> Self {
        Self {
            name: names::HUE,
            param_spec: "value uint16",
            description: "Sets the hue to the specified value from 0-65535",
            field: NumericField::Hue,
            min: 0,
            max: 65535,
        }
    }

    /// Saturation, 0-254
    pub const fn saturation() -> Self {
        Self {
            name: names::SATURATION,
            param_spec: "value uint8",
            description: "Sets the saturation to the specified value from 0-254",
            field: NumericField::Saturation,
            min: 0,
            max: 254,
        }
    }

    /// Color temperature, 153-500 mireds
    pub const fn color_temp() -> Self {
        Self {
            name: names::COLOR_TEMP,
            param_spec: "value uint16",
            description: "Sets the mired color temperature from 153-500",
            field: NumericField::ColorTemp,
            min: 153,
            max: 500,
        }
    }

    /// Inclusive bounds
    pub fn range(&self) -> (u32, u32) {
        (self.min, self.max)
    }

    fn parse(&self, payload: &str) -> Result<u32> {
        let value: u32 = payload.trim().parse().map_err(|_| {
            DeviceError::validation(format!(
                "{} expects an unsigned integer, got {:?}",
                self.name, payload
            ))
        })?;
        if value < self.min || value > self.max {
            return Err(DeviceError::validation(format!(
                "{} value {} out of range {}-{}",
                self.name, value, self.min, self.max
            )));
        }
        Ok(value)
    }
}

#[async_trait]
impl Capability for Ranged {
    fn name(&self) -> &'static str {
        self.name
    }

    fn param_spec(&self) -> &'static str {
        self.param_spec
    }

    fn description(&self) -> &'static str {
        self.description
    }

    async fn apply(&self, light: &dyn LightHandle, payload: &str) -> Result<Applied> {
        let value = self.parse(payload)?;
        light.apply(self.field.update(value)).await?;
        Ok(Applied::read_back())
    }

    async fn read(&self, light: &dyn LightHandle) -> Result<String> {
        Ok(self.field.get(&light.state().await?).to_string())
    }
}

/// Text fields of a light state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    /// `effect`
    Effect,
    /// `alert`
    Alert,
}

/// Attribute taking one of a fixed set of keywords
#[derive(Debug, Clone, Copy)]
pub struct Choice {
    name: &'static str,
    param_spec: &'static str,
    description: &'static str,
    field: TextField,
    options: &'static [&'static str],
}

impl Choice {
    /// Dynamic effect
    pub const fn effect() -> Self {
        Self {
            name: names::EFFECT,
            param_spec: "effect string",
            description: "Sets the effect mode. Acceptable values are 'colorloop' or 'none'",
            field: TextField::Effect,
            options: &["none", "colorloop"],
        }
    }

    /// Alert effect
    pub const fn alert() -> Self {
        Self {
            name: names::ALERT,
            param_spec: "selected string",
            description: "Sets the light alert state. Valid values are 'select', 'lselect' or 'none'",
            field: TextField::Alert,
            options: &["none", "select", "lselect"],
        }
    }

    /// Accepted keywords
    pub fn options(&self) -> &'static [&'static str] {
        self.options
    }
}

#[async_trait]
impl Capability for Choice {
    fn name(&self) -> &'static str {
        self.name
    }

    fn param_spec(&self) -> &'static str {
        self.param_spec
    }

    fn description(&self) -> &'static str {
        self.description
    }

    async fn apply(&self, light: &dyn LightHandle, payload: &str) -> Result<Applied> {
        let value = payload.trim().to_ascii_lowercase();
        if !self.options.contains(&value.as_str()) {
            return Err(DeviceError::validation(format!(
                "{} expects one of {:?}, got {:?}",
                self.name, self.options, payload
            )));
        }

        let mut update = LightStateUpdate::new().turn_on();
        match self.field {
            TextField::Effect => update.effect = Some(value),
            TextField::Alert => update.alert = Some(value),
        }
        light.apply(update).await?;
        Ok(Applied::read_back())
    }

    async fn read(&self, light: &dyn LightHandle) -> Result<String> {
        let state = light.state().await?;
        Ok(match self.field {
            TextField::Effect => state.effect,
            TextField::Alert => state.alert,
        })
    }
}

/// CIE xy color
///
/// Setting coordinates directly invalidates any named color, so the
/// `Color Name` attribute is republished as `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct XyColor;

#[async_trait]
impl Capability for XyColor {
    fn name(&self) -> &'static str {
        names::XY_COLOR
    }

    fn param_spec(&self) -> &'static str {
        "x,y float"
    }

    fn description(&self) -> &'static str {
        "Sets the light to the `x,y` position on the CIE color spectrum"
    }

    async fn apply(&self, light: &dyn LightHandle, payload: &str) -> Result<Applied> {
        let xy = parse_xy(payload)?;
        let update = LightStateUpdate {
            xy: Some(xy),
            ..LightStateUpdate::new().turn_on()
        };
        light.apply(update).await?;
        Ok(Applied::read_back().with_linked(names::COLOR_NAME, Some(NO_COLOR.to_string())))
    }

    async fn read(&self, light: &dyn LightHandle) -> Result<String> {
        Ok(colors::format_xy(light.state().await?.xy))
    }
}

/// Predefined color by name
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorName;

#[async_trait]
impl Capability for ColorName {
    fn name(&self) -> &'static str {
        names::COLOR_NAME
    }

    fn param_spec(&self) -> &'static str {
        "name string"
    }

    fn description(&self) -> &'static str {
        "Sets the light to the predefined color"
    }

    async fn apply(&self, light: &dyn LightHandle, payload: &str) -> Result<Applied> {
        let name = payload.trim();
        if name.is_empty() || name == NO_COLOR {
            debug!("Clearing color name on {}", light.id());
            return Ok(Applied::literal(NO_COLOR));
        }

        let color = colors::lookup(name)
            .ok_or_else(|| DeviceError::validation(format!("unknown color name {:?}", name)))?;

        let update = LightStateUpdate {
            xy: Some(color.xy),
            ..LightStateUpdate::new().turn_on()
        };
        light.apply(update).await?;

        Ok(Applied::literal(color.name)
            .with_linked(names::XY_COLOR, Some(colors::format_xy(color.xy))))
    }

    // A name cannot be recovered from coordinates.
    async fn read(&self, _light: &dyn LightHandle) -> Result<String> {
        Ok(NO_COLOR.to_string())
    }
}

/// Mode last used to set the color; read only
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorMode;

#[async_trait]
impl Capability for ColorMode {
    fn name(&self) -> &'static str {
        names::COLOR_MODE
    }

    fn param_spec(&self) -> &'static str {
        "read only"
    }

    fn description(&self) -> &'static str {
        "Specifies the last mode used for choosing colors. Values are 'hs' for Hue and Saturation, 'xy' for XY and 'ct' for Color Temperature."
    }

    fn is_writable(&self) -> bool {
        false
    }

    async fn read(&self, light: &dyn LightHandle) -> Result<String> {
        Ok(light.state().await?.color_mode)
    }
}

/// Ordered set of capabilities keyed by attribute name
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    entries: Vec<Arc<dyn Capability>>,
    index: HashMap<&'static str, usize>,
}

impl CapabilitySet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// The full set exposed for every color light
    pub fn standard() -> Self {
        let mut set = Self::new();
        set.insert(Arc::new(Switch));
        set.insert(Arc::new(Ranged::brightness()));
        set.insert(Arc::new(Ranged::hue()));
        set.insert(Arc::new(Ranged::saturation()));
        set.insert(Arc::new(Choice::effect()));
        set.insert(Arc::new(XyColor));
        set.insert(Arc::new(ColorName));
        set.insert(Arc::new(Ranged::color_temp()));
        set.insert(Arc::new(Choice::alert()));
        set.insert(Arc::new(ColorMode));
        set
    }

    /// Add a capability; returns false if the name is already taken
    pub fn insert(&mut self, capability: Arc<dyn Capability>) -> bool {
        let name = capability.name();
        if self.index.contains_key(name) {
            return false;
        }
        self.index.insert(name, self.entries.len());
        self.entries.push(capability);
        true
    }

    /// Look up a capability by attribute name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Capabilities in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Capability>> {
        self.entries.iter()
    }

    /// Number of capabilities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Arc<dyn Capability>> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Capability>>>(iter: I) -> Self {
        let mut set = Self::new();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}
