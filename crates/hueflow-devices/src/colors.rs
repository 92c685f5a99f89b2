//! Named colors and their CIE xy coordinates.

/// A named point in the CIE xy color space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NamedColor {
    /// Canonical name, as accepted on the `Color Name` topic
    pub name: &'static str,
    /// xy coordinates
    pub xy: [f32; 2],
}

/// Sentinel meaning "no named color"
pub const NO_COLOR: &str = "None";

// Coordinates for the gamut B bulbs
static NAMED_COLORS: &[NamedColor] = &[
    NamedColor { name: "Red", xy: [0.6915, 0.3083] },
    NamedColor { name: "Yellow", xy: [0.4023, 0.4725] },
    NamedColor { name: "Orange", xy: [0.4693, 0.4007] },
    NamedColor { name: "Green", xy: [0.17, 0.7] },
    NamedColor { name: "Cyan", xy: [0.161, 0.3549] },
    NamedColor { name: "Blue", xy: [0.153, 0.048] },
    NamedColor { name: "Purple", xy: [0.2363, 0.1154] },
    NamedColor { name: "Pink", xy: [0.3645, 0.15] },
    NamedColor { name: "White", xy: [0.3227, 0.329] },
];

/// Look up a color by its exact name
pub fn lookup(name: &str) -> Option<&'static NamedColor> {
    NAMED_COLORS.iter().find(|color| color.name == name)
}

/// All known colors, in table order
pub fn all() -> &'static [NamedColor] {
    NAMED_COLORS
}

/// Render an xy pair as its wire form, `x,y` in shortest decimal notation
pub fn format_xy(xy: [f32; 2]) -> String {
    format!("{},{}", xy[0], xy[1])
}
