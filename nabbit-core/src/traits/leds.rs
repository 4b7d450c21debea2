//! LED strip value types
//!
//! The robot has five RGB LEDs. Their strip order is also the index map
//! used by choreographies.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of LEDs on the strip
pub const LED_COUNT: usize = 5;

/// One LED, numbered in strip order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Led {
    Bottom = 0,
    Right = 1,
    Center = 2,
    Left = 3,
    Nose = 4,
}

impl Led {
    /// All LEDs in strip order
    pub const ALL: [Led; LED_COUNT] = [Led::Bottom, Led::Right, Led::Center, Led::Left, Led::Nose];

    /// LED from its strip index
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Strip index
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name used in `info` animation color slots
    pub const fn as_str(self) -> &'static str {
        match self {
            Led::Bottom => "bottom",
            Led::Right => "right",
            Led::Center => "center",
            Led::Left => "left",
            Led::Nose => "nose",
        }
    }
}

/// 24-bit color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Error parsing a hex color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RgbParseError;

impl core::fmt::Display for RgbParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("invalid color, expected RRGGBB hex")
    }
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const FUCHSIA: Rgb = Rgb::new(255, 0, 255);

    /// Create a color from its components
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Check if the color is black
    pub fn is_off(&self) -> bool {
        *self == Rgb::OFF
    }

    /// Parse `RRGGBB`, with or without a leading `#`
    pub fn parse_hex(s: &str) -> Result<Self, RgbParseError> {
        let s = s.strip_prefix('#').unwrap_or(s);
        if s.len() != 6 || !s.is_ascii() {
            return Err(RgbParseError);
        }
        let byte = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| RgbParseError);
        Ok(Rgb::new(byte(0)?, byte(2)?, byte(4)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_led_index_map() {
        assert_eq!(Led::from_index(0), Some(Led::Bottom));
        assert_eq!(Led::from_index(3), Some(Led::Left));
        assert_eq!(Led::from_index(4), Some(Led::Nose));
        assert_eq!(Led::from_index(5), None);
        assert_eq!(Led::Center.index(), 2);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(Rgb::parse_hex("ff00ff"), Ok(Rgb::FUCHSIA));
        assert_eq!(Rgb::parse_hex("#0a0B0c"), Ok(Rgb::new(10, 11, 12)));
        assert_eq!(Rgb::parse_hex("fff"), Err(RgbParseError));
        assert_eq!(Rgb::parse_hex("zz0000"), Err(RgbParseError));
    }
}
