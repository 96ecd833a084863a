use serde::{Deserialize, Serialize};
use std::fmt;

/// Straight (non-premultiplied) RGBA color with components in [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn from_rgba8(px: [u8; 4]) -> Self {
        Self::rgba(
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        )
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Result<Self, ColorError> {
        let hex = hex.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(ColorError::InvalidHex(hex.to_string()));
        }
        let byte = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| ColorError::InvalidHex(hex.to_string()))
        };
        match hex.len() {
            6 => Ok(Self::from_rgba8([byte(0)?, byte(2)?, byte(4)?, 255])),
            8 => Ok(Self::from_rgba8([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
            _ => Err(ColorError::InvalidHex(hex.to_string())),
        }
    }

    pub fn to_rgba8(&self) -> [u8; 4] {
        [
            (self.r * 255.0).round().clamp(0.0, 255.0) as u8,
            (self.g * 255.0).round().clamp(0.0, 255.0) as u8,
            (self.b * 255.0).round().clamp(0.0, 255.0) as u8,
            (self.a * 255.0).round().clamp(0.0, 255.0) as u8,
        ]
    }

    /// The same color with alpha forced to 1.0.
    pub fn opaque(self) -> Self {
        Self { a: 1.0, ..self }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.to_rgba8();
        if a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", r, g, b, a)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ColorError {
    #[error("invalid hex color string: {0:?}")]
    InvalidHex(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_from_hex_rgb() {
        let c = Color::from_hex("#FF8800").unwrap();
        assert_eq!(c.to_rgba8(), [255, 136, 0, 255]);
    }

    #[test]
    fn test_color_from_hex_rgba() {
        let c = Color::from_hex("ff880080").unwrap();
        assert_eq!(c.to_rgba8(), [255, 136, 0, 128]);
    }

    #[test]
    fn test_color_from_hex_invalid() {
        assert!(Color::from_hex("invalid").is_err());
        assert!(Color::from_hex("#GG0000").is_err());
        assert!(Color::from_hex("#ééé").is_err());
    }

    #[test]
    fn test_opaque_drops_alpha() {
        let c = Color::rgba(0.2, 0.4, 0.6, 0.1).opaque();
        assert_eq!(c.a, 1.0);
        assert_eq!(format!("{}", c), "#336699");
    }
}
