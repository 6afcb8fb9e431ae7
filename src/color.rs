//! Region color sampling and overlay color derivation.
//!
//! The overlay color is a pure channel inversion of the region's mean color,
//! so a mid gray such as (128, 128, 128) maps to (127, 127, 127).

use image::{GenericImageView, Pixel};
use serde_json::{Value, json};
use std::fmt;

use crate::error::{LayoutError, Result};
use crate::geometry::Rect;

/// Marker written for colors that have not been generated yet.
pub const UNRESOLVED_MARKER: &str = "[R, G, B]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn complement(self) -> Self {
        Self {
            r: 255 - self.r,
            g: 255 - self.g,
            b: 255 - self.b,
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Accepts `#rrggbb`, `#rgb`, `rgb(r, g, b)` and `[r, g, b]`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(hex) = value.strip_prefix('#') {
            return parse_hex(hex);
        }
        let inner = value
            .strip_prefix("rgb(")
            .and_then(|rest| rest.strip_suffix(')'))
            .or_else(|| {
                value
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
            })?;
        let channels = inner
            .split(',')
            .map(|part| part.trim().parse::<u8>().ok())
            .collect::<Option<Vec<_>>>()?;
        match channels.as_slice() {
            [r, g, b] => Some(Self::new(*r, *g, *b)),
            _ => None,
        }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

fn parse_hex(hex: &str) -> Option<Rgb> {
    let digits = match hex.len() {
        6 => hex.to_string(),
        3 => hex.chars().flat_map(|ch| [ch, ch]).collect(),
        _ => return None,
    };
    let channel = |idx: usize| u8::from_str_radix(digits.get(idx..idx + 2)?, 16).ok();
    Some(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
}

pub fn complement(rgb: Rgb) -> Rgb {
    rgb.complement()
}

/// Color slot of a text element: either still waiting for generation or a
/// concrete RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorValue {
    #[default]
    Unresolved,
    Resolved(Rgb),
}

impl ColorValue {
    pub fn resolved(&self) -> Option<Rgb> {
        match self {
            ColorValue::Resolved(rgb) => Some(*rgb),
            ColorValue::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ColorValue::Resolved(_))
    }

    /// Unresolved colors keep the placeholder string; resolved ones become
    /// a numeric `[r, g, b]` array.
    pub fn to_json(&self) -> Value {
        match self {
            ColorValue::Unresolved => Value::String(UNRESOLVED_MARKER.to_string()),
            ColorValue::Resolved(rgb) => json!([rgb.r, rgb.g, rgb.b]),
        }
    }

    pub fn from_json(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Null => Ok(ColorValue::Unresolved),
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() || trimmed == UNRESOLVED_MARKER {
                    return Ok(ColorValue::Unresolved);
                }
                Rgb::parse(trimmed)
                    .map(ColorValue::Resolved)
                    .ok_or_else(|| format!("unrecognised color '{}'", text))
            }
            Value::Array(items) => {
                let channels = items
                    .iter()
                    .map(|item| item.as_u64().filter(|channel| *channel <= 255))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| "color channels must be integers in 0..=255".to_string())?;
                match channels.as_slice() {
                    [r, g, b] => Ok(ColorValue::Resolved(Rgb::new(
                        *r as u8, *g as u8, *b as u8,
                    ))),
                    _ => Err(format!(
                        "color must have 3 channels (got {})",
                        channels.len()
                    )),
                }
            }
            other => Err(format!("unsupported color value {}", other)),
        }
    }
}

impl From<Rgb> for ColorValue {
    fn from(rgb: Rgb) -> Self {
        ColorValue::Resolved(rgb)
    }
}

/// Per-channel arithmetic mean over the pixels of `rect`, truncated.
/// Alpha is ignored. The rectangle must be non-empty and inside the image.
pub fn mean_color<I>(image: &I, rect: &Rect) -> Result<Rgb>
where
    I: GenericImageView,
    I::Pixel: Pixel<Subpixel = u8>,
{
    let (width, height) = image.dimensions();
    rect.ensure_within(width, height)?;

    let mut sums = [0u64; 3];
    for y in rect.top..rect.bottom() {
        for x in rect.left..rect.right() {
            let rgb = image.get_pixel(x, y).to_rgb();
            for (sum, channel) in sums.iter_mut().zip(rgb.0) {
                *sum += channel as u64;
            }
        }
    }
    let count = rect.area();
    Ok(Rgb::new(
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
    ))
}

/// Mean color of the region, inverted.
pub fn contrasting_color<I>(image: &I, rect: &Rect) -> Result<Rgb>
where
    I: GenericImageView,
    I::Pixel: Pixel<Subpixel = u8>,
{
    mean_color(image, rect).map(complement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb as Px, RgbImage, Rgba, RgbaImage};

    #[test]
    fn complement_is_an_involution() {
        for rgb in [
            Rgb::new(0, 0, 0),
            Rgb::new(255, 255, 255),
            Rgb::new(12, 200, 77),
            Rgb::new(128, 128, 128),
        ] {
            assert_eq!(complement(complement(rgb)), rgb);
        }
    }

    #[test]
    fn mean_of_uniform_region_is_exact() {
        let image = RgbImage::from_pixel(200, 100, Px([200, 200, 200]));
        let mean = mean_color(&image, &Rect::new(10, 10, 100, 40)).unwrap();
        assert_eq!(mean, Rgb::new(200, 200, 200));
        assert_eq!(mean.complement(), Rgb::new(55, 55, 55));
    }

    #[test]
    fn mean_truncates_and_only_covers_region() {
        let mut image = RgbImage::from_pixel(4, 1, Px([0, 0, 0]));
        image.put_pixel(0, 0, Px([10, 0, 255]));
        image.put_pixel(1, 0, Px([11, 1, 0]));
        image.put_pixel(3, 0, Px([255, 255, 255]));
        let mean = mean_color(&image, &Rect::new(0, 0, 2, 1)).unwrap();
        assert_eq!(mean, Rgb::new(10, 0, 127));
    }

    #[test]
    fn mean_ignores_alpha() {
        let image = RgbaImage::from_pixel(3, 3, Rgba([30, 60, 90, 0]));
        let mean = mean_color(&image, &Rect::new(0, 0, 3, 3)).unwrap();
        assert_eq!(mean, Rgb::new(30, 60, 90));
    }

    #[test]
    fn mean_rejects_out_of_bounds_region() {
        let image = RgbImage::new(10, 10);
        assert!(matches!(
            mean_color(&image, &Rect::new(5, 5, 10, 1)),
            Err(LayoutError::Geometry { .. })
        ));
        assert!(mean_color(&image, &Rect::new(0, 0, 0, 1)).is_err());
    }

    #[test]
    fn parses_common_color_notations() {
        assert_eq!(Rgb::parse("#ff0000"), Some(Rgb::new(255, 0, 0)));
        assert_eq!(Rgb::parse("#0f0"), Some(Rgb::new(0, 255, 0)));
        assert_eq!(Rgb::parse("rgb(1, 2, 3)"), Some(Rgb::new(1, 2, 3)));
        assert_eq!(Rgb::parse("[4,5,6]"), Some(Rgb::new(4, 5, 6)));
        assert_eq!(Rgb::parse("[R, G, B]"), None);
        assert_eq!(Rgb::parse("#12345"), None);
    }

    #[test]
    fn color_value_json_keeps_placeholder_distinct() {
        assert_eq!(ColorValue::Unresolved.to_json(), json!("[R, G, B]"));
        assert_eq!(
            ColorValue::from_json(&json!("[R, G, B]")).unwrap(),
            ColorValue::Unresolved
        );
        let resolved = ColorValue::Resolved(Rgb::new(55, 55, 55));
        assert_eq!(resolved.to_json(), json!([55, 55, 55]));
        assert_eq!(ColorValue::from_json(&resolved.to_json()).unwrap(), resolved);
        assert_eq!(
            ColorValue::from_json(&json!("[10, 20, 30]")).unwrap(),
            ColorValue::Resolved(Rgb::new(10, 20, 30))
        );
        assert!(ColorValue::from_json(&json!([1, 2])).is_err());
        assert!(ColorValue::from_json(&json!([1, 2, 300])).is_err());
        assert!(ColorValue::from_json(&json!(42)).is_err());
    }
}
