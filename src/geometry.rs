use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LayoutError, Result};

/// Axis-aligned region in pixel units, relative to the image's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Fails unless the rectangle has positive size and lies fully inside
    /// an image of `image_width` x `image_height`.
    pub fn ensure_within(&self, image_width: u32, image_height: u32) -> Result<()> {
        if self.is_empty() {
            return Err(LayoutError::geometry(*self, "rectangle has zero area"));
        }
        if self.right() > image_width || self.bottom() > image_height {
            return Err(LayoutError::geometry(
                *self,
                format!(
                    "rectangle exceeds image bounds {}x{}",
                    image_width, image_height
                ),
            ));
        }
        Ok(())
    }

    /// Intersection with the image area, `None` when nothing is left.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<Rect> {
        let left = self.left.min(image_width);
        let top = self.top.min(image_height);
        let right = self.right().min(image_width);
        let bottom = self.bottom().min(image_height);
        if right <= left || bottom <= top {
            return None;
        }
        Some(Rect::new(left, top, right - left, bottom - top))
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(left={}, top={}, width={}, height={})",
            self.left, self.top, self.width, self.height
        )
    }
}

/// Rectangle as submitted by a drawing client. Canvas libraries report
/// fractional and sometimes negative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl RawRect {
    /// Round to whole pixels and clamp to the image. Anything that ends up
    /// empty is a geometry error.
    pub fn normalize(&self, image_width: u32, image_height: u32) -> Result<Rect> {
        let values = [self.left, self.top, self.width, self.height];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(LayoutError::geometry(
                self.lossy(),
                "coordinates must be finite numbers",
            ));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(LayoutError::geometry(
                self.lossy(),
                "width and height must be positive",
            ));
        }

        let x1 = self.left.round().max(0.0);
        let y1 = self.top.round().max(0.0);
        let x2 = (self.left + self.width).round().min(image_width as f64);
        let y2 = (self.top + self.height).round().min(image_height as f64);
        if x2 <= x1 || y2 <= y1 {
            return Err(LayoutError::geometry(
                self.lossy(),
                format!(
                    "rectangle lies outside image bounds {}x{}",
                    image_width, image_height
                ),
            ));
        }
        Ok(Rect::new(
            x1 as u32,
            y1 as u32,
            (x2 - x1) as u32,
            (y2 - y1) as u32,
        ))
    }

    fn lossy(&self) -> Rect {
        let clip = |value: f64| {
            if value.is_finite() {
                value.round().clamp(0.0, u32::MAX as f64) as u32
            } else {
                0
            }
        };
        Rect::new(
            clip(self.left),
            clip(self.top),
            clip(self.width),
            clip(self.height),
        )
    }
}

impl From<Rect> for RawRect {
    fn from(rect: Rect) -> Self {
        Self {
            left: rect.left as f64,
            top: rect.top as f64,
            width: rect.width as f64,
            height: rect.height as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_within_accepts_rect_touching_edges() {
        Rect::new(0, 0, 100, 50).ensure_within(100, 50).unwrap();
    }

    #[test]
    fn ensure_within_rejects_zero_area_and_overflow() {
        assert!(matches!(
            Rect::new(0, 0, 0, 10).ensure_within(100, 100),
            Err(LayoutError::Geometry { .. })
        ));
        assert!(matches!(
            Rect::new(90, 0, 20, 10).ensure_within(100, 100),
            Err(LayoutError::Geometry { .. })
        ));
    }

    #[test]
    fn clamp_to_trims_overhang() {
        let rect = Rect::new(80, 40, 50, 50);
        assert_eq!(rect.clamp_to(100, 60), Some(Rect::new(80, 40, 20, 20)));
        assert_eq!(Rect::new(120, 0, 5, 5).clamp_to(100, 60), None);
    }

    #[test]
    fn raw_rect_rounds_and_clamps() {
        let raw = RawRect {
            left: -4.6,
            top: 10.4,
            width: 60.2,
            height: 20.0,
        };
        assert_eq!(raw.normalize(50, 100).unwrap(), Rect::new(0, 10, 50, 20));
    }

    #[test]
    fn raw_rect_outside_image_is_geometry_error() {
        let raw = RawRect {
            left: 300.0,
            top: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let err = raw.normalize(100, 100).unwrap_err();
        assert!(matches!(err, LayoutError::Geometry { .. }));
    }

    #[test]
    fn raw_rect_rejects_non_finite() {
        let raw = RawRect {
            left: f64::NAN,
            top: 0.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(raw.normalize(100, 100).is_err());
    }
}
