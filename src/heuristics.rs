use crate::geometry::Rect;

/// Tunable constants behind the sizing and placement approximations.
///
/// None of these come from font metrics. They assume roughly Latin-width
/// glyphs and will misplace text in CJK or proportional-heavy scripts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heuristics {
    /// Font size as a fraction of region height.
    pub font_size_ratio: f64,
    /// Target characters per unit of aspect ratio (width / height).
    pub text_length_ratio: f64,
    /// Average glyph advance as a fraction of the font size.
    pub glyph_width_ratio: f64,
    /// Baseline offset below the em box top, as a fraction of the font size.
    pub baseline_ratio: f64,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            font_size_ratio: 0.75,
            text_length_ratio: 1.25,
            glyph_width_ratio: 0.5,
            baseline_ratio: 0.75,
        }
    }
}

impl Heuristics {
    pub fn font_size(&self, height: u32) -> u32 {
        (height as f64 * self.font_size_ratio).floor() as u32
    }

    pub fn target_text_length(&self, rect: &Rect) -> usize {
        if rect.height == 0 {
            return 0;
        }
        let aspect = rect.width as f64 / rect.height as f64;
        (aspect * self.text_length_ratio).round() as usize
    }

    pub fn estimated_text_width(&self, font_size: u32, text: &str) -> f64 {
        font_size as f64 * text.chars().count() as f64 * self.glyph_width_ratio
    }
}
