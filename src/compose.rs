use image::{DynamicImage, RgbImage};
use std::io::Cursor;
use std::sync::{Arc, OnceLock};
use tracing::debug;
use usvg::fontdb;

use crate::color::{ColorValue, Rgb, contrasting_color};
use crate::document::{LayoutDocument, RegionId, TextElement};
use crate::error::Result;
use crate::fonts::{FontCatalog, family_name};
use crate::heuristics::Heuristics;
use crate::settings::Settings;
use crate::svg::{data_uri, escape_xml, render_svg_bytes};

/// Where and how one region's text was placed.
#[derive(Debug, Clone, PartialEq)]
pub struct TextPlacement {
    pub region: RegionId,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: u32,
    pub font_family: String,
    pub fill: Rgb,
}

#[derive(Debug, Clone)]
pub struct Composition {
    pub svg: String,
    pub width: u32,
    pub height: u32,
    pub placements: Vec<TextPlacement>,
}

/// Renders a layout document over its background as a layered SVG.
pub struct VectorComposer {
    heuristics: Heuristics,
    catalog: FontCatalog,
    fallback_color: Rgb,
    fontdb: OnceLock<Arc<fontdb::Database>>,
}

impl VectorComposer {
    pub fn new(settings: &Settings) -> Self {
        Self::with_parts(
            settings.heuristics,
            FontCatalog::new(&settings.fonts),
            settings.fallback_text_color,
        )
    }

    pub fn with_parts(heuristics: Heuristics, catalog: FontCatalog, fallback_color: Rgb) -> Self {
        Self {
            heuristics,
            catalog,
            fallback_color,
            fontdb: OnceLock::new(),
        }
    }

    pub fn compose(&self, document: &LayoutDocument, background: &DynamicImage) -> Result<Composition> {
        let (width, height) = (background.width(), background.height());
        let rgb = background.to_rgb8();
        let (encoded, mime) = encode_background(background)?;

        let placements = document
            .regions()
            .filter(|(_, element)| element.has_text())
            .map(|(id, element)| self.place(id, element, &rgb))
            .collect::<Result<Vec<_>>>()?;

        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = width,
            h = height
        ));
        let uri = data_uri(&encoded, mime);
        svg.push_str(&format!(
            r#"<g id="background"><image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/></g>"#,
            uri = uri,
            w = width,
            h = height
        ));
        for placement in &placements {
            svg.push_str(&format!(
                r#"<g id="{id}"><text x="{x}" y="{y}" font-size="{size}" font-family="{family}" fill="{fill}">{text}</text></g>"#,
                id = placement.region,
                x = placement.x,
                y = placement.y,
                size = placement.font_size,
                family = escape_xml(&placement.font_family),
                fill = placement.fill.to_hex(),
                text = escape_xml(&placement.text)
            ));
        }
        svg.push_str("</svg>");

        debug!(
            "composed {} of {} regions on {}x{} background",
            placements.len(),
            document.len(),
            width,
            height
        );
        Ok(Composition {
            svg,
            width,
            height,
            placements,
        })
    }

    /// Rasterizes a composed SVG to PNG with the catalog fonts loaded.
    pub fn render_png(&self, composition: &Composition) -> Result<Vec<u8>> {
        let fontdb = self
            .fontdb
            .get_or_init(|| Arc::new(self.catalog.load_database()))
            .clone();
        let default_family = self.catalog.default_family();
        render_svg_bytes(
            &composition.svg,
            "image/png",
            fontdb,
            default_family.as_deref(),
        )
    }

    fn place(&self, id: RegionId, element: &TextElement, background: &RgbImage) -> Result<TextPlacement> {
        let rect = element.geometry();
        let font_size = element.font_size();
        let text_width = self.heuristics.estimated_text_width(font_size, &element.text);
        let size = font_size as f64;
        let x = rect.left as f64 + (rect.width as f64 - text_width) / 2.0;
        let y = rect.top as f64 + (rect.height as f64 - size) / 2.0 + size * self.heuristics.baseline_ratio;

        Ok(TextPlacement {
            region: id,
            text: element.text.clone(),
            x: round2(x),
            y: round2(y),
            font_size,
            font_family: family_name(self.catalog.resolve(&element.font)),
            fill: self.fill(element, background).map_err(|err| err.with_region(id))?,
        })
    }

    /// Resolved colors are used as-is. Unresolved ones contrast with the
    /// part of the region that lies on the background.
    fn fill(&self, element: &TextElement, background: &RgbImage) -> Result<Rgb> {
        match element.color {
            ColorValue::Resolved(rgb) => Ok(rgb),
            ColorValue::Unresolved => {
                let (width, height) = background.dimensions();
                match element.geometry().clamp_to(width, height) {
                    Some(rect) => contrasting_color(background, &rect),
                    None => Ok(self.fallback_color),
                }
            }
        }
    }
}

/// PNG bytes of the background, RGBA only when the source carries alpha.
fn encode_background(background: &DynamicImage) -> Result<(Vec<u8>, &'static str)> {
    let normalized = if background.color().has_alpha() {
        DynamicImage::ImageRgba8(background.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(background.to_rgb8())
    };
    let mut bytes = Vec::new();
    normalized.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok((bytes, "image/png"))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
