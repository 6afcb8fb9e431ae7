use image::{DynamicImage, RgbImage};
use std::sync::{Arc, OnceLock};
use tiny_skia::Pixmap;
use tracing::debug;
use usvg::fontdb;

use crate::color::{Rgb, contrasting_color};
use crate::document::{LayoutDocument, RegionId};
use crate::error::{LayoutError, Result};
use crate::fonts::{FontCatalog, family_name};
use crate::geometry::Rect;
use crate::heuristics::Heuristics;
use crate::settings::Settings;
use crate::svg::{escape_xml, rasterize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationStyle {
    pub outline_color: Rgb,
    pub outline_width: u32,
    /// Offset of the ordinal label from the rectangle's top-left corner.
    pub label_inset: u32,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            outline_color: Rgb::new(255, 0, 0),
            outline_width: 3,
            label_inset: 5,
        }
    }
}

/// Ordinal label drawn for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionLabel {
    pub region: RegionId,
    pub color: Rgb,
    pub x: u32,
    pub y: u32,
    pub font_size: u32,
}

pub struct Annotation {
    pub image: RgbImage,
    pub document: LayoutDocument,
    pub labels: Vec<RegionLabel>,
}

/// Draws numbered region outlines over a copy of the background and builds
/// the matching skeleton document.
pub struct AnnotationRenderer {
    style: AnnotationStyle,
    heuristics: Heuristics,
    fonts: FontCatalog,
    fontdb: OnceLock<Arc<fontdb::Database>>,
}

impl AnnotationRenderer {
    pub fn new(settings: &Settings) -> Self {
        Self::with_parts(
            settings.annotation,
            settings.heuristics,
            FontCatalog::new(&settings.fonts),
        )
    }

    pub fn with_parts(style: AnnotationStyle, heuristics: Heuristics, fonts: FontCatalog) -> Self {
        Self {
            style,
            heuristics,
            fonts,
            fontdb: OnceLock::new(),
        }
    }

    pub fn annotate(
        &self,
        image: &DynamicImage,
        rects: &[Rect],
        user_intention: &str,
    ) -> Result<Annotation> {
        let source = image.to_rgb8();
        let (width, height) = source.dimensions();
        for (idx, rect) in rects.iter().enumerate() {
            rect.ensure_within(width, height)
                .map_err(|err| err.with_region(RegionId::from_index(idx)))?;
        }

        let document = LayoutDocument::create_with(rects, user_intention, &self.heuristics)?;
        let inset = self.style.label_inset;
        let labels = document
            .regions()
            .map(|(id, element)| {
                let rect = element.geometry();
                let color = contrasting_color(&source, &rect).map_err(|err| err.with_region(id))?;
                Ok(RegionLabel {
                    region: id,
                    color,
                    x: rect.left + inset,
                    y: rect.top + inset,
                    font_size: element.font_size(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut canvas = source;
        for (_, element) in document.regions() {
            stroke_rect(
                &mut canvas,
                &element.geometry(),
                self.style.outline_width,
                self.style.outline_color,
            );
        }
        if !labels.is_empty() {
            let layer = self.render_labels(width, height, &labels)?;
            composite(&mut canvas, &layer);
        }
        debug!("annotated {} regions on {}x{} image", labels.len(), width, height);

        Ok(Annotation {
            image: canvas,
            document,
            labels,
        })
    }

    fn label_svg(&self, width: u32, height: u32, labels: &[RegionLabel]) -> String {
        let family = escape_xml(&family_name(self.fonts.default_font()));
        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = width,
            h = height
        ));
        for label in labels {
            let baseline = label.y as f64 + label.font_size as f64 * self.heuristics.baseline_ratio;
            svg.push_str(&format!(
                r#"<text x="{x}" y="{y}" font-size="{size}" font-family="{family}, sans-serif" fill="{fill}">{text}</text>"#,
                x = label.x,
                y = baseline,
                size = label.font_size,
                family = family,
                fill = label.color.to_hex(),
                text = label.region.ordinal()
            ));
        }
        svg.push_str("</svg>");
        svg
    }

    fn render_labels(&self, width: u32, height: u32, labels: &[RegionLabel]) -> Result<Pixmap> {
        let svg = self.label_svg(width, height, labels);
        let fontdb = self
            .fontdb
            .get_or_init(|| Arc::new(self.fonts.load_database()))
            .clone();
        let pixmap = rasterize(&svg, fontdb, None)?;
        if (pixmap.width(), pixmap.height()) != (width, height) {
            return Err(LayoutError::Render(format!(
                "label layer is {}x{}, expected {}x{}",
                pixmap.width(),
                pixmap.height(),
                width,
                height
            )));
        }
        Ok(pixmap)
    }
}

/// Outline drawn inward from the rectangle edges, right and bottom edges
/// inclusive, clipped to the canvas.
fn stroke_rect(canvas: &mut RgbImage, rect: &Rect, width: u32, color: Rgb) {
    let (canvas_w, canvas_h) = canvas.dimensions();
    if canvas_w == 0 || canvas_h == 0 || width == 0 {
        return;
    }
    let (x0, y0, x1, y1) = (rect.left, rect.top, rect.right(), rect.bottom());
    let paint = image::Rgb([color.r, color.g, color.b]);
    for y in y0..=y1.min(canvas_h - 1) {
        for x in x0..=x1.min(canvas_w - 1) {
            let on_edge =
                x < x0 + width || x + width > x1 || y < y0 + width || y + width > y1;
            if on_edge {
                canvas.put_pixel(x, y, paint);
            }
        }
    }
}

/// Source-over blend of a premultiplied layer onto an opaque canvas of the
/// same size.
fn composite(canvas: &mut RgbImage, layer: &Pixmap) {
    for (pixel, src) in canvas.pixels_mut().zip(layer.pixels()) {
        let alpha = src.alpha();
        if alpha == 0 {
            continue;
        }
        let inverse = 255 - alpha as u32;
        let blend =
            |src: u8, dst: u8| (src as u32 + (dst as u32 * inverse + 127) / 255).min(255) as u8;
        pixel.0 = [
            blend(src.red(), pixel[0]),
            blend(src.green(), pixel[1]),
            blend(src.blue(), pixel[2]),
        ];
    }
}
