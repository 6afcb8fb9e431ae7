use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{ImageFormat, RgbaImage};
use resvg::render;
use std::io::Cursor;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use crate::error::{LayoutError, Result};

pub(crate) fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub(crate) fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// Renders an SVG document at its intrinsic size. `default_family` is used
/// for text without a matching `font-family`.
pub(crate) fn rasterize(
    svg: &str,
    fontdb: Arc<fontdb::Database>,
    default_family: Option<&str>,
) -> Result<Pixmap> {
    let mut options = Options {
        fontdb,
        ..Options::default()
    };
    if let Some(family) = default_family {
        options.font_family = family.to_string();
    }
    let tree = Tree::from_str(svg, &options)
        .map_err(|err| LayoutError::Render(format!("failed to parse SVG: {}", err)))?;
    let size = tree.size().to_int_size();
    let mut pixmap = Pixmap::new(size.width(), size.height())
        .ok_or_else(|| LayoutError::Render("empty SVG size".to_string()))?;
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
    Ok(pixmap)
}

pub(crate) fn render_svg_bytes(
    svg: &str,
    output_mime: &str,
    fontdb: Arc<fontdb::Database>,
    default_family: Option<&str>,
) -> Result<Vec<u8>> {
    let format = image_format_from_mime(output_mime).ok_or_else(|| {
        LayoutError::Render(format!("unsupported output image mime '{}'", output_mime))
    })?;
    let pixmap = rasterize(svg, fontdb, default_family)?;
    let data = pixmap
        .pixels()
        .iter()
        .flat_map(|pixel| {
            let color = pixel.demultiply();
            [color.red(), color.green(), color.blue(), color.alpha()]
        })
        .collect::<Vec<u8>>();
    let image = RgbaImage::from_raw(pixmap.width(), pixmap.height(), data)
        .ok_or_else(|| LayoutError::Render("failed to build image buffer from SVG".to_string()))?;

    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    let encoded = match format {
        ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(image)
            .to_rgb8()
            .write_to(&mut cursor, format),
        _ => image.write_to(&mut cursor, format),
    };
    encoded.map_err(|err| LayoutError::Render(format!("failed to encode image from SVG: {}", err)))?;
    Ok(bytes)
}

pub(crate) fn image_format_from_mime(mime: &str) -> Option<ImageFormat> {
    match mime {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_xml_covers_markup_characters() {
        assert_eq!(
            escape_xml(r#"<b>"Tom & Jerry's"</b>"#),
            "&lt;b&gt;&quot;Tom &amp; Jerry&apos;s&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn data_uri_prefixes_mime() {
        assert_eq!(data_uri(b"abc", "image/png"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn rasterize_fills_shapes() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="2" viewBox="0 0 4 2"><rect x="0" y="0" width="2" height="2" fill="#0000ff"/></svg>"##;
        let pixmap = rasterize(svg, Arc::new(fontdb::Database::new()), None).unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (4, 2));
        let left = pixmap.pixel(0, 0).unwrap();
        assert_eq!((left.red(), left.green(), left.blue(), left.alpha()), (0, 0, 255, 255));
        assert_eq!(pixmap.pixel(3, 1).unwrap().alpha(), 0);
    }

    #[test]
    fn render_svg_bytes_encodes_png() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="3" height="3"><rect width="3" height="3" fill="#ff0000"/></svg>"##;
        let bytes =
            render_svg_bytes(svg, "image/png", Arc::new(fontdb::Database::new()), None).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(1, 1).0, [255, 0, 0, 255]);
    }

    #[test]
    fn unsupported_mime_is_rejected() {
        let err = render_svg_bytes("<svg/>", "image/gif", Arc::new(fontdb::Database::new()), None)
            .unwrap_err();
        assert!(err.to_string().contains("image/gif"));
    }
}
