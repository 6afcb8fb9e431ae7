use anyhow::{Context, Result, anyhow};
use image::DynamicImage;
use std::path::Path;

pub const PNG_MIME: &str = "image/png";
pub const JPEG_MIME: &str = "image/jpeg";

/// Image bytes with their detected mime type.
#[derive(Debug, Clone)]
pub struct DataAttachment {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub name: Option<String>,
}

impl DataAttachment {
    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.bytes).with_context(|| {
            format!(
                "failed to decode image {}",
                self.name.as_deref().unwrap_or("<memory>")
            )
        })
    }

    /// Extension (with dot) matching the detected mime.
    pub fn extension(&self) -> &'static str {
        match extension_from_mime(&self.mime) {
            Some("jpg") => ".jpg",
            _ => ".png",
        }
    }
}

pub fn load_attachment(path: &Path) -> Result<DataAttachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image file: {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .map(|value| value.to_string());
    load_attachment_from_bytes(bytes, name.as_deref())
}

/// Accepts PNG and JPEG only. Content sniffing wins over the name's
/// extension; the extension is consulted when the bytes are inconclusive.
pub fn load_attachment_from_bytes(bytes: Vec<u8>, name: Option<&str>) -> Result<DataAttachment> {
    let mime = detect_mime(&bytes, name.map(Path::new))?;
    Ok(DataAttachment {
        bytes,
        mime: mime.to_string(),
        name: name.map(|value| value.to_string()),
    })
}

pub fn encode_png(image: &DynamicImage) -> Result<DataAttachment> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| "failed to encode PNG")?;
    Ok(DataAttachment {
        bytes,
        mime: PNG_MIME.to_string(),
        name: None,
    })
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    match kind.mime_type() {
        PNG_MIME => Some(PNG_MIME),
        JPEG_MIME => Some(JPEG_MIME),
        _ => None,
    }
}

fn detect_mime(bytes: &[u8], path: Option<&Path>) -> Result<&'static str> {
    if let Some(detected) = sniff_mime(bytes) {
        return Ok(detected);
    }
    if let Some(kind) = infer::get(bytes) {
        return Err(anyhow!(
            "unsupported image type '{}' (expected png or jpeg)",
            kind.mime_type()
        ));
    }
    if let Some(mime) = extension_lower(path).and_then(|ext| mime_from_extension(&ext)) {
        return Ok(mime);
    }
    Err(anyhow!(
        "unable to detect image type for '{}'",
        path.map(|value| value.display().to_string())
            .unwrap_or_else(|| "upload".to_string())
    ))
}

fn extension_lower(path: Option<&Path>) -> Option<String> {
    path.and_then(|path| path.extension())
        .and_then(|value| value.to_str())
        .map(|value| value.to_lowercase())
}

pub fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext.trim_start_matches('.') {
        "png" => Some(PNG_MIME),
        "jpg" | "jpeg" => Some(JPEG_MIME),
        _ => None,
    }
}

pub fn extension_from_mime(mime: &str) -> Option<&'static str> {
    match mime {
        PNG_MIME => Some("png"),
        JPEG_MIME | "image/jpg" => Some("jpg"),
        _ => None,
    }
}
