use anyhow::{Context, Result, anyhow};
use image::{ImageFormat, RgbImage};
use std::fmt;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::data::{self, DataAttachment};
use crate::document::LayoutDocument;

const PREVIEW_PREFIX: &str = "rect_";
const LAYOUT_PREFIX: &str = "layout_";

/// Identity shared by every artifact derived from one rectangle submission:
/// the source file's base name and extension plus a generated UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactId {
    base: String,
    unique: String,
    ext: String,
}

impl ArtifactId {
    pub fn generate(source_name: &str) -> Result<Self> {
        let source_name = validate_name(source_name)?;
        let (base, ext) = split_extension(source_name);
        if base.is_empty() {
            return Err(anyhow!("source name has no base name: '{}'", source_name));
        }
        Ok(Self {
            base: base.to_string(),
            unique: Uuid::new_v4().to_string(),
            ext: ext.to_string(),
        })
    }

    /// Parses a saved preview name, `rect_<base>_<uuid><ext>`.
    pub fn parse(saved_image: &str) -> Result<Self> {
        let name = validate_name(saved_image)?;
        let invalid = || anyhow!("not a saved layout image name: '{}'", saved_image);
        let rest = name.strip_prefix(PREVIEW_PREFIX).ok_or_else(invalid)?;
        let (stem, ext) = split_extension(rest);
        let (base, unique) = stem.rsplit_once('_').ok_or_else(invalid)?;
        if base.is_empty() || Uuid::parse_str(unique).is_err() {
            return Err(invalid());
        }
        Ok(Self {
            base: base.to_string(),
            unique: unique.to_string(),
            ext: ext.to_string(),
        })
    }

    pub fn source_name(&self) -> String {
        format!("{}{}", self.base, self.ext)
    }

    pub fn preview_name(&self) -> String {
        format!("{}{}_{}{}", PREVIEW_PREFIX, self.base, self.unique, self.ext)
    }

    pub fn document_name(&self) -> String {
        format!("{}{}_{}.json", PREVIEW_PREFIX, self.base, self.unique)
    }

    pub fn svg_name(&self) -> String {
        format!("{}{}_{}.svg", LAYOUT_PREFIX, self.base, self.unique)
    }

    pub fn png_name(&self) -> String {
        format!("{}{}_{}.png", LAYOUT_PREFIX, self.base, self.unique)
    }

    fn preview_format(&self) -> ImageFormat {
        match self.ext.to_lowercase().as_str() {
            ".png" => ImageFormat::Png,
            _ => ImageFormat::Jpeg,
        }
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.preview_name())
    }
}

/// Named blobs under one storage root directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_name(name)?))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_of(name).map(|path| path.is_file()).unwrap_or(false)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name)?;
        fs::read(&path).with_context(|| format!("failed to read artifact: {}", path.display()))
    }

    pub fn load_image(&self, name: &str) -> Result<DataAttachment> {
        let path = self.path_of(name)?;
        data::load_attachment(&path)
    }

    /// Stores an uploaded background under a sanitized version of `name` and
    /// returns the stored name. Only PNG and JPEG data is accepted.
    pub fn import_source(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let sanitized = sanitize_filename(name);
        let attachment = data::load_attachment_from_bytes(bytes, Some(&sanitized))?;
        let (base, _) = split_extension(&sanitized);
        let stored = format!("{}{}", base, attachment.extension());
        self.write_atomic(&stored, &attachment.bytes)?;
        Ok(stored)
    }

    /// Encodes the annotated preview in the format its extension implies.
    pub fn write_preview(&self, id: &ArtifactId, image: &RgbImage) -> Result<PathBuf> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), id.preview_format())
            .with_context(|| format!("failed to encode preview {}", id.preview_name()))?;
        self.write_atomic(&id.preview_name(), &bytes)
    }

    pub fn write_document(&self, id: &ArtifactId, document: &LayoutDocument) -> Result<PathBuf> {
        let json = document.to_json()?;
        self.write_atomic(&id.document_name(), json.as_bytes())
    }

    pub fn read_document(&self, id: &ArtifactId) -> Result<LayoutDocument> {
        let bytes = self.read(&id.document_name())?;
        let document = LayoutDocument::from_json(&bytes)
            .with_context(|| format!("invalid layout document {}", id.document_name()))?;
        Ok(document)
    }

    pub fn write_svg(&self, id: &ArtifactId, svg: &str) -> Result<PathBuf> {
        self.write_atomic(&id.svg_name(), svg.as_bytes())
    }

    pub fn write_png(&self, id: &ArtifactId, bytes: &[u8]) -> Result<PathBuf> {
        self.write_atomic(&id.png_name(), bytes)
    }

    /// Writes through a temp file in the root and renames it into place, so
    /// readers never see a partial artifact.
    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_of(name)?;
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create storage root: {}", self.root.display()))?;
        let mut file = tempfile::Builder::new()
            .prefix(".llm-layout-")
            .tempfile_in(&self.root)
            .with_context(|| format!("failed to create temp file in {}", self.root.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        file.persist(&path)
            .with_context(|| format!("failed to persist {}", path.display()))?;
        debug!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

/// Rejects names that could escape the storage root.
pub fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains("..")
        || trimmed.starts_with('.')
        || trimmed.chars().any(char::is_control)
    {
        return Err(anyhow!("invalid artifact name: '{}'", name));
    }
    Ok(trimmed)
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

fn sanitize_filename(value: &str) -> String {
    let file_name = value
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(value)
        .trim()
        .trim_start_matches('.');
    let mut out = String::new();
    for ch in file_name.chars() {
        if ch.is_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    while out.contains("..") {
        out = out.replace("..", ".");
    }
    if out.is_empty() || out.starts_with('.') {
        format!("upload{}", out)
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use image::DynamicImage;
    use tempfile::tempdir;

    #[test]
    fn artifact_names_share_base_and_uuid() {
        let id = ArtifactId::generate("poster.jpg").unwrap();
        let preview = id.preview_name();
        assert!(preview.starts_with("rect_poster_"));
        assert!(preview.ends_with(".jpg"));
        assert_eq!(preview.len(), "rect_poster_".len() + 36 + ".jpg".len());
        assert_eq!(id.document_name(), preview.replace(".jpg", ".json"));
        assert!(id.svg_name().starts_with("layout_poster_"));
        assert!(id.png_name().ends_with(".png"));
        assert_eq!(id.source_name(), "poster.jpg");
    }

    #[test]
    fn parse_round_trips_names_with_underscores() {
        let id = ArtifactId::generate("summer_sale_v2.png").unwrap();
        let parsed = ArtifactId::parse(&id.preview_name()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.source_name(), "summer_sale_v2.png");
    }

    #[test]
    fn parse_rejects_foreign_names() {
        for name in [
            "poster.png",
            "rect_poster.png",
            "rect_poster_not-a-uuid.png",
            "rect__0b5f0a4e-2c39-4ad4-9d43-5a3d1f0a9e11.png",
            "../rect_poster_0b5f0a4e-2c39-4ad4-9d43-5a3d1f0a9e11.png",
        ] {
            assert!(ArtifactId::parse(name).is_err(), "{} should be rejected", name);
        }
    }

    #[test]
    fn names_with_separators_are_rejected() {
        assert!(validate_name("a/b.png").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("ok.png").is_ok());
    }

    #[test]
    fn document_round_trips_through_store() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("uploads"));
        let id = ArtifactId::generate("flyer.png").unwrap();
        let doc = LayoutDocument::create(&[Rect::new(1, 2, 30, 40)], "カフェの開店").unwrap();

        let path = store.write_document(&id, &doc).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("カフェの開店"));
        assert!(text.contains("\n    \"user_intention\""));
        assert_eq!(store.read_document(&id).unwrap(), doc);

        let leftovers = fs::read_dir(store.root())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".llm-layout-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn preview_format_follows_extension() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let image = RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));

        let png = ArtifactId::generate("a.png").unwrap();
        store.write_preview(&png, &image).unwrap();
        assert_eq!(
            data::sniff_mime(&store.read(&png.preview_name()).unwrap()),
            Some(data::PNG_MIME)
        );

        let jpeg = ArtifactId::generate("b.jpeg").unwrap();
        store.write_preview(&jpeg, &image).unwrap();
        assert_eq!(
            data::sniff_mime(&store.read(&jpeg.preview_name()).unwrap()),
            Some(data::JPEG_MIME)
        );
    }

    #[test]
    fn import_sanitizes_and_checks_type() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(2, 2))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let stored = store.import_source("../My Poster.jpg", bytes).unwrap();
        assert_eq!(stored, "My_Poster.png");
        assert!(store.exists("My_Poster.png"));
        assert!(store.import_source("notes.txt", b"hello".to_vec()).is_err());
    }

    #[test]
    fn missing_artifact_is_io_not_found() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let err = store.read("nope.json").unwrap_err();
        let io = err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }
}
