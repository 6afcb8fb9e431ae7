use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use ttf_parser::{Face, name_id};
use usvg::fontdb;

/// One selectable font. `id` is the identifier the generation service picks
/// and the document stores, usually the font file name.
#[derive(Debug, Clone, PartialEq)]
pub struct FontEntry {
    pub id: String,
    pub tone: String,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FontSettings {
    pub directory: PathBuf,
    pub default_font: String,
    pub catalog: Vec<FontEntry>,
}

impl Default for FontSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./fonts"),
            default_font: "Arial.ttf".to_string(),
            catalog: vec![FontEntry {
                id: "Arial.ttf".to_string(),
                tone: "neutral sans-serif for plain, informative copy".to_string(),
                path: None,
            }],
        }
    }
}

/// Fixed font catalog with a default fallback for unknown or empty ids.
#[derive(Debug, Clone)]
pub struct FontCatalog {
    directory: PathBuf,
    default_font: String,
    entries: Vec<FontEntry>,
}

impl FontCatalog {
    pub fn new(settings: &FontSettings) -> Self {
        Self {
            directory: settings.directory.clone(),
            default_font: settings.default_font.clone(),
            entries: settings.catalog.clone(),
        }
    }

    pub fn entries(&self) -> &[FontEntry] {
        &self.entries
    }

    pub fn default_font(&self) -> &str {
        &self.default_font
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// The id itself when cataloged, otherwise the default font.
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        let id = id.trim();
        if !id.is_empty() && self.contains(id) {
            id
        } else {
            &self.default_font
        }
    }

    /// Font file backing `id`: the entry's explicit path, or the id joined
    /// onto the font directory.
    pub fn resource_path(&self, id: &str) -> PathBuf {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .and_then(|entry| entry.path.clone())
            .unwrap_or_else(|| self.directory.join(id))
    }

    /// System fonts plus every catalog font file that exists on disk. The
    /// default font, when present, also answers for `sans-serif`.
    pub fn load_database(&self) -> fontdb::Database {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        let mut ids = self
            .entries
            .iter()
            .map(|entry| entry.id.as_str())
            .collect::<Vec<_>>();
        if !self.contains(&self.default_font) {
            ids.push(&self.default_font);
        }
        for id in ids {
            let path = self.resource_path(id);
            if !path.exists() {
                debug!("font {} not found at {}", id, path.display());
                continue;
            }
            if let Err(err) = db.load_font_file(&path) {
                warn!("failed to load font {}: {}", path.display(), err);
            }
        }
        if let Some(family) = self.default_family() {
            db.set_sans_serif_family(family);
        }
        db
    }

    /// Family name stored inside the default font file, used as the
    /// rasterizer's fallback family.
    pub fn default_family(&self) -> Option<String> {
        let data = std::fs::read(self.resource_path(&self.default_font)).ok()?;
        font_family_from_data(&data)
    }
}

/// Family name used in vector output: the identifier without its file
/// extension.
pub fn family_name(id: &str) -> String {
    let trimmed = id.trim();
    Path::new(trimmed)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

fn font_family_from_data(data: &[u8]) -> Option<String> {
    let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
    (0..count)
        .filter_map(|index| Face::parse(data, index).ok())
        .find_map(|face| extract_family_name(&face))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
