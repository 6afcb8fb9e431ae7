use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::AnnotationStyle;
use crate::color::Rgb;
use crate::fonts::{FontEntry, FontSettings};
use crate::heuristics::Heuristics;
use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

/// Everything the pipeline components are constructed from. Nothing in the
/// crate reads configuration from globals.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage_root: PathBuf,
    pub heuristics: Heuristics,
    pub annotation: AnnotationStyle,
    pub enrichment_timeout: Duration,
    pub enrichment_model: Option<String>,
    pub fallback_text_color: Rgb,
    pub fonts: FontSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./static/uploads"),
            heuristics: Heuristics::default(),
            annotation: AnnotationStyle::default(),
            enrichment_timeout: Duration::from_secs(60),
            enrichment_model: None,
            fallback_text_color: Rgb::new(0, 0, 0),
            fonts: FontSettings::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    storage: Option<StorageSettings>,
    layout: Option<LayoutSettings>,
    annotation: Option<AnnotationSettings>,
    enrichment: Option<EnrichmentSettings>,
    render: Option<RenderSettings>,
    fonts: Option<FontsFile>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSettings {
    root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutSettings {
    font_size_ratio: Option<f64>,
    text_length_ratio: Option<f64>,
    glyph_width_ratio: Option<f64>,
    baseline_ratio: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotationSettings {
    outline_color: Option<String>,
    outline_width: Option<u32>,
    label_inset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EnrichmentSettings {
    timeout_secs: Option<u64>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSettings {
    fallback_text_color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FontsFile {
    directory: Option<String>,
    default: Option<String>,
    catalog: Option<Vec<FontEntryFile>>,
}

#[derive(Debug, Deserialize)]
struct FontEntryFile {
    id: String,
    #[serde(default)]
    tone: String,
    path: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    load_settings_in(paths::settings_dir().as_deref(), extra_path)
}

/// Layered load: embedded defaults, then `./settings.toml`,
/// `./settings.local.toml`, the same two files under `home`, then
/// `extra_path`. Later files win field by field.
pub fn load_settings_in(home: Option<&Path>, extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults)?;

    if let Some(home) = home {
        ensure_home_settings_file(home)?;
    }

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings
                .merge(parsed)
                .with_context(|| format!("invalid settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(storage) = incoming.storage {
            if let Some(root) = storage.root.filter(|root| !root.trim().is_empty()) {
                self.storage_root = paths::expand_path(&root);
            }
        }
        if let Some(layout) = incoming.layout {
            let heuristics = &mut self.heuristics;
            merge_ratio(&mut heuristics.font_size_ratio, layout.font_size_ratio);
            merge_ratio(&mut heuristics.text_length_ratio, layout.text_length_ratio);
            merge_ratio(&mut heuristics.glyph_width_ratio, layout.glyph_width_ratio);
            merge_ratio(&mut heuristics.baseline_ratio, layout.baseline_ratio);
        }
        if let Some(annotation) = incoming.annotation {
            if let Some(color) = non_empty(annotation.outline_color) {
                self.annotation.outline_color = parse_color("annotation.outline_color", &color)?;
            }
            if let Some(width) = annotation.outline_width.filter(|width| *width > 0) {
                self.annotation.outline_width = width;
            }
            if let Some(inset) = annotation.label_inset {
                self.annotation.label_inset = inset;
            }
        }
        if let Some(enrichment) = incoming.enrichment {
            if let Some(secs) = enrichment.timeout_secs.filter(|secs| *secs > 0) {
                self.enrichment_timeout = Duration::from_secs(secs);
            }
            if let Some(model) = non_empty(enrichment.model) {
                self.enrichment_model = Some(model);
            }
        }
        if let Some(render) = incoming.render {
            if let Some(color) = non_empty(render.fallback_text_color) {
                self.fallback_text_color = parse_color("render.fallback_text_color", &color)?;
            }
        }
        if let Some(fonts) = incoming.fonts {
            if let Some(directory) = non_empty(fonts.directory) {
                self.fonts.directory = paths::expand_path(&directory);
            }
            if let Some(default) = non_empty(fonts.default) {
                self.fonts.default_font = default;
            }
            if let Some(catalog) = fonts.catalog {
                self.fonts.catalog = catalog
                    .into_iter()
                    .filter(|entry| !entry.id.trim().is_empty())
                    .map(|entry| FontEntry {
                        id: entry.id.trim().to_string(),
                        tone: entry.tone,
                        path: non_empty(entry.path).map(|path| paths::expand_path(&path)),
                    })
                    .collect();
            }
        }
        Ok(())
    }
}

fn merge_ratio(slot: &mut f64, value: Option<f64>) {
    if let Some(value) = value.filter(|value| value.is_finite() && *value > 0.0) {
        *slot = value;
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_color(key: &str, value: &str) -> Result<Rgb> {
    Rgb::parse(value).ok_or_else(|| anyhow!("{} is not a color: '{}'", key, value))
}

fn ensure_home_settings_file(home: &Path) -> Result<()> {
    fs::create_dir_all(home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}
