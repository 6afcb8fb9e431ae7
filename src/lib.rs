use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub mod annotate;
pub mod color;
pub mod compose;
pub mod data;
pub mod document;
pub mod enrich;
pub mod error;
pub mod fonts;
pub mod geometry;
pub mod heuristics;
pub mod logging;
mod paths;
pub mod pipeline;
pub mod providers;
pub mod server;
pub mod settings;
pub mod store;
mod svg;

pub use annotate::{Annotation, AnnotationRenderer, AnnotationStyle};
pub use color::{ColorValue, Rgb};
pub use compose::{Composition, VectorComposer};
pub use document::{EnrichmentUpdate, LayoutDocument, RegionId, RegionPatch, TextElement};
pub use enrich::{Enricher, GenerationFuture, GenerationRequest, GenerationService};
pub use error::LayoutError;
pub use geometry::{RawRect, Rect};
pub use pipeline::{ComposedLayout, Pipeline, SavedLayout};
pub use providers::{Claude, Gemini, OpenAI, Provider, ProviderKind};
pub use store::{ArtifactId, ArtifactStore};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub image: Option<PathBuf>,
    pub rects: Option<String>,
    pub prompt: String,
    pub document: Option<String>,
    pub skip_enrich: bool,
    pub png: bool,
    pub model: Option<String>,
    pub key: Option<String>,
    pub settings_path: Option<String>,
}

/// What a CLI run wrote into the storage root.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub storage_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub saved_image: String,
    pub document: String,
    pub enriched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composed: Option<ComposedLayout>,
}

pub async fn run(config: Config) -> Result<String> {
    match (&config.image, &config.document) {
        (Some(_), Some(_)) => return Err(anyhow!("--image and --document cannot be used together")),
        (None, None) => return Err(anyhow!("either --image or --document is required")),
        _ => {}
    }
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;
    let pipeline = Pipeline::new(settings);

    let (source, saved_image) = match (&config.image, &config.document) {
        (Some(image), _) => {
            let rects = config
                .rects
                .as_deref()
                .ok_or_else(|| anyhow!("--rects is required with --image"))?;
            let rects = parse_rects(rects)?;
            let source = import_image(&pipeline, image)?;
            let saved = pipeline.save_rectangles(&source, &rects, &config.prompt)?;
            (Some(source), saved.saved_image)
        }
        (None, saved) => (None, saved.as_deref().unwrap_or_default().trim().to_string()),
    };
    let id = ArtifactId::parse(&saved_image)?;

    let enriched = if config.skip_enrich {
        false
    } else {
        let model = config
            .model
            .as_deref()
            .or(pipeline.settings().enrichment_model.as_deref());
        let service = providers::connect(model, config.key.as_deref())
            .with_context(|| "failed to set up the generation service")?;
        pipeline.enrich(&saved_image, service).await?;
        true
    };
    let composed = if enriched || config.document.is_some() {
        Some(pipeline.compose(&saved_image, config.png)?)
    } else {
        None
    };

    let summary = RunSummary {
        storage_root: pipeline.store().root().display().to_string(),
        source,
        saved_image,
        document: id.document_name(),
        enriched,
        composed,
    };
    serde_json::to_string_pretty(&summary).with_context(|| "failed to format summary")
}

/// Accepts either inline JSON or a path to a JSON file.
pub fn parse_rects(value: &str) -> Result<Vec<RawRect>> {
    let trimmed = value.trim();
    let json = if trimmed.starts_with('[') {
        trimmed.to_string()
    } else {
        fs::read_to_string(trimmed)
            .with_context(|| format!("failed to read rectangles file: {}", trimmed))?
    };
    serde_json::from_str(&json).with_context(|| "rectangles must be a JSON list of {left, top, width, height}")
}

fn import_image(pipeline: &Pipeline, path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read image: {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("image path has no file name: {}", path.display()))?;
    pipeline.store().import_source(name, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rects_from_inline_json() {
        let rects = parse_rects(r#"[{"left": 10.5, "top": 2, "width": 30, "height": 40}]"#).unwrap();
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].left, 10.5);
        assert_eq!(rects[0].height, 40.0);
    }

    #[test]
    fn rects_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rects.json");
        fs::write(&path, r#"[{"left": 0, "top": 0, "width": 1, "height": 1}]"#).unwrap();
        let rects = parse_rects(path.to_str().unwrap()).unwrap();
        assert_eq!(rects[0].width, 1.0);
    }

    #[test]
    fn rects_must_be_a_list() {
        assert!(parse_rects(r#"[{"left": 0}]"#).is_err());
        assert!(parse_rects("/no/such/file.json").is_err());
    }

    #[tokio::test]
    async fn run_requires_a_source() {
        let err = run(Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("--image or --document"));
    }
}
