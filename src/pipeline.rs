use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::annotate::AnnotationRenderer;
use crate::compose::VectorComposer;
use crate::document::{LayoutDocument, RegionId};
use crate::enrich::{Enricher, GenerationService};
use crate::geometry::{RawRect, Rect};
use crate::settings::Settings;
use crate::store::{ArtifactId, ArtifactStore};

/// Artifacts written by `save_rectangles`.
#[derive(Debug, Clone, Serialize)]
pub struct SavedLayout {
    pub saved_image: String,
    pub document: String,
    pub regions: usize,
    #[serde(skip)]
    pub layout: LayoutDocument,
}

/// Artifacts written by `compose`.
#[derive(Debug, Clone, Serialize)]
pub struct ComposedLayout {
    pub svg: String,
    pub png: Option<String>,
    pub text_nodes: usize,
    /// Regions left out because they have no text yet.
    pub skipped: Vec<String>,
}

/// Annotate, enrich and compose over one artifact store.
pub struct Pipeline {
    settings: Settings,
    store: ArtifactStore,
    renderer: AnnotationRenderer,
    composer: VectorComposer,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        let store = ArtifactStore::new(settings.storage_root.clone());
        Self::with_store(settings, store)
    }

    pub fn with_store(settings: Settings, store: ArtifactStore) -> Self {
        Self {
            renderer: AnnotationRenderer::new(&settings),
            composer: VectorComposer::new(&settings),
            settings,
            store,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Draws the submitted rectangles onto the stored background `source`,
    /// then writes the preview and the skeleton document.
    pub fn save_rectangles(
        &self,
        source: &str,
        rectangles: &[RawRect],
        user_intention: &str,
    ) -> Result<SavedLayout> {
        let id = ArtifactId::generate(source)?;
        let background = self.store.load_image(source)?.decode()?;
        let (width, height) = (background.width(), background.height());
        let rects = rectangles
            .iter()
            .enumerate()
            .map(|(idx, raw)| {
                raw.normalize(width, height)
                    .map_err(|err| err.with_region(RegionId::from_index(idx)))
            })
            .collect::<crate::error::Result<Vec<Rect>>>()?;

        let annotation = self.renderer.annotate(&background, &rects, user_intention)?;
        self.store.write_preview(&id, &annotation.image)?;
        self.store.write_document(&id, &annotation.document)?;
        info!(
            "saved {} regions for {} as {}",
            annotation.document.len(),
            source,
            id.preview_name()
        );

        Ok(SavedLayout {
            saved_image: id.preview_name(),
            document: id.document_name(),
            regions: annotation.document.len(),
            layout: annotation.document,
        })
    }

    /// Sends the saved preview to `service` and persists the merged document.
    /// On any failure the stored document is left as it was.
    pub async fn enrich<S: GenerationService>(
        &self,
        saved_image: &str,
        service: S,
    ) -> Result<LayoutDocument> {
        let id = ArtifactId::parse(saved_image)?;
        let (mut document, preview) = {
            let store = self.store.clone();
            let id = id.clone();
            blocking(move || {
                let document = store.read_document(&id)?;
                let preview = store.load_image(&id.preview_name())?;
                Ok((document, preview))
            })
            .await?
        };

        let enricher = Enricher::new(service, &self.settings);
        let update = enricher
            .enrich_document(&preview, &mut document)
            .await
            .with_context(|| format!("failed to enrich {}", saved_image))?;

        let store = self.store.clone();
        let merged = document.clone();
        let document_name = id.document_name();
        blocking(move || store.write_document(&id, &merged)).await?;
        info!("merged {} region updates into {}", update.len(), document_name);
        Ok(document)
    }

    /// Renders the stored document over the original background.
    pub fn compose(&self, saved_image: &str, png: bool) -> Result<ComposedLayout> {
        let id = ArtifactId::parse(saved_image)?;
        let document = self.store.read_document(&id)?;
        let background = self
            .store
            .load_image(&id.source_name())
            .with_context(|| format!("background {} is missing", id.source_name()))?
            .decode()?;

        let composition = self.composer.compose(&document, &background)?;
        self.store.write_svg(&id, &composition.svg)?;
        let png_name = if png {
            let bytes = self.composer.render_png(&composition)?;
            self.store.write_png(&id, &bytes)?;
            Some(id.png_name())
        } else {
            None
        };
        info!(
            "composed {} with {} text nodes",
            id.svg_name(),
            composition.placements.len()
        );

        Ok(ComposedLayout {
            svg: id.svg_name(),
            png: png_name,
            text_nodes: composition.placements.len(),
            skipped: document
                .unresolved_regions()
                .into_iter()
                .map(|region| region.to_string())
                .collect(),
        })
    }
}

/// Store reads and writes stay off the async workers.
async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("store task failed")?
}
