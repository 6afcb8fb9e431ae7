//! Boundary adapter to the external content generation service.

mod response;

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tera::{Context as TeraContext, Tera};
use tracing::{debug, info, warn};

use crate::data::DataAttachment;
use crate::document::{EnrichmentUpdate, LayoutDocument};
use crate::error::{LayoutError, Result};
use crate::fonts::FontCatalog;
use crate::heuristics::Heuristics;
use crate::settings::Settings;

pub use response::parse_response;

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.tera");

/// One generation call: instructions, the user's request and the annotated
/// preview image.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub image: Option<DataAttachment>,
}

pub type GenerationFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>;

/// Capability of producing free text for a request. Implemented by the HTTP
/// providers and by in-memory fakes in tests.
pub trait GenerationService: Send + Sync {
    fn generate(&self, request: GenerationRequest) -> GenerationFuture;
}

impl<T: GenerationService + ?Sized> GenerationService for Arc<T> {
    fn generate(&self, request: GenerationRequest) -> GenerationFuture {
        (**self).generate(request)
    }
}

#[derive(Debug, Serialize)]
struct PromptRegion {
    id: String,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    target_length: usize,
}

#[derive(Debug, Serialize)]
struct PromptFont<'a> {
    id: &'a str,
    tone: &'a str,
}

pub struct Enricher<S> {
    service: S,
    catalog: FontCatalog,
    heuristics: Heuristics,
    timeout: Duration,
}

impl<S: GenerationService> Enricher<S> {
    pub fn new(service: S, settings: &Settings) -> Self {
        Self::with_parts(
            service,
            FontCatalog::new(&settings.fonts),
            settings.heuristics,
            settings.enrichment_timeout,
        )
    }

    pub fn with_parts(
        service: S,
        catalog: FontCatalog,
        heuristics: Heuristics,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            catalog,
            heuristics,
            timeout,
        }
    }

    pub fn render_system_prompt(&self, document: &LayoutDocument) -> Result<String> {
        let regions = document
            .regions()
            .map(|(id, element)| {
                let rect = element.geometry();
                PromptRegion {
                    id: id.to_string(),
                    left: rect.left,
                    top: rect.top,
                    width: rect.width,
                    height: rect.height,
                    target_length: self.heuristics.target_text_length(&rect),
                }
            })
            .collect::<Vec<_>>();
        let fonts = self
            .catalog
            .entries()
            .iter()
            .map(|entry| PromptFont {
                id: &entry.id,
                tone: &entry.tone,
            })
            .collect::<Vec<_>>();

        let mut context = TeraContext::new();
        context.insert("user_intention", document.user_intention().trim());
        context.insert("regions", &regions);
        context.insert("fonts", &fonts);
        context.insert("default_font", self.catalog.default_font());
        Tera::one_off(SYSTEM_PROMPT_TEMPLATE, &context, false)
            .map_err(|err| LayoutError::Render(format!("failed to render system prompt: {}", err)))
    }

    pub fn render_user_prompt(&self, document: &LayoutDocument) -> String {
        let intention = document.user_intention().trim();
        if intention.is_empty() {
            "Fill every region with copy that suits the background.".to_string()
        } else {
            format!("Fill every region with copy for this request: {}", intention)
        }
    }

    /// Asks the service for suggestions. The returned update only references
    /// regions of `document`; the document itself is not touched.
    pub async fn enrich(
        &self,
        preview: &DataAttachment,
        document: &LayoutDocument,
    ) -> Result<EnrichmentUpdate> {
        let request = GenerationRequest {
            system_prompt: self.render_system_prompt(document)?,
            user_prompt: self.render_user_prompt(document),
            image: Some(preview.clone()),
        };
        debug!(
            "requesting enrichment for {} regions (timeout {}ms)",
            document.len(),
            self.timeout.as_millis()
        );

        let raw = match tokio::time::timeout(self.timeout, self.service.generate(request)).await {
            Err(_) => {
                warn!("enrichment timed out after {}ms", self.timeout.as_millis());
                return Err(LayoutError::EnrichmentTimeout(self.timeout.as_millis() as u64));
            }
            Ok(Err(err)) => return Err(LayoutError::EnrichmentUnavailable(format!("{:#}", err))),
            Ok(Ok(raw)) => raw,
        };

        let update = parse_response(&raw)?;
        document.validate_update(&update)?;
        info!("enrichment returned {} region updates", update.len());
        Ok(update)
    }

    /// `enrich` followed by an atomic merge into `document`.
    pub async fn enrich_document(
        &self,
        preview: &DataAttachment,
        document: &mut LayoutDocument,
    ) -> Result<EnrichmentUpdate> {
        let update = self.enrich(preview, document).await?;
        document.merge_enrichment(&update)?;
        Ok(update)
    }
}
