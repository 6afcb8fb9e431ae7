use anyhow::Result;
use std::sync::Arc;

use crate::enrich::GenerationService;
use crate::pipeline::Pipeline;
use crate::providers;
use crate::settings::Settings;

/// Builds a generation service from the request's optional `model` and `key`.
pub type Connector =
    Arc<dyn Fn(Option<&str>, Option<&str>) -> Result<Arc<dyn GenerationService>> + Send + Sync>;

#[derive(Clone)]
pub struct ServerState {
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) connect: Connector,
}

impl ServerState {
    /// Pipeline over the configured storage root, enriching through the
    /// hosted providers. The settings model is used when a request names none.
    pub fn new(settings: Settings) -> Self {
        let default_model = settings.enrichment_model.clone();
        let connect: Connector = Arc::new(move |model: Option<&str>, key: Option<&str>| {
            connect_provider(default_model.as_deref(), model, key)
        });
        Self::with_connector(Pipeline::new(settings), connect)
    }

    pub fn with_connector(pipeline: Pipeline, connect: Connector) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            connect,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

fn connect_provider(
    default_model: Option<&str>,
    model: Option<&str>,
    key: Option<&str>,
) -> Result<Arc<dyn GenerationService>> {
    let model = model
        .filter(|value| !value.trim().is_empty())
        .or(default_model);
    let provider = providers::connect(model, key)?;
    Ok(Arc::new(provider))
}
