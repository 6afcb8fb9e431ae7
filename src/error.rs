//! Error types for layout synthesis and rendering

use thiserror::Error;

use crate::geometry::Rect;

/// Result type alias for the layout core
pub type Result<T> = std::result::Result<T, LayoutError>;

/// Failures surfaced by the layout core. Every variant reaches the caller;
/// nothing is swallowed inside the pipeline.
#[derive(Error, Debug)]
pub enum LayoutError {
    /// A rectangle is empty, negative or outside the background image
    #[error("{}", describe_geometry(region.as_deref(), rect, reason))]
    Geometry {
        region: Option<String>,
        rect: Rect,
        reason: String,
    },

    /// The persisted document does not follow the document schema
    #[error("malformed layout document: {0}")]
    MalformedDocument(String),

    /// An update references a region the document does not have
    #[error("unknown region identifier '{0}'")]
    UnknownRegion(String),

    /// The generation service answered with something that is not a layout update
    #[error("invalid enrichment response: {0}")]
    InvalidResponse(String),

    /// The generation service did not answer in time
    #[error("enrichment timed out after {0}ms")]
    EnrichmentTimeout(u64),

    /// The generation service could not be reached or refused the request
    #[error("enrichment service unavailable: {0}")]
    EnrichmentUnavailable(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("render failed: {0}")]
    Render(String),
}

impl LayoutError {
    pub(crate) fn geometry(rect: Rect, reason: impl Into<String>) -> Self {
        LayoutError::Geometry {
            region: None,
            rect,
            reason: reason.into(),
        }
    }

    /// Attach a region identifier to a geometry error that does not carry one yet.
    pub fn with_region(self, id: impl ToString) -> Self {
        match self {
            LayoutError::Geometry {
                region: None,
                rect,
                reason,
            } => LayoutError::Geometry {
                region: Some(id.to_string()),
                rect,
                reason,
            },
            other => other,
        }
    }

    /// Boundary failures the caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LayoutError::EnrichmentTimeout(_) | LayoutError::EnrichmentUnavailable(_)
        )
    }
}

fn describe_geometry(region: Option<&str>, rect: &Rect, reason: &str) -> String {
    match region {
        Some(region) => format!("invalid region {} {}: {}", region, rect, reason),
        None => format!("invalid region {}: {}", rect, reason),
    }
}
