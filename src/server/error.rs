use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;

use super::models::ErrorResponse;
use crate::error::LayoutError;

#[derive(Debug)]
pub(crate) struct ServerError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl ServerError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

/// Status for the first typed cause found in the error chain.
impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        let status = err
            .chain()
            .find_map(|cause| {
                if let Some(layout) = cause.downcast_ref::<LayoutError>() {
                    Some(layout_status(layout))
                } else if let Some(io) = cause.downcast_ref::<io::Error>() {
                    Some(io_status(io))
                } else if cause.downcast_ref::<image::ImageError>().is_some() {
                    Some(StatusCode::BAD_REQUEST)
                } else {
                    None
                }
            })
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            message: format!("{:#}", err),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn layout_status(err: &LayoutError) -> StatusCode {
    match err {
        LayoutError::Geometry { .. }
        | LayoutError::MalformedDocument(_)
        | LayoutError::UnknownRegion(_)
        | LayoutError::Image(_) => StatusCode::BAD_REQUEST,
        LayoutError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        LayoutError::EnrichmentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LayoutError::EnrichmentTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        LayoutError::Io(io) => io_status(io),
        LayoutError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn io_status(err: &io::Error) -> StatusCode {
    match err.kind() {
        io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
