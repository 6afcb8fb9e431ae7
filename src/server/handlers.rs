use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::error::ServerError;
use super::models::{
    ComposeRequest, EnrichRequest, SaveRectanglesRequest, SaveRectanglesResponse, UploadResponse,
};
use super::state::ServerState;
use crate::pipeline::ComposedLayout;
use crate::settings::Settings;
use crate::store::{self, ArtifactId};

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub async fn run_server(settings: Settings, addr: String) -> Result<()> {
    let app = router(ServerState::new(settings));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/save_rectangles", post(save_rectangles))
        .route("/enrich", post(enrich))
        .route("/compose", post(compose))
        .route("/uploads/:filename", get(download).put(upload))
        .with_state(Arc::new(state))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,PUT,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn save_rectangles(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<SaveRectanglesRequest>,
) -> Result<Json<SaveRectanglesResponse>, ServerError> {
    store::validate_name(&payload.filename)
        .map_err(|err| ServerError::bad_request(err.to_string()))?;
    let saved = run_blocking(move || {
        state.pipeline.save_rectangles(
            &payload.filename,
            &payload.rectangles,
            payload.user_intention.as_deref().unwrap_or_default(),
        )
    })
    .await?;
    Ok(Json(SaveRectanglesResponse {
        message: "rectangles and annotated image saved".to_string(),
        saved_image: saved.saved_image,
        document: saved.document,
    }))
}

async fn enrich(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<EnrichRequest>,
) -> Result<Json<Value>, ServerError> {
    ArtifactId::parse(&payload.saved_image)
        .map_err(|err| ServerError::bad_request(err.to_string()))?;
    let service = (state.connect)(payload.model.as_deref(), payload.key.as_deref())
        .map_err(|err| ServerError::bad_request(format!("{:#}", err)))?;
    let document = state.pipeline.enrich(&payload.saved_image, service).await?;
    Ok(Json(document.to_value()))
}

async fn compose(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<ComposeRequest>,
) -> Result<Json<ComposedLayout>, ServerError> {
    ArtifactId::parse(&payload.saved_image)
        .map_err(|err| ServerError::bad_request(err.to_string()))?;
    let composed =
        run_blocking(move || state.pipeline.compose(&payload.saved_image, payload.png)).await?;
    Ok(Json(composed))
}

async fn download(
    State(state): State<Arc<ServerState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    store::validate_name(&filename).map_err(|err| ServerError::bad_request(err.to_string()))?;
    let bytes = state.pipeline.store().read(&filename)?;
    Ok((
        [(header::CONTENT_TYPE, content_type(&filename))],
        bytes,
    ))
}

async fn upload(
    State(state): State<Arc<ServerState>>,
    Path(filename): Path<String>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ServerError> {
    store::validate_name(&filename).map_err(|err| ServerError::bad_request(err.to_string()))?;
    if body.is_empty() {
        return Err(ServerError::bad_request("upload body is empty"));
    }
    let stored = run_blocking(move || {
        state
            .pipeline
            .store()
            .import_source(&filename, body.to_vec())
    })
    .await
    .map_err(|err| {
        if err.status == StatusCode::INTERNAL_SERVER_ERROR {
            ServerError::bad_request(err.message)
        } else {
            err
        }
    })?;
    Ok(Json(UploadResponse { filename: stored }))
}

/// Runs synchronous image work off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, ServerError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| ServerError::internal(format!("server task failed: {}", err)))?
        .map_err(ServerError::from)
}

fn content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "json" => "application/json; charset=utf-8",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
