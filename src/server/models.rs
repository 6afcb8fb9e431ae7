use serde::{Deserialize, Serialize};

use crate::geometry::RawRect;

#[derive(Debug, Deserialize)]
pub(crate) struct SaveRectanglesRequest {
    pub(crate) filename: String,
    pub(crate) rectangles: Vec<RawRect>,
    #[serde(default, rename = "userIntention", alias = "user_intention")]
    pub(crate) user_intention: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SaveRectanglesResponse {
    pub(crate) message: String,
    pub(crate) saved_image: String,
    pub(crate) document: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnrichRequest {
    pub(crate) saved_image: String,
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ComposeRequest {
    pub(crate) saved_image: String,
    #[serde(default)]
    pub(crate) png: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadResponse {
    pub(crate) filename: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
