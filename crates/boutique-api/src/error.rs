use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;
use tracing::error;

use boutique_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(String),

    #[error("spawn_blocking join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Store(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Store(_) | Self::Join(_) => {
                error!("{}", self);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
