//! The closed set of ways a gateway request can fail.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::extractor::ExtractorError;
use crate::stream::StreamError;
use crate::video_ref::VideoRefError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Please provide a YouTube URL")]
    MissingUrl,
    #[error("Invalid YouTube URL")]
    InvalidUrl(#[source] VideoRefError),
    #[error("Invalid video ID")]
    InvalidVideoId,
    #[error("Invalid format itag")]
    InvalidItag,
    #[error("Failed to fetch video information. It might be private, restricted, or an invalid link.")]
    InfoUnavailable(#[source] ExtractorError),
    #[error("Failed to download video.")]
    VideoDownload(#[source] StreamError),
    #[error("Failed to download audio.")]
    AudioDownload(#[source] StreamError),
    #[error("Error during video processing")]
    Processing(#[source] StreamError),
    #[error("Request failed")]
    Unhandled,
    #[error("Not found")]
    NotFound,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::InvalidUrl(_) | Self::InvalidVideoId | Self::InvalidItag => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InfoUnavailable(_)
            | Self::VideoDownload(_)
            | Self::AudioDownload(_)
            | Self::Processing(_)
            | Self::Unhandled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            let cause = std::error::Error::source(&self).map(ToString::to_string);
            error!(error = %self, cause = cause.as_deref().unwrap_or("-"), "request failed");
        }

        // The mux endpoint has always answered with plain text.
        if matches!(self, Self::Processing(_)) {
            return (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                self.to_string(),
            )
                .into_response();
        }

        let body = serde_json::json!({
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, GatewayError>;
