use crate::job::{JobFailure, SubmitError, ValidationError};
use crate::AppState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;

mod access;
mod health;
mod render;

pub use access::{allowed_ips, AllowedClient};

/// Prefix of all endpoints.
pub const BASE_PATH: &str = "/pdf-generator";

pub fn routes() -> Router<AppState> {
	Router::new().nest(
		BASE_PATH,
		Router::new()
			.merge(health::routes())
			.merge(render::routes()),
	)
}

/// Errors returned to API callers as `{"detail": ..., "reason": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
	#[error("Access denied: Your IP address is not authorized to access this service")]
	Forbidden,
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error(transparent)]
	Submit(#[from] SubmitError),
	#[error(transparent)]
	Job(#[from] JobFailure),
}

impl ApiError {
	const fn status(&self) -> StatusCode {
		match self {
			Self::Forbidden => StatusCode::FORBIDDEN,
			Self::Validation(_) | Self::Submit(SubmitError::MissingCallbackUrl) => {
				StatusCode::UNPROCESSABLE_ENTITY
			}
			Self::Submit(SubmitError::AlreadyProcessing { .. }) => StatusCode::CONFLICT,
			Self::Job(failure) => failure.status(),
		}
	}

	const fn reason(&self) -> &'static str {
		match self {
			Self::Forbidden => "FORBIDDEN",
			Self::Validation(_) | Self::Submit(SubmitError::MissingCallbackUrl) => "INVALID_REQUEST",
			Self::Submit(SubmitError::AlreadyProcessing { .. }) => "ALREADY_PROCESSING",
			Self::Job(failure) => failure.reason.code(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = json!({
			"detail": self.to_string(),
			"reason": self.reason(),
		});
		(self.status(), Json(body)).into_response()
	}
}
