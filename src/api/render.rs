use crate::api::{AllowedClient, ApiError};
use crate::job::RenderRequestBody;
use crate::types::{ExamId, UI};
use crate::AppState;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/render", post(render))
		.route("/render/sync", post(render_sync))
}

#[derive(Debug, Serialize)]
struct Accepted {
	status: &'static str,
	message: &'static str,
	#[serde(rename = "examID")]
	exam_id: ExamId,
	pacs_studies_iuid: UI,
	callback_url: String,
	job_id: Uuid,
}

/// Accepts a render request and answers immediately. The outcome is delivered to `UrlCallback`.
#[instrument(skip_all)]
async fn render(
	client: AllowedClient,
	State(state): State<AppState>,
	Json(body): Json<RenderRequestBody>,
) -> Result<Json<Accepted>, ApiError> {
	info!(exam_id = body.exam_id, client = client.ip, "Received render request");
	let request = body.validate(state.config.worker_limits())?;
	let acceptance = state.jobs.submit(request)?;

	Ok(Json(Accepted {
		status: "accepted",
		message: "Request accepted for processing",
		exam_id: acceptance.exam_id,
		pacs_studies_iuid: acceptance.study_instance_uid,
		callback_url: acceptance.callback_url.to_string(),
		job_id: acceptance.job_id,
	}))
}

/// Renders the study and returns the document as attachment.
#[instrument(skip_all)]
async fn render_sync(
	client: AllowedClient,
	State(state): State<AppState>,
	Json(body): Json<RenderRequestBody>,
) -> Result<Response, ApiError> {
	info!(exam_id = body.exam_id, client = client.ip, "Received synchronous render request");
	let request = body.validate(state.config.worker_limits())?;
	let outcome = state.jobs.render_sync(&request).await?;

	Ok((
		[
			(CONTENT_TYPE, mime::APPLICATION_PDF.to_string()),
			(
				CONTENT_DISPOSITION,
				format!("attachment; filename=exam_{}.pdf", request.exam_id),
			),
		],
		outcome.document.bytes,
	)
		.into_response())
}
