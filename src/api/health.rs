use crate::api::{allowed_ips, AllowedClient};
use crate::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

pub fn routes() -> Router<AppState> {
	Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
struct Health {
	status: &'static str,
	dicom_server: &'static str,
	ip_validation: &'static str,
	allowed_ips_count: usize,
	jobs_in_flight: usize,
}

async fn health(_client: AllowedClient, State(state): State<AppState>) -> impl IntoResponse {
	let allowed_ips_count = allowed_ips(&state.config).len();
	Json(Health {
		status: "ok",
		dicom_server: if state.config.dicom_wado_url.trim().is_empty() {
			"not_configured"
		} else {
			"configured"
		},
		ip_validation: if allowed_ips_count == 0 {
			"disabled"
		} else {
			"enabled"
		},
		allowed_ips_count,
		jobs_in_flight: state.jobs.jobs_in_flight(),
	})
}
