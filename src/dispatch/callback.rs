use crate::config::DeliveryConfig;
use crate::dispatch::CallbackPayload;
use axum::http::StatusCode;
use reqwest::header::AUTHORIZATION;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use url::Url;

/// Longest part of a callback response body kept for logs and audit entries.
const MAX_BODY_EXCERPT: usize = 512;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
	#[error("Callback failed with status {status}: {body}")]
	Status { status: u16, body: String },
	#[error("Callback request failed: {0}")]
	Transport(String),
}

impl DeliveryError {
	/// Transport errors and server errors are retried. Any other response is final.
	const fn is_retryable(&self) -> bool {
		match self {
			Self::Status { status, .. } => *status >= 500,
			Self::Transport(_) => true,
		}
	}

	/// Status recorded in the audit log. Transport errors are recorded as 500.
	pub fn status(&self) -> StatusCode {
		match self {
			Self::Status { status, .. } => {
				StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
			}
			Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
	Delivered { status: u16, body: String, attempts: u32 },
	Failed { error: DeliveryError, attempts: u32 },
}

impl DeliveryOutcome {
	pub const fn is_delivered(&self) -> bool {
		matches!(self, Self::Delivered { .. })
	}
}

/// Posts job results to the callback URL of the caller.
#[derive(Debug, Clone)]
pub struct CallbackClient {
	http: reqwest::Client,
	retries: u32,
}

impl CallbackClient {
	pub fn new(config: &DeliveryConfig) -> Result<Self, reqwest::Error> {
		let http = reqwest::Client::builder()
			.timeout(config.callback_timeout())
			.user_agent(config.user_agent.as_str())
			.build()?;
		Ok(Self {
			http,
			retries: config.callback_retries,
		})
	}

	/// Delivers the payload, forwarding the caller's `Authorization` value. Never fails; the
	/// outcome tells whether the callback was accepted.
	#[instrument(skip_all, fields(url = %url, success = payload.is_success()))]
	pub async fn deliver(
		&self,
		url: &Url,
		payload: &CallbackPayload,
		authorization: &str,
	) -> DeliveryOutcome {
		let mut attempts = 0;
		loop {
			attempts += 1;
			match self.post(url, payload, authorization).await {
				Ok((status, body)) => {
					info!(status, attempts, "Callback delivered");
					return DeliveryOutcome::Delivered {
						status,
						body,
						attempts,
					};
				}
				Err(err) if err.is_retryable() && attempts <= self.retries => {
					warn!(attempts, "Callback attempt failed, retrying: {err}");
				}
				Err(err) => {
					error!(attempts, "Callback failed: {err}");
					return DeliveryOutcome::Failed {
						error: err,
						attempts,
					};
				}
			}
		}
	}

	async fn post(
		&self,
		url: &Url,
		payload: &CallbackPayload,
		authorization: &str,
	) -> Result<(u16, String), DeliveryError> {
		let mut request = self.http.post(url.clone()).json(payload);
		if !authorization.is_empty() {
			request = request.header(AUTHORIZATION, authorization);
		}

		let response = request
			.send()
			.await
			.map_err(|err| DeliveryError::Transport(err.to_string()))?;
		let status = response.status();
		let body = excerpt(response.text().await.unwrap_or_default());

		if status.is_success() {
			Ok((status.as_u16(), body))
		} else {
			Err(DeliveryError::Status {
				status: status.as_u16(),
				body,
			})
		}
	}
}

fn excerpt(mut body: String) -> String {
	if body.len() > MAX_BODY_EXCERPT {
		let mut end = MAX_BODY_EXCERPT;
		while !body.is_char_boundary(end) {
			end -= 1;
		}
		body.truncate(end);
	}
	body
}
