use crate::config::DeliveryConfig;
use crate::types::{ExamId, UI};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// One entry of the external audit log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
	#[serde(rename = "exameID")]
	pub exam_id: ExamId,
	pub success: bool,
	pub message: String,
	pub status_code: u16,
	pub status_message: String,
	#[serde(rename = "studyIUID")]
	pub study_instance_uid: UI,
	pub instance_count: usize,
	pub failed_instances: usize,
	pub duration_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pdf_size: Option<usize>,
	pub timed_out: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_type: Option<String>,
}

/// Sink for job outcomes. Entries are posted in the background and a failing audit log never
/// affects a job.
#[derive(Debug, Clone)]
pub struct AuditLog {
	http: reqwest::Client,
	url: Option<String>,
}

impl AuditLog {
	/// Creates an audit log posting to `url`. Without a URL, entries are only logged locally.
	pub fn new(url: Option<&str>, config: &DeliveryConfig) -> Result<Self, reqwest::Error> {
		let http = reqwest::Client::builder()
			.timeout(config.log_timeout())
			.user_agent(config.user_agent.as_str())
			.build()?;
		Ok(Self {
			http,
			url: url.map(str::to_owned),
		})
	}

	/// Posts the entry with the caller's integration token. Returns the handle of the background
	/// task, or `None` if the audit log is disabled.
	pub fn log_outcome(&self, token: &str, summary: JobSummary) -> Option<JoinHandle<()>> {
		let Some(url) = self.url.clone() else {
			debug!(exam_id = summary.exam_id, "Audit log is disabled, skipping entry");
			return None;
		};
		let request = self.http.post(url).header("token", token).json(&summary);
		let span = tracing::info_span!("audit", exam_id = summary.exam_id, success = summary.success);

		Some(tokio::spawn(
			async move {
				match request.send().await.and_then(reqwest::Response::error_for_status) {
					Ok(response) => info!(status = response.status().as_u16(), "Audit entry sent"),
					Err(err) => warn!("Failed to send audit entry: {err}"),
				}
			}
			.instrument(span),
		))
	}
}
