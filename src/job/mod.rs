//! Render jobs. A job fetches a study, assembles the document and, on the asynchronous path,
//! reports the outcome to the callback URL of the caller and to the audit log.

mod request;
mod state;

pub use request::{RenderRequest, RenderRequestBody, ValidationError};
pub use state::{FailureReason, InvalidTransition, Job, JobState};

use crate::config::AppConfig;
use crate::dicomweb::{HttpWadoClient, TransportError};
use crate::dispatch::{
	AuditLog, CallbackClient, CallbackPayload, DeliveryOutcome, EchoedCodes, ErrorDescriptor,
	JobSummary,
};
use crate::document::{assemble, AssemblyError, RenderedDocument};
use crate::study::{FetchError, FetchOptions, StudyFetch, StudyFetcher};
use crate::types::{ExamId, UI};
use axum::http::StatusCode;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, info, instrument, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// How much of the study made it into the document.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
	pub instance_count: usize,
	pub failed_instances: usize,
	pub timed_out: bool,
}

impl From<&StudyFetch> for FetchStats {
	fn from(fetch: &StudyFetch) -> Self {
		Self {
			instance_count: fetch.instance_count,
			failed_instances: fetch.failures.len(),
			timed_out: fetch.timed_out,
		}
	}
}

#[derive(Debug)]
pub struct RenderOutcome {
	pub document: RenderedDocument,
	pub stats: FetchStats,
}

/// A job-level error. Instance-level failures only end up here if nothing was renderable.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct JobFailure {
	pub reason: FailureReason,
	pub message: String,
	pub stats: FetchStats,
}

impl JobFailure {
	fn new(reason: FailureReason, message: impl Into<String>) -> Self {
		Self {
			reason,
			message: message.into(),
			stats: FetchStats::default(),
		}
	}

	const fn with_stats(mut self, stats: FetchStats) -> Self {
		self.stats = stats;
		self
	}

	pub const fn status(&self) -> StatusCode {
		self.reason.status()
	}

	pub fn descriptor(&self) -> ErrorDescriptor {
		ErrorDescriptor {
			code: self.status().as_u16(),
			reason: self.reason.code(),
			message: self.message.clone(),
		}
	}
}

impl From<TransportError> for JobFailure {
	fn from(err: TransportError) -> Self {
		let reason = match err {
			TransportError::NotFound { .. } => FailureReason::NotFound,
			TransportError::UpstreamUnavailable { .. } => FailureReason::UpstreamUnavailable,
			TransportError::Timeout => FailureReason::Timeout,
			TransportError::Rejected { .. } => FailureReason::Rejected,
			TransportError::Malformed { .. } => FailureReason::Malformed,
		};
		Self::new(reason, err.to_string())
	}
}

impl From<FetchError> for JobFailure {
	fn from(err: FetchError) -> Self {
		let message = err.to_string();
		match err {
			FetchError::Transport(err) => err.into(),
			FetchError::NoRenderableContent {
				instance_count,
				failures,
			} => Self::new(FailureReason::NoRenderableContent, message).with_stats(FetchStats {
				instance_count,
				failed_instances: failures.len(),
				timed_out: false,
			}),
			FetchError::Timeout {
				instance_count,
				failures,
			} => Self::new(FailureReason::Timeout, message).with_stats(FetchStats {
				instance_count,
				failed_instances: failures.len(),
				timed_out: true,
			}),
		}
	}
}

impl From<AssemblyError> for JobFailure {
	fn from(err: AssemblyError) -> Self {
		let reason = match err {
			AssemblyError::EmptyDocument => FailureReason::EmptyDocument,
			AssemblyError::Encoding(_) | AssemblyError::Pdf(_) => FailureReason::Internal,
		};
		Self::new(reason, err.to_string())
	}
}

impl From<JoinError> for JobFailure {
	fn from(err: JoinError) -> Self {
		Self::new(FailureReason::Internal, format!("Worker failed: {err}"))
	}
}

impl From<InvalidTransition> for JobFailure {
	fn from(err: InvalidTransition) -> Self {
		Self::new(FailureReason::Internal, err.to_string())
	}
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
	#[error("UrlCallback is required for asynchronous rendering")]
	MissingCallbackUrl,
	#[error("Request for examID {exam_id} is already being processed")]
	AlreadyProcessing {
		exam_id: ExamId,
		study_instance_uid: UI,
	},
}

/// Returned once a job has been admitted. The job itself runs in the background.
#[derive(Debug, Clone)]
pub struct Acceptance {
	pub job_id: Uuid,
	pub exam_id: ExamId,
	pub study_instance_uid: UI,
	pub callback_url: Url,
}

type JobKey = (ExamId, UI);

/// Keys of the jobs that are currently running.
#[derive(Debug, Clone, Default)]
struct Admissions(Arc<Mutex<HashSet<JobKey>>>);

impl Admissions {
	fn admit(&self, key: JobKey) -> Option<Admission> {
		let admitted = self
			.0
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(key.clone());
		admitted.then(|| Admission {
			registry: self.clone(),
			key,
		})
	}

	fn len(&self) -> usize {
		self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
	}
}

/// Releases the key of a job when the job ends, however it ends.
#[derive(Debug)]
struct Admission {
	registry: Admissions,
	key: JobKey,
}

impl Drop for Admission {
	fn drop(&mut self) {
		self.registry
			.0
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(&self.key);
	}
}

#[derive(Clone)]
pub struct JobOrchestrator {
	fetcher: StudyFetcher,
	job_timeout: Duration,
	callbacks: CallbackClient,
	audit: AuditLog,
	admissions: Admissions,
}

impl JobOrchestrator {
	pub fn new(
		fetcher: StudyFetcher,
		job_timeout: Duration,
		callbacks: CallbackClient,
		audit: AuditLog,
	) -> Self {
		Self {
			fetcher,
			job_timeout,
			callbacks,
			audit,
			admissions: Admissions::default(),
		}
	}

	/// Wires the orchestrator to the configured archive, callback client and audit log.
	pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
		let client = HttpWadoClient::new(&config.dicom_wado_url, &config.transport)?;
		Ok(Self::new(
			StudyFetcher::new(Arc::new(client)),
			config.job.timeout(),
			CallbackClient::new(&config.delivery)?,
			AuditLog::new(config.audit_log_url(), &config.delivery)?,
		))
	}

	/// Number of asynchronous jobs that are currently running.
	pub fn jobs_in_flight(&self) -> usize {
		self.admissions.len()
	}

	/// Admits a job and starts it in the background. Returns before any archive request is made.
	pub fn submit(&self, request: RenderRequest) -> Result<Acceptance, SubmitError> {
		let Some(callback_url) = request.callback_url.clone() else {
			return Err(SubmitError::MissingCallbackUrl);
		};
		let key = (request.exam_id, request.study_instance_uid.clone());
		let Some(admission) = self.admissions.admit(key) else {
			warn!(exam_id = request.exam_id, "Request is already being processed");
			return Err(SubmitError::AlreadyProcessing {
				exam_id: request.exam_id,
				study_instance_uid: request.study_instance_uid,
			});
		};

		let job = Job::new(request.exam_id, request.study_instance_uid.clone(), self.job_timeout);
		let acceptance = Acceptance {
			job_id: job.id,
			exam_id: request.exam_id,
			study_instance_uid: request.study_instance_uid.clone(),
			callback_url: callback_url.clone(),
		};
		let span = tracing::info_span!(
			"job",
			job = %job.id,
			exam_id = request.exam_id,
			study = %request.study_instance_uid
		);
		info!(job = %job.id, exam_id = request.exam_id, "Accepted render request");

		tokio::spawn(
			self.clone()
				.run(job, request, callback_url, admission)
				.instrument(span),
		);
		Ok(acceptance)
	}

	/// Renders the study and returns the document directly. No callback and no audit entry.
	#[instrument(skip_all, fields(exam_id = request.exam_id, study = %request.study_instance_uid))]
	pub async fn render_sync(&self, request: &RenderRequest) -> Result<RenderOutcome, JobFailure> {
		let mut job = Job::new(request.exam_id, request.study_instance_uid.clone(), self.job_timeout);
		let result = self.render(&mut job, request).await;
		match &result {
			Ok(outcome) => {
				advance(&mut job, JobState::Completed);
				info!(
					state = %job.state(),
					pages = outcome.document.page_count(),
					"Rendered study"
				);
			}
			Err(failure) => {
				advance(&mut job, JobState::Failed(failure.reason));
				warn!(reason = %failure.reason, "Failed to render study: {failure}");
			}
		}
		result
	}

	/// Fetching and assembling, shared by both paths.
	async fn render(&self, job: &mut Job, request: &RenderRequest) -> Result<RenderOutcome, JobFailure> {
		job.transition(JobState::Fetching)?;
		let options = FetchOptions {
			max_workers: request.options.max_workers,
			anonymize: request.options.anonymize,
			deadline: job.deadline,
		};
		let fetch = self
			.fetcher
			.fetch_and_decode_study(&request.study_instance_uid, options)
			.await?;
		let stats = FetchStats::from(&fetch);

		job.transition(JobState::Assembling)
			.map_err(|err| JobFailure::from(err).with_stats(stats))?;
		let cover_page = request.options.cover_page;
		let StudyFetch {
			frames, summary, ..
		} = fetch;
		let document = tokio::task::spawn_blocking(move || assemble(&frames, cover_page, &summary))
			.await
			.map_err(|err| JobFailure::from(err).with_stats(stats))?
			.map_err(|err| JobFailure::from(err).with_stats(stats))?;

		Ok(RenderOutcome { document, stats })
	}

	async fn run(self, mut job: Job, request: RenderRequest, callback_url: Url, _admission: Admission) {
		let result = self.render(&mut job, &request).await;
		let token = request.credentials.integration_token.as_str();

		let (summary, delivery) = match result {
			Ok(outcome) => {
				advance(&mut job, JobState::Delivering);
				let payload = CallbackPayload::success(
					request.exam_id,
					&request.study_instance_uid,
					&outcome.document.bytes,
					EchoedCodes {
						authorization_code: &request.billing.authorization_code,
						billing_code: &request.billing.billing_code,
						procedure_code: &request.billing.procedure_code,
					},
				);
				let delivery = self
					.callbacks
					.deliver(&callback_url, &payload, &request.credentials.authorization)
					.await;
				advance(&mut job, JobState::Completed);

				let duration = job.accepted_at.elapsed();
				info!(
					pages = outcome.document.page_count(),
					bytes = outcome.document.size(),
					duration_ms = millis(duration),
					"Job completed"
				);
				let summary = JobSummary {
					message: completion_message(&outcome, duration),
					pdf_size: Some(outcome.document.size()),
					..job_summary(&job, outcome.stats, StatusCode::OK)
				};
				(summary, delivery)
			}
			Err(failure) => {
				advance(&mut job, JobState::Failed(failure.reason));
				error!(reason = %failure.reason, "Job failed: {failure}");
				let payload = CallbackPayload::failure(
					request.exam_id,
					&request.study_instance_uid,
					failure.descriptor(),
				);
				let delivery = self
					.callbacks
					.deliver(&callback_url, &payload, &request.credentials.authorization)
					.await;

				let summary = JobSummary {
					message: format!("Error rendering study: {failure}"),
					error_type: Some(failure.reason.code().to_owned()),
					..job_summary(&job, failure.stats, failure.status())
				};
				(summary, delivery)
			}
		};

		self.audit.log_outcome(token, summary.clone());
		if let DeliveryOutcome::Failed { error, attempts } = delivery {
			let status = error.status();
			self.audit.log_outcome(token, JobSummary {
				success: false,
				message: format!("Callback failed after {attempts} attempt(s): {error}"),
				status_code: status.as_u16(),
				status_message: status_message(status),
				error_type: Some(String::from("CALLBACK_FAILED")),
				..summary
			});
		}
	}
}

fn advance(job: &mut Job, next: JobState) {
	if let Err(err) = job.transition(next) {
		error!("{err}");
	}
}

fn job_summary(job: &Job, stats: FetchStats, status: StatusCode) -> JobSummary {
	JobSummary {
		exam_id: job.exam_id,
		success: status.is_success(),
		message: String::new(),
		status_code: status.as_u16(),
		status_message: status_message(status),
		study_instance_uid: job.study_instance_uid.clone(),
		instance_count: stats.instance_count,
		failed_instances: stats.failed_instances,
		duration_ms: millis(job.accepted_at.elapsed()),
		pdf_size: None,
		timed_out: stats.timed_out,
		error_type: None,
	}
}

fn completion_message(outcome: &RenderOutcome, duration: Duration) -> String {
	let stats = outcome.stats;
	let mut message = format!(
		"Rendered {} pages from {} of {} instances in {:.2}s",
		outcome.document.page_count(),
		stats.instance_count - stats.failed_instances,
		stats.instance_count,
		duration.as_secs_f64()
	);
	if stats.timed_out {
		message.push_str(", deadline elapsed before all instances were retrieved");
	}
	message
}

fn status_message(status: StatusCode) -> String {
	status.canonical_reason().unwrap_or_default().to_owned()
}

fn millis(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
