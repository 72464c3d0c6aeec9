use crate::types::{ExamId, UI};
use axum::http::StatusCode;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Why a job failed. Each reason has a stable machine readable code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailureReason {
	NotFound,
	UpstreamUnavailable,
	Timeout,
	Rejected,
	Malformed,
	NoRenderableContent,
	EmptyDocument,
	Internal,
}

impl FailureReason {
	pub const fn code(self) -> &'static str {
		match self {
			Self::NotFound => "NOT_FOUND",
			Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
			Self::Timeout => "TIMEOUT",
			Self::Rejected => "REJECTED",
			Self::Malformed => "MALFORMED",
			Self::NoRenderableContent => "NO_RENDERABLE_CONTENT",
			Self::EmptyDocument => "EMPTY_DOCUMENT",
			Self::Internal => "INTERNAL",
		}
	}

	/// HTTP status equivalent, used by the synchronous endpoint and in failure callbacks.
	pub const fn status(self) -> StatusCode {
		match self {
			Self::NotFound => StatusCode::NOT_FOUND,
			Self::UpstreamUnavailable | Self::Rejected | Self::Malformed => StatusCode::BAD_GATEWAY,
			Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
			Self::NoRenderableContent | Self::EmptyDocument => StatusCode::UNPROCESSABLE_ENTITY,
			Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl Display for FailureReason {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.code())
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobState {
	Accepted,
	Fetching,
	Assembling,
	Delivering,
	Completed,
	Failed(FailureReason),
}

impl JobState {
	/// The pipeline edges. Delivering is skipped by synchronous jobs, and any non-terminal state
	/// may fail.
	const fn allows(self, next: Self) -> bool {
		match (self, next) {
			(Self::Accepted, Self::Fetching)
			| (Self::Fetching, Self::Assembling)
			| (Self::Assembling, Self::Delivering | Self::Completed)
			| (Self::Delivering, Self::Completed) => true,
			(_, Self::Failed(_)) => !self.is_terminal(),
			_ => false,
		}
	}

	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed(_))
	}
}

impl Display for JobState {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Accepted => write!(f, "accepted"),
			Self::Fetching => write!(f, "fetching"),
			Self::Assembling => write!(f, "assembling"),
			Self::Delivering => write!(f, "delivering"),
			Self::Completed => write!(f, "completed"),
			Self::Failed(reason) => write!(f, "failed ({reason})"),
		}
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("Invalid job state transition from {from} to {to}")]
pub struct InvalidTransition {
	pub from: JobState,
	pub to: JobState,
}

/// A single render job. Owned by the task that executes it.
#[derive(Debug)]
pub struct Job {
	pub id: Uuid,
	pub exam_id: ExamId,
	pub study_instance_uid: UI,
	pub accepted_at: Instant,
	/// Point in time after which outstanding work is abandoned.
	pub deadline: Instant,
	state: JobState,
}

impl Job {
	pub fn new(exam_id: ExamId, study_instance_uid: UI, timeout: std::time::Duration) -> Self {
		let accepted_at = Instant::now();
		Self {
			id: Uuid::new_v4(),
			exam_id,
			study_instance_uid,
			accepted_at,
			deadline: accepted_at + timeout,
			state: JobState::Accepted,
		}
	}

	pub const fn state(&self) -> JobState {
		self.state
	}

	/// Moves the job along the pipeline. Stages are neither skipped nor revisited and terminal
	/// states are never left.
	pub fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
		if !self.state.allows(next) {
			return Err(InvalidTransition {
				from: self.state,
				to: next,
			});
		}
		debug!(job = %self.id, from = %self.state, to = %next, "Job state changed");
		self.state = next;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	fn job() -> Job {
		Job::new(1, String::from("1.2.3"), Duration::from_secs(60))
	}

	#[test]
	fn happy_path() {
		let mut job = job();
		for state in [
			JobState::Fetching,
			JobState::Assembling,
			JobState::Delivering,
			JobState::Completed,
		] {
			job.transition(state).unwrap();
		}
		assert_eq!(job.state(), JobState::Completed);
	}

	#[test]
	fn any_active_state_can_fail() {
		let mut job = job();
		job.transition(JobState::Fetching).unwrap();
		job.transition(JobState::Failed(FailureReason::NotFound)).unwrap();
		assert_eq!(job.state(), JobState::Failed(FailureReason::NotFound));
	}

	#[test]
	fn states_are_not_revisited() {
		let mut job = job();
		job.transition(JobState::Fetching).unwrap();
		job.transition(JobState::Assembling).unwrap();
		assert_eq!(
			job.transition(JobState::Fetching),
			Err(InvalidTransition {
				from: JobState::Assembling,
				to: JobState::Fetching,
			})
		);
		assert!(job.transition(JobState::Assembling).is_err());
	}

	#[test]
	fn stages_cannot_be_skipped() {
		let mut job = job();
		assert_eq!(
			job.transition(JobState::Completed),
			Err(InvalidTransition {
				from: JobState::Accepted,
				to: JobState::Completed,
			})
		);
		assert!(job.transition(JobState::Assembling).is_err());
		assert_eq!(job.state(), JobState::Accepted);

		job.transition(JobState::Fetching).unwrap();
		assert!(job.transition(JobState::Delivering).is_err());
		assert!(job.transition(JobState::Completed).is_err());
	}

	#[test]
	fn synchronous_jobs_complete_without_delivery() {
		let mut job = job();
		job.transition(JobState::Fetching).unwrap();
		job.transition(JobState::Assembling).unwrap();
		job.transition(JobState::Completed).unwrap();
		assert_eq!(job.state(), JobState::Completed);
	}

	#[test]
	fn delivery_cannot_return_to_assembling() {
		let mut job = job();
		for state in [JobState::Fetching, JobState::Assembling, JobState::Delivering] {
			job.transition(state).unwrap();
		}
		assert!(job.transition(JobState::Assembling).is_err());
		assert_eq!(job.state(), JobState::Delivering);
	}

	#[test]
	fn terminal_states_are_final() {
		let mut job = job();
		job.transition(JobState::Failed(FailureReason::Timeout)).unwrap();
		assert!(job.transition(JobState::Completed).is_err());
		assert!(job.transition(JobState::Failed(FailureReason::Internal)).is_err());
	}

	#[test]
	fn deadline_counts_from_acceptance() {
		let job = job();
		assert_eq!(job.deadline - job.accepted_at, Duration::from_secs(60));
	}
}
