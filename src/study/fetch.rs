use crate::dicomweb::{TransportError, WadoClient};
use crate::rendering::{decode_instance, DecodeError, NormalizedFrame};
use crate::study::{InstanceDescriptor, StudySummary};
use crate::types::UI;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn, Instrument};

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
	/// Upper bound of instances fetched and decoded at the same time.
	pub max_workers: usize,
	pub anonymize: bool,
	/// Point in time after which outstanding instances are abandoned.
	pub deadline: Instant,
}

/// Why an instance did not contribute any frames.
#[derive(Debug, Clone, Error)]
pub enum InstanceFailure {
	#[error(transparent)]
	Transport(#[from] TransportError),
	#[error(transparent)]
	Decode(#[from] DecodeError),
	#[error("Instance has no frames")]
	NoFrames,
	#[error("Instance was abandoned at the job deadline")]
	Abandoned,
	#[error("Worker failed: {0}")]
	Worker(String),
}

impl InstanceFailure {
	/// Short machine readable name of the failure kind, used in logs and audit entries.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Transport(TransportError::NotFound { .. }) => "NotFound",
			Self::Transport(TransportError::Timeout) => "Timeout",
			Self::Transport(_) => "UpstreamUnavailable",
			Self::Decode(DecodeError::UnsupportedTransferSyntax(_)) => "UnsupportedTransferSyntax",
			Self::Decode(DecodeError::UnsupportedPhotometric(_)) => "UnsupportedPhotometric",
			Self::Decode(DecodeError::Malformed { .. }) => "DecodeError",
			Self::NoFrames => "NoFrames",
			Self::Abandoned => "Abandoned",
			Self::Worker(_) => "Internal",
		}
	}
}

/// Outcome of fetching and decoding one instance.
#[derive(Debug)]
pub enum FetchResult {
	Frames(Vec<NormalizedFrame>),
	Failed(InstanceFailure),
}

#[derive(Debug, Clone)]
pub struct FailedInstance {
	pub sop_instance_uid: UI,
	pub failure: InstanceFailure,
}

/// The renderable content of a study.
#[derive(Debug)]
pub struct StudyFetch {
	/// All frames, in page order.
	pub frames: Vec<NormalizedFrame>,
	pub summary: StudySummary,
	pub instance_count: usize,
	pub failures: Vec<FailedInstance>,
	/// Whether the deadline elapsed before every instance completed.
	pub timed_out: bool,
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
	#[error(transparent)]
	Transport(#[from] TransportError),
	#[error("None of the {instance_count} instances could be rendered")]
	NoRenderableContent {
		instance_count: usize,
		failures: Vec<FailedInstance>,
	},
	#[error("Deadline elapsed before any instance could be rendered")]
	Timeout {
		instance_count: usize,
		failures: Vec<FailedInstance>,
	},
}

/// Fetches and decodes all instances of a study with bounded parallelism.
#[derive(Clone)]
pub struct StudyFetcher {
	client: Arc<dyn WadoClient>,
}

impl StudyFetcher {
	pub fn new(client: Arc<dyn WadoClient>) -> Self {
		Self { client }
	}

	/// Discovers the instances of a study and fetches and decodes each of them as an independent
	/// unit of work. A failing instance never cancels the others.
	///
	/// Results are written into one slot per discovered instance and sorted into page order once
	/// collection ends, so that the page order does not depend on completion order.
	#[instrument(skip(self, options), fields(max_workers = options.max_workers))]
	pub async fn fetch_and_decode_study(
		&self,
		study_instance_uid: &str,
		options: FetchOptions,
	) -> Result<StudyFetch, FetchError> {
		let metadata = tokio::time::timeout_at(
			options.deadline,
			self.client.study_metadata(study_instance_uid),
		)
		.await;
		let Ok(metadata) = metadata else {
			warn!("Deadline elapsed while loading the study metadata");
			return Err(FetchError::Timeout {
				instance_count: 0,
				failures: Vec::new(),
			});
		};
		let mut metadata = metadata?;
		if options.anonymize {
			metadata.anonymize();
		}
		let summary = metadata.summary();
		let instances = metadata.instances();
		let instance_count = instances.len();

		if instance_count == 0 {
			warn!("Study metadata did not describe any instance");
			return Err(FetchError::NoRenderableContent {
				instance_count,
				failures: Vec::new(),
			});
		}

		let workers = options.max_workers.min(instance_count).max(1);
		info!(instance_count, workers, "Fetching instances");

		let sop_instance_uids: Vec<UI> = instances
			.iter()
			.map(|instance| instance.sop_instance_uid.clone())
			.collect();
		let mut slots: Vec<Option<FetchResult>> = (0..instance_count).map(|_| None).collect();

		let permits = Arc::new(Semaphore::new(workers));
		let mut tasks = JoinSet::new();
		let mut task_slots = HashMap::with_capacity(instance_count);
		for (index, instance) in instances.into_iter().enumerate() {
			let client = Arc::clone(&self.client);
			let permits = Arc::clone(&permits);
			let span = tracing::debug_span!("instance", sop_instance_uid = instance.sop_instance_uid);

			let handle = tasks.spawn(
				async move {
					let Ok(_permit) = permits.acquire_owned().await else {
						return (index, FetchResult::Failed(InstanceFailure::Abandoned));
					};
					(index, fetch_instance(client.as_ref(), instance, index).await)
				}
				.instrument(span),
			);
			task_slots.insert(handle.id(), index);
		}

		let mut timed_out = false;
		loop {
			match tokio::time::timeout_at(options.deadline, tasks.join_next()).await {
				Ok(Some(Ok((index, result)))) => {
					if let Some(slot) = slots.get_mut(index) {
						*slot = Some(result);
					}
				}
				Ok(Some(Err(err))) => {
					if let Some(slot) = task_slots.get(&err.id()).and_then(|&i| slots.get_mut(i)) {
						*slot = Some(FetchResult::Failed(InstanceFailure::Worker(err.to_string())));
					}
				}
				Ok(None) => break,
				Err(_) => {
					timed_out = true;
					warn!(
						outstanding = tasks.len(),
						"Deadline elapsed, abandoning outstanding instances"
					);
					tasks.abort_all();
					break;
				}
			}
		}

		let mut frames = Vec::new();
		let mut failures = Vec::new();
		for (slot, sop_instance_uid) in slots.into_iter().zip(sop_instance_uids) {
			match slot {
				Some(FetchResult::Frames(decoded)) => frames.extend(decoded),
				Some(FetchResult::Failed(failure)) => {
					warn!(sop_instance_uid, "Skipping instance: {failure}");
					failures.push(FailedInstance {
						sop_instance_uid,
						failure,
					});
				}
				None => failures.push(FailedInstance {
					sop_instance_uid,
					failure: InstanceFailure::Abandoned,
				}),
			}
		}

		if frames.is_empty() {
			return Err(if timed_out {
				FetchError::Timeout {
					instance_count,
					failures,
				}
			} else {
				FetchError::NoRenderableContent {
					instance_count,
					failures,
				}
			});
		}

		frames.sort_unstable_by_key(|frame| frame.key);
		info!(
			frames = frames.len(),
			failed_instances = failures.len(),
			timed_out,
			"Fetched study"
		);

		Ok(StudyFetch {
			frames,
			summary,
			instance_count,
			failures,
			timed_out,
		})
	}
}

/// Fetches one instance and decodes it on the blocking pool.
async fn fetch_instance(
	client: &dyn WadoClient,
	instance: InstanceDescriptor,
	discovery_index: usize,
) -> FetchResult {
	let payload = match client.instance_pixel_data(&instance).await {
		Ok(payload) => payload,
		Err(err) => return FetchResult::Failed(err.into()),
	};
	debug!(content_type = ?payload.content_type, "Decoding instance");

	let decoded = tokio::task::spawn_blocking(move || {
		decode_instance(&instance, &payload.data, discovery_index)
	})
	.await;

	match decoded {
		Ok(Ok(frames)) if frames.is_empty() => FetchResult::Failed(InstanceFailure::NoFrames),
		Ok(Ok(frames)) => FetchResult::Frames(frames),
		Ok(Err(err)) => FetchResult::Failed(err.into()),
		Err(err) => FetchResult::Failed(InstanceFailure::Worker(err.to_string())),
	}
}
