//! DICOMweb transport.
//! - Study metadata is retrieved with WADO-RS `/studies/{study}/metadata`.
//! - Instances are retrieved with WADO-RS `/studies/{study}/series/{series}/instances/{instance}`
//!   as `multipart/related; type="application/dicom"`.
//!
//! Idempotent reads are retried according to a [`RetryPolicy`].

mod client;
mod retry;

pub use client::HttpWadoClient;
pub use retry::RetryPolicy;

use crate::study::{InstanceDescriptor, StudyMetadata};
use crate::types::ResourceLevel;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Read access to a DICOMweb archive.
#[async_trait]
pub trait WadoClient: Send + Sync {
	/// Retrieves the metadata of all instances of a study.
	async fn study_metadata(&self, study_instance_uid: &str) -> Result<StudyMetadata, TransportError>;

	/// Retrieves the encoded instance referenced by the descriptor.
	async fn instance_pixel_data(
		&self,
		instance: &InstanceDescriptor,
	) -> Result<InstancePayload, TransportError>;
}

/// Raw bytes of a retrieved instance together with the content type they were delivered as.
#[derive(Debug, Clone)]
pub struct InstancePayload {
	pub content_type: Option<String>,
	pub data: Bytes,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
	#[error("{level} {uid} does not exist in the archive")]
	NotFound { level: ResourceLevel, uid: String },
	#[error("Archive is unavailable: {reason}")]
	UpstreamUnavailable { reason: String },
	#[error("Request to the archive timed out")]
	Timeout,
	#[error("Archive rejected the request with status {status}")]
	Rejected { status: u16 },
	#[error("Archive returned an unreadable response: {reason}")]
	Malformed { reason: String },
}

impl TransportError {
	/// Only transient failures are worth another attempt. A 4xx response never is.
	pub const fn is_retryable(&self) -> bool {
		matches!(self, Self::UpstreamUnavailable { .. } | Self::Timeout)
	}
}

impl From<reqwest::Error> for TransportError {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() {
			Self::Timeout
		} else if err.is_decode() {
			Self::Malformed {
				reason: err.to_string(),
			}
		} else {
			Self::UpstreamUnavailable {
				reason: err.to_string(),
			}
		}
	}
}

impl From<multer::Error> for TransportError {
	fn from(err: multer::Error) -> Self {
		match err {
			multer::Error::StreamReadFailed(source) => Self::UpstreamUnavailable {
				reason: source.to_string(),
			},
			err => Self::Malformed {
				reason: err.to_string(),
			},
		}
	}
}
