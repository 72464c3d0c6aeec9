use crate::config::TransportConfig;
use crate::dicomweb::{InstancePayload, RetryPolicy, TransportError, WadoClient};
use crate::study::{InstanceDescriptor, StudyMetadata};
use crate::types::ResourceLevel;
use crate::utils::multipart::{is_multipart_related, DicomMultipart};
use async_trait::async_trait;
use dicom::object::InMemDicomObject;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info, instrument};

const ACCEPT_METADATA: &str = "application/dicom+json, application/json";
const ACCEPT_INSTANCE: &str = r#"multipart/related; type="application/dicom"; transfer-syntax=*"#;

/// [`WadoClient`] for a WADO-RS endpoint reachable over HTTP.
pub struct HttpWadoClient {
	http: reqwest::Client,
	base_url: String,
	retry: RetryPolicy,
	metadata_timeout: Duration,
	instance_timeout: Duration,
}

impl HttpWadoClient {
	pub fn new(base_url: &str, config: &TransportConfig) -> Result<Self, reqwest::Error> {
		let http = reqwest::Client::builder()
			.user_agent(concat!("DICOM-PDF-Renderer/", env!("CARGO_PKG_VERSION")))
			.build()?;

		Ok(Self {
			http,
			base_url: base_url.trim().trim_matches(['"', '\'']).trim_end_matches('/').to_owned(),
			retry: RetryPolicy::from_config(config),
			metadata_timeout: config.metadata_timeout(),
			instance_timeout: config.instance_timeout(),
		})
	}

	fn metadata_url(&self, study_instance_uid: &str) -> String {
		format!("{}/studies/{study_instance_uid}/metadata", self.base_url)
	}

	fn instance_url(&self, instance: &InstanceDescriptor) -> String {
		format!(
			"{}/studies/{}/series/{}/instances/{}",
			self.base_url,
			instance.study_instance_uid,
			instance.series_instance_uid,
			instance.sop_instance_uid
		)
	}

	/// Maps the response status to the transport error taxonomy.
	fn check_status(
		response: Response,
		level: ResourceLevel,
		uid: &str,
	) -> Result<Response, TransportError> {
		let status = response.status();
		if status.is_success() {
			Ok(response)
		} else if status == StatusCode::NOT_FOUND {
			Err(TransportError::NotFound {
				level,
				uid: uid.to_owned(),
			})
		} else if status.is_server_error() {
			Err(TransportError::UpstreamUnavailable {
				reason: format!("status {status}"),
			})
		} else {
			Err(TransportError::Rejected {
				status: status.as_u16(),
			})
		}
	}

	async fn fetch_metadata(&self, study_instance_uid: &str) -> Result<StudyMetadata, TransportError> {
		let response = self
			.http
			.get(self.metadata_url(study_instance_uid))
			.header(ACCEPT, ACCEPT_METADATA)
			.timeout(self.metadata_timeout)
			.send()
			.await?;
		let response = Self::check_status(response, ResourceLevel::Study, study_instance_uid)?;

		if response.status() == StatusCode::NO_CONTENT {
			return Err(TransportError::NotFound {
				level: ResourceLevel::Study,
				uid: study_instance_uid.to_owned(),
			});
		}

		let body = response.text().await?;
		let malformed = |err: serde_json::Error| TransportError::Malformed {
			reason: err.to_string(),
		};
		let objects = serde_json::from_str::<Vec<serde_json::Value>>(&body)
			.map_err(malformed)?
			.into_iter()
			.map(|object| dicom_json::from_str::<InMemDicomObject>(&object.to_string()))
			.collect::<Result<Vec<_>, _>>()
			.map_err(|err| TransportError::Malformed {
				reason: err.to_string(),
			})?;

		if objects.is_empty() {
			return Err(TransportError::NotFound {
				level: ResourceLevel::Study,
				uid: study_instance_uid.to_owned(),
			});
		}

		Ok(StudyMetadata::new(study_instance_uid, objects))
	}

	async fn fetch_instance(
		&self,
		instance: &InstanceDescriptor,
	) -> Result<InstancePayload, TransportError> {
		let response = self
			.http
			.get(self.instance_url(instance))
			.header(ACCEPT, ACCEPT_INSTANCE)
			.timeout(self.instance_timeout)
			.send()
			.await?;
		let response =
			Self::check_status(response, ResourceLevel::Instance, &instance.sop_instance_uid)?;

		let content_type = response
			.headers()
			.get(CONTENT_TYPE)
			.and_then(|value| value.to_str().ok())
			.map(ToOwned::to_owned);

		match content_type.as_deref() {
			Some(content_type) if is_multipart_related(content_type) => {
				let boundary = DicomMultipart::parse_boundary(content_type)?;
				let mut multipart = DicomMultipart::new(response.bytes_stream(), boundary);
				let part = multipart.next_part().await?.ok_or_else(|| TransportError::Malformed {
					reason: String::from("multipart response without parts"),
				})?;

				Ok(InstancePayload {
					content_type: part.content_type,
					data: part.data,
				})
			}
			_ => Ok(InstancePayload {
				content_type,
				data: response.bytes().await?,
			}),
		}
	}
}

#[async_trait]
impl WadoClient for HttpWadoClient {
	#[instrument(skip(self))]
	async fn study_metadata(&self, study_instance_uid: &str) -> Result<StudyMetadata, TransportError> {
		let metadata = self
			.retry
			.run("study metadata", || self.fetch_metadata(study_instance_uid))
			.await?;
		info!(instances = metadata.len(), "Fetched study metadata");
		Ok(metadata)
	}

	#[instrument(skip_all, fields(sop_instance_uid = instance.sop_instance_uid))]
	async fn instance_pixel_data(
		&self,
		instance: &InstanceDescriptor,
	) -> Result<InstancePayload, TransportError> {
		let payload = self
			.retry
			.run("instance retrieval", || self.fetch_instance(instance))
			.await?;
		debug!(bytes = payload.data.len(), "Retrieved instance");
		Ok(payload)
	}
}
