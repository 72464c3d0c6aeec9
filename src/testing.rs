//! Shared test fixtures: synthetic CT instances, an in-memory archive and an HTTP archive that also
//! records callback and audit log requests.

use crate::config::AppConfig;
use crate::dicomweb::{InstancePayload, TransportError, WadoClient};
use crate::study::attributes::AttributeExt;
use crate::study::{InstanceDescriptor, StudyMetadata};
use crate::types::ResourceLevel;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use dicom::core::value::{PixelFragmentSequence, Value};
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::tags;
use dicom::object::mem::InMemElement;
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_json::DicomJson;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const STUDY_UID: &str = "1.2.826.0.1.3680043.2.1125.1";
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
pub const JPEG_LS_LOSSLESS: &str = "1.2.840.10008.1.2.4.80";
pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";
const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const BOUNDARY: &str = "fixture-boundary";
const STALL: Duration = Duration::from_secs(60);

pub fn series_uid(series: i64) -> String {
	format!("{STUDY_UID}.{series}")
}

pub fn sop_uid(series: i64, instance: i64) -> String {
	format!("{STUDY_UID}.{series}.{instance}")
}

/// Encodes an object as a Part-10 file, preamble included.
pub fn part10(object: InMemDicomObject, transfer_syntax: &str) -> Vec<u8> {
	let sop_class_uid = object
		.string(tags::SOP_CLASS_UID)
		.unwrap_or_else(|| CT_IMAGE_STORAGE.to_owned());
	let sop_instance_uid = object.string(tags::SOP_INSTANCE_UID).unwrap();

	let file = object
		.with_meta(
			FileMetaTableBuilder::new()
				.transfer_syntax(transfer_syntax)
				.media_storage_sop_class_uid(sop_class_uid)
				.media_storage_sop_instance_uid(sop_instance_uid),
		)
		.unwrap();

	let mut bytes = Vec::new();
	file.write_all(&mut bytes).unwrap();
	bytes
}

/// Pixel Data holding one compressed fragment per frame, without a basic offset table.
pub fn encapsulated_pixel_data(fragments: Vec<Vec<u8>>) -> InMemElement {
	DataElement::new(
		tags::PIXEL_DATA,
		VR::OB,
		Value::PixelSequence(PixelFragmentSequence::new(Vec::<u32>::new(), fragments)),
	)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Behavior {
	Healthy,
	/// Served, but not a DICOM file.
	Corrupted,
	/// Listed in the metadata, but retrieval fails with 404.
	Missing,
	/// Retrieval never completes in time.
	Stalled,
}

/// A 4x4 16-bit CT instance of the fixture study.
#[derive(Debug, Clone)]
pub struct FixtureInstance {
	pub series: i64,
	pub instance: i64,
	pub frames: u32,
	transfer_syntax: &'static str,
	behavior: Behavior,
}

impl FixtureInstance {
	pub const fn ct(series: i64, instance: i64) -> Self {
		Self {
			series,
			instance,
			frames: 1,
			transfer_syntax: EXPLICIT_VR_LE,
			behavior: Behavior::Healthy,
		}
	}

	pub const fn with_frames(mut self, frames: u32) -> Self {
		self.frames = frames;
		self
	}

	/// Serves the instance in an encapsulated transfer syntax. The fragment is not a valid
	/// compressed image.
	pub const fn with_transfer_syntax(mut self, transfer_syntax: &'static str) -> Self {
		self.transfer_syntax = transfer_syntax;
		self
	}

	pub const fn corrupted(mut self) -> Self {
		self.behavior = Behavior::Corrupted;
		self
	}

	pub const fn missing(mut self) -> Self {
		self.behavior = Behavior::Missing;
		self
	}

	pub const fn stalled(mut self) -> Self {
		self.behavior = Behavior::Stalled;
		self
	}

	pub fn sop_instance_uid(&self) -> String {
		sop_uid(self.series, self.instance)
	}

	/// Study, series and instance attributes without pixel data.
	pub fn metadata(&self) -> InMemDicomObject {
		let mut object = InMemDicomObject::new_empty();
		object.put_str(tags::PATIENT_NAME, VR::PN, "DOE^JANE");
		object.put_str(tags::PATIENT_ID, VR::LO, "P-12345");
		object.put_str(tags::PATIENT_BIRTH_DATE, VR::DA, "19700101");
		object.put_str(tags::STUDY_INSTANCE_UID, VR::UI, STUDY_UID);
		object.put_str(tags::STUDY_DATE, VR::DA, "20240115");
		object.put_str(tags::ACCESSION_NUMBER, VR::SH, "ACC-0001");
		object.put_str(tags::STUDY_DESCRIPTION, VR::LO, "CT CHEST");
		object.put_str(tags::MODALITY, VR::CS, "CT");
		object.put_str(tags::SERIES_INSTANCE_UID, VR::UI, series_uid(self.series));
		object.put_str(tags::SERIES_NUMBER, VR::IS, self.series.to_string());
		object.put_str(tags::SERIES_DESCRIPTION, VR::LO, format!("AXIAL {}", self.series));
		object.put_str(tags::SOP_CLASS_UID, VR::UI, CT_IMAGE_STORAGE);
		object.put_str(tags::SOP_INSTANCE_UID, VR::UI, self.sop_instance_uid());
		object.put_str(tags::INSTANCE_NUMBER, VR::IS, self.instance.to_string());
		object.put_str(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
		object.put_str(tags::NUMBER_OF_FRAMES, VR::IS, self.frames.to_string());
		object.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(4u16)));
		object.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(4u16)));
		object
	}

	/// The complete instance, including pixel data.
	pub fn object(&self) -> InMemDicomObject {
		let mut object = self.metadata();
		object.put(DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1u16)));
		object.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16u16)));
		object.put(DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(12u16)));
		object.put(DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(11u16)));
		object.put(DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0u16)));
		object.put_str(tags::RESCALE_INTERCEPT, VR::DS, "-1024");
		object.put_str(tags::RESCALE_SLOPE, VR::DS, "1");
		object.put_str(tags::WINDOW_CENTER, VR::DS, "40");
		object.put_str(tags::WINDOW_WIDTH, VR::DS, "400");

		let samples: Vec<u16> = (0..16 * self.frames)
			.map(|i| u16::try_from(800 + i * 10).unwrap())
			.collect();
		object.put(DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(samples.into())));
		object
	}

	pub fn bytes(&self) -> Vec<u8> {
		match self.behavior {
			Behavior::Corrupted => b"this is not a DICOM file".to_vec(),
			_ if self.transfer_syntax == EXPLICIT_VR_LE => part10(self.object(), EXPLICIT_VR_LE),
			_ => {
				let mut object = self.object();
				object.put(encapsulated_pixel_data(vec![vec![0; 32]]));
				part10(object, self.transfer_syntax)
			}
		}
	}
}

fn find<'a>(instances: &'a [FixtureInstance], sop_instance_uid: &str) -> Option<&'a FixtureInstance> {
	instances
		.iter()
		.find(|instance| instance.sop_instance_uid() == sop_instance_uid)
}

#[derive(Debug, Copy, Clone)]
enum Delay {
	None,
	Fixed(Duration),
	Random(Duration),
}

/// In-memory [`WadoClient`] serving the fixture study.
#[derive(Debug)]
pub struct FakeArchive {
	instances: Vec<FixtureInstance>,
	delay: Delay,
	in_flight: AtomicUsize,
	pub peak_in_flight: AtomicUsize,
}

impl FakeArchive {
	pub fn new(instances: Vec<FixtureInstance>) -> Self {
		Self {
			instances,
			delay: Delay::None,
			in_flight: AtomicUsize::new(0),
			peak_in_flight: AtomicUsize::new(0),
		}
	}

	pub fn study_uid() -> String {
		STUDY_UID.to_owned()
	}

	pub fn with_fixed_delay(mut self, delay: Duration) -> Self {
		self.delay = Delay::Fixed(delay);
		self
	}

	pub fn with_random_delays(mut self, max: Duration) -> Self {
		self.delay = Delay::Random(max);
		self
	}
}

#[async_trait]
impl WadoClient for FakeArchive {
	async fn study_metadata(&self, study_instance_uid: &str) -> Result<StudyMetadata, TransportError> {
		if study_instance_uid != STUDY_UID {
			return Err(TransportError::NotFound {
				level: ResourceLevel::Study,
				uid: study_instance_uid.to_owned(),
			});
		}
		let objects = self.instances.iter().map(FixtureInstance::metadata).collect();
		Ok(StudyMetadata::new(study_instance_uid, objects))
	}

	async fn instance_pixel_data(
		&self,
		instance: &InstanceDescriptor,
	) -> Result<InstancePayload, TransportError> {
		let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

		let delay = match self.delay {
			Delay::None => Duration::ZERO,
			Delay::Fixed(delay) => delay,
			Delay::Random(max) => {
				let millis = u64::try_from(max.as_millis()).unwrap();
				Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
			}
		};
		tokio::time::sleep(delay).await;

		let fixture = find(&self.instances, &instance.sop_instance_uid);
		if fixture.is_some_and(|f| f.behavior == Behavior::Stalled) {
			tokio::time::sleep(STALL).await;
		}
		self.in_flight.fetch_sub(1, Ordering::SeqCst);

		match fixture {
			Some(fixture) if fixture.behavior != Behavior::Missing => Ok(InstancePayload {
				content_type: Some(String::from("application/dicom")),
				data: Bytes::from(fixture.bytes()),
			}),
			_ => Err(TransportError::NotFound {
				level: ResourceLevel::Instance,
				uid: instance.sop_instance_uid.clone(),
			}),
		}
	}
}

/// A request received by one of the sinks of the [`FixtureArchive`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
	pub headers: HeaderMap,
	pub body: serde_json::Value,
}

struct ArchiveState {
	instances: Vec<FixtureInstance>,
	failing_metadata_requests: AtomicUsize,
	metadata_requests: AtomicUsize,
	callbacks: Mutex<Vec<RecordedRequest>>,
	log_entries: Mutex<Vec<RecordedRequest>>,
}

#[derive(Default)]
pub struct FixtureArchiveBuilder {
	instances: Vec<FixtureInstance>,
	failing_metadata_requests: usize,
}

impl FixtureArchiveBuilder {
	pub fn instance(mut self, instance: FixtureInstance) -> Self {
		self.instances.push(instance);
		self
	}

	/// The first `count` metadata requests fail with 503.
	pub fn failing_metadata_requests(mut self, count: usize) -> Self {
		self.failing_metadata_requests = count;
		self
	}

	pub async fn spawn(self) -> FixtureArchive {
		let state = Arc::new(ArchiveState {
			instances: self.instances,
			failing_metadata_requests: AtomicUsize::new(self.failing_metadata_requests),
			metadata_requests: AtomicUsize::new(0),
			callbacks: Mutex::new(Vec::new()),
			log_entries: Mutex::new(Vec::new()),
		});

		let router = Router::new()
			.route("/dicom-web/studies/{study}/metadata", get(metadata))
			.route(
				"/dicom-web/studies/{study}/series/{series}/instances/{instance}",
				get(instance),
			)
			.route("/callback", post(callback))
			.route("/log", post(log_entry))
			.with_state(Arc::clone(&state));

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, router).await.unwrap();
		});

		FixtureArchive { addr, state }
	}
}

/// DICOMweb archive with callback and audit log sinks, served on an ephemeral local port.
pub struct FixtureArchive {
	addr: SocketAddr,
	state: Arc<ArchiveState>,
}

impl FixtureArchive {
	pub fn builder() -> FixtureArchiveBuilder {
		FixtureArchiveBuilder::default()
	}

	pub fn base_url(&self) -> String {
		format!("http://{}/dicom-web", self.addr)
	}

	pub fn callback_url(&self) -> String {
		format!("http://{}/callback", self.addr)
	}

	pub fn log_url(&self) -> String {
		format!("http://{}/log", self.addr)
	}

	pub fn study_uid(&self) -> String {
		STUDY_UID.to_owned()
	}

	pub fn metadata_requests(&self) -> usize {
		self.state.metadata_requests.load(Ordering::SeqCst)
	}

	pub fn callbacks(&self) -> Vec<RecordedRequest> {
		self.state.callbacks.lock().unwrap().clone()
	}

	pub fn log_entries(&self) -> Vec<RecordedRequest> {
		self.state.log_entries.lock().unwrap().clone()
	}

	/// Waits until at least `callbacks` callbacks and `log_entries` audit entries were received.
	pub async fn wait_for(&self, callbacks: usize, log_entries: usize) {
		let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
		while self.callbacks().len() < callbacks || self.log_entries().len() < log_entries {
			assert!(
				tokio::time::Instant::now() < deadline,
				"timed out waiting for callbacks and audit entries"
			);
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	}
}

async fn metadata(State(state): State<Arc<ArchiveState>>, Path(study): Path<String>) -> Response {
	state.metadata_requests.fetch_add(1, Ordering::SeqCst);
	let failing = state
		.failing_metadata_requests
		.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
		.is_ok();
	if failing {
		return StatusCode::SERVICE_UNAVAILABLE.into_response();
	}
	if study != STUDY_UID || state.instances.is_empty() {
		return StatusCode::NOT_FOUND.into_response();
	}

	let json: Vec<DicomJson<InMemDicomObject>> = state
		.instances
		.iter()
		.map(|instance| DicomJson::from(instance.metadata()))
		.collect();
	(
		[(header::CONTENT_TYPE, "application/dicom+json")],
		serde_json::to_string(&json).unwrap(),
	)
		.into_response()
}

async fn instance(
	State(state): State<Arc<ArchiveState>>,
	Path((_study, _series, instance)): Path<(String, String, String)>,
) -> Response {
	let Some(fixture) = find(&state.instances, &instance) else {
		return StatusCode::NOT_FOUND.into_response();
	};
	match fixture.behavior {
		Behavior::Missing => return StatusCode::NOT_FOUND.into_response(),
		Behavior::Stalled => tokio::time::sleep(STALL).await,
		Behavior::Healthy | Behavior::Corrupted => {}
	}

	let mut body = format!("--{BOUNDARY}\r\nContent-Type: application/dicom\r\n\r\n").into_bytes();
	body.extend_from_slice(&fixture.bytes());
	body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

	(
		[(
			header::CONTENT_TYPE,
			format!(r#"multipart/related; type="application/dicom"; boundary={BOUNDARY}"#),
		)],
		body,
	)
		.into_response()
}

async fn callback(
	State(state): State<Arc<ArchiveState>>,
	headers: HeaderMap,
	Json(body): Json<serde_json::Value>,
) -> StatusCode {
	state.callbacks.lock().unwrap().push(RecordedRequest { headers, body });
	StatusCode::OK
}

async fn log_entry(
	State(state): State<Arc<ArchiveState>>,
	headers: HeaderMap,
	Json(body): Json<serde_json::Value>,
) -> StatusCode {
	state.log_entries.lock().unwrap().push(RecordedRequest { headers, body });
	StatusCode::CREATED
}

/// The built-in configuration, pointed at the archive and its audit log sink.
pub fn app_config(archive: &FixtureArchive) -> AppConfig {
	let mut config: AppConfig = config::Config::builder()
		.add_source(config::File::from_str(
			include_str!("config/defaults.toml"),
			config::FileFormat::Toml,
		))
		.build()
		.unwrap()
		.try_deserialize()
		.unwrap();
	config.dicom_wado_url = archive.base_url();
	config.create_log_url = Some(archive.log_url());
	config.transport.retry_backoff = 10;
	config.delivery.callback_timeout = 5000;
	config
}

/// Counts the page objects of a PDF (`/Type /Page`, not `/Pages`).
pub fn count_pdf_pages(pdf: &[u8]) -> usize {
	let needle = b"/Page";
	pdf.windows(needle.len() + 1)
		.filter(|window| window.starts_with(needle) && !window[needle.len()].is_ascii_alphanumeric())
		.count()
}
