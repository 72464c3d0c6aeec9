use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	/// Base URL of the DICOMweb (WADO-RS) endpoint of the archive.
	pub dicom_wado_url: String,
	/// Endpoint of the external audit log API. Empty disables audit logging.
	#[serde(default)]
	pub create_log_url: Option<String>,
	/// Worker count used when a request does not ask for one.
	pub default_max_workers: usize,
	/// Upper bound for the per-job worker count.
	pub max_allowed_workers: usize,
	/// Client IPs allowed to call the API. Empty allows everyone.
	#[serde(default)]
	pub allowed_client_ips: Vec<String>,
	pub server: ServerConfig,
	pub transport: TransportConfig,
	pub job: JobConfig,
	pub delivery: DeliveryConfig,
	pub telemetry: TelemetryConfig,
}

impl AppConfig {
	/// Loads the configuration from the built-in defaults, an optional `config.toml` and the
	/// environment. Top-level keys use their plain names (`DICOM_WADO_URL`), nested keys use a
	/// double underscore (`SERVER__PORT`).
	pub fn new() -> Result<Self, config::ConfigError> {
		use config::Config;
		let s = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false))
			.add_source(
				config::Environment::default()
					.separator("__")
					.try_parsing(true)
					.list_separator(",")
					.with_list_parse_key("allowed_client_ips"),
			)
			.build()?;

		s.try_deserialize()
	}

	/// The audit log endpoint, if one is configured.
	pub fn audit_log_url(&self) -> Option<&str> {
		self.create_log_url
			.as_deref()
			.map(str::trim)
			.filter(|url| !url.is_empty())
	}

	pub const fn worker_limits(&self) -> WorkerLimits {
		WorkerLimits::new(self.default_max_workers, self.max_allowed_workers)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	// The interface the HTTP server will be listening on
	pub interface: IpAddr,
	// The port for the HTTP server
	pub port: u16,
	/// Request timeout in seconds. Only the synchronous endpoint is long-running.
	pub request_timeout: u64,
	pub graceful_shutdown: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
	/// Timeout for the study metadata request in milliseconds.
	pub metadata_timeout: u64,
	/// Timeout for a single instance retrieval in milliseconds.
	pub instance_timeout: u64,
	/// Total attempts for idempotent reads, including the first one.
	pub retry_attempts: u32,
	/// Backoff between attempts in milliseconds. Grows linearly with the attempt number.
	pub retry_backoff: u64,
}

impl TransportConfig {
	pub const fn metadata_timeout(&self) -> Duration {
		Duration::from_millis(self.metadata_timeout)
	}

	pub const fn instance_timeout(&self) -> Duration {
		Duration::from_millis(self.instance_timeout)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
	/// Overall deadline of a job in seconds, counted from acceptance.
	pub timeout: u64,
}

impl JobConfig {
	pub const fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
	/// Timeout for a callback POST in milliseconds.
	pub callback_timeout: u64,
	/// Additional callback attempts after the first one failed.
	pub callback_retries: u32,
	/// Timeout for an audit log POST in milliseconds.
	pub log_timeout: u64,
	/// Value of the `User-Agent` header for outbound deliveries.
	pub user_agent: String,
}

impl DeliveryConfig {
	pub const fn callback_timeout(&self) -> Duration {
		Duration::from_millis(self.callback_timeout)
	}

	pub const fn log_timeout(&self) -> Duration {
		Duration::from_millis(self.log_timeout)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	// Configurable logging level. Also configurable via RUST_LOG and TELEMETRY__LEVEL
	#[serde(deserialize_with = "deserialize_level")]
	pub level: tracing::Level,
	/// Sentry DSN. Sentry is disabled if missing.
	pub sentry: Option<String>,
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<tracing::Level, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s = String::deserialize(deserializer)?;
	s.parse().map_err(serde::de::Error::custom)
}

/// Bounds for the number of concurrent per-instance workers of a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WorkerLimits {
	pub default: usize,
	pub max_allowed: usize,
}

impl WorkerLimits {
	pub const fn new(default: usize, max_allowed: usize) -> Self {
		let max_allowed = if max_allowed == 0 { 1 } else { max_allowed };
		let default = if default == 0 {
			1
		} else if default > max_allowed {
			max_allowed
		} else {
			default
		};
		Self {
			default,
			max_allowed,
		}
	}

	/// Clamps a requested worker count to `[1, max_allowed]`.
	/// A missing request falls back to the default.
	pub fn clamp(&self, requested: Option<i64>) -> usize {
		requested.map_or(self.default, |requested| {
			let max = i64::try_from(self.max_allowed).unwrap_or(i64::MAX);
			// The clamped value lies in 1..=max_allowed
			usize::try_from(requested.clamp(1, max)).unwrap_or(1)
		})
	}
}
