pub(crate) mod api;
pub(crate) mod config;
pub(crate) mod dicomweb;
pub(crate) mod dispatch;
pub(crate) mod document;
pub(crate) mod job;
pub(crate) mod rendering;
pub(crate) mod study;
pub(crate) mod types;
pub(crate) mod utils;

#[cfg(test)]
mod testing;

use crate::config::{AppConfig, ServerConfig};
use crate::job::JobOrchestrator;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace;
use tracing::{error, info, level_filters::LevelFilter, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logger(level: tracing::Level) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_line_number(false)
				.with_target(false),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(LevelFilter::from_level(level).into())
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

#[derive(Clone)]
pub struct AppState {
	pub config: AppConfig,
	pub jobs: JobOrchestrator,
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let guard = sentry::init((
		// An empty string will disable Sentry
		config.telemetry.sentry.as_deref().unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = &config.telemetry.sentry {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	};

	guard
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let config = AppConfig::new()?;
	init_logger(config.telemetry.level);

	// Manually create the Tokio runtime because the Sentry client needs to be created *before* the
	// Tokio runtime, which prevents us from using the #[tokio::main] macro.
	// See https://docs.sentry.io/platforms/rust/#async-main-function
	let _sentry = init_sentry(&config);

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(async move {
			if let Err(error) = run(config).await {
				error!("Failed to start application due to error: {error}");
			}
		});
	Ok(())
}

/// Logs the effective configuration. URLs may carry credentials and are shortened.
fn log_config(config: &AppConfig) {
	fn shorten(url: &str) -> String {
		let chars: Vec<char> = url.chars().collect();
		if chars.len() > 40 {
			let head: String = chars[..30].iter().collect();
			let tail: String = chars[chars.len() - 10..].iter().collect();
			format!("{head}...{tail}")
		} else {
			url.to_owned()
		}
	}

	info!(url = shorten(&config.dicom_wado_url), "Using DICOMweb archive");
	match config.audit_log_url() {
		Some(url) => info!(url = shorten(url), "Audit logging enabled"),
		None => warn!("CREATE_LOG_URL is not configured, audit logging is disabled"),
	}
	let allowed = api::allowed_ips(config);
	if allowed.is_empty() {
		warn!("ALLOWED_CLIENT_IPS is not configured, all client IPs are allowed");
	} else {
		info!(count = allowed.len(), "IP validation enabled");
	}
	let limits = config.worker_limits();
	info!(
		default = limits.default,
		max_allowed = limits.max_allowed,
		job_timeout = config.job.timeout,
		"Worker limits"
	);
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
	log_config(&config);
	let app_state = AppState {
		config: config.clone(),
		jobs: JobOrchestrator::from_config(&config)?,
	};

	let app = app(app_state);

	let ServerConfig {
		interface: host,
		port,
		..
	} = config.server;
	let addr = SocketAddr::from((host, port));
	let listener = TcpListener::bind(addr).await?;
	let service = app.into_make_service_with_connect_info::<SocketAddr>();

	info!("Started PDF renderer on http://{addr}{}", api::BASE_PATH);
	if config.server.graceful_shutdown {
		axum::serve(listener, service)
			.with_graceful_shutdown(shutdown_signal())
			.await?;
	} else {
		axum::serve(listener, service).await?;
	}

	Ok(())
}

fn app(state: AppState) -> Router {
	let request_timeout = Duration::from_secs(state.config.server.request_timeout);
	api::routes()
		.layer(CorsLayer::permissive())
		.layer(axum::middleware::from_fn(add_common_headers))
		.layer(
			tower_http::trace::TraceLayer::new_for_http()
				.make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
				.on_request(trace::DefaultOnRequest::new().level(Level::INFO))
				.on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
		)
		.layer(TimeoutLayer::with_status_code(
			StatusCode::REQUEST_TIMEOUT,
			request_timeout,
		))
		.with_state(state)
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(err) = signal::ctrl_c().await {
			error!("Failed to listen for Ctrl+C: {err}");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut terminate) => {
				terminate.recv().await;
			}
			Err(err) => {
				error!("Failed to listen for SIGTERM: {err}");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}
}

async fn add_common_headers(req: Request, next: axum::middleware::Next) -> Response {
	let mut response = next.run(req).await;
	let server_name = concat!("DICOM-PDF-Renderer/", env!("CARGO_PKG_VERSION"));
	let headers = response.headers_mut();
	headers.insert("Server", axum::http::HeaderValue::from_static(server_name));
	response
}
