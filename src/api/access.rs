use crate::api::ApiError;
use crate::config::AppConfig;
use crate::AppState;
use axum::extract::{ConnectInfo, FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// A caller whose address passed the IP allow-list.
///
/// The client address is the first entry of `X-Forwarded-For`, then `X-Real-IP`, then the peer
/// address of the connection. An empty allow-list admits everyone.
#[derive(Debug, Clone)]
pub struct AllowedClient {
	pub ip: Option<String>,
}

impl<S> FromRequestParts<S> for AllowedClient
where
	AppState: FromRef<S>,
	S: Send + Sync,
{
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
		let state = AppState::from_ref(state);
		let peer = parts
			.extensions
			.get::<ConnectInfo<SocketAddr>>()
			.map(|ConnectInfo(addr)| *addr);
		let ip = client_ip(&parts.headers, peer);

		let allowed = allowed_ips(&state.config);
		if allowed.is_empty() {
			return Ok(Self { ip });
		}

		match ip {
			Some(ip) if allowed.contains(&ip.as_str()) => {
				debug!(ip, "Allowed request");
				Ok(Self { ip: Some(ip) })
			}
			ip => {
				warn!(ip = ip.as_deref().unwrap_or("unknown"), "Blocked request");
				Err(ApiError::Forbidden)
			}
		}
	}
}

/// Configured client IPs, without blank entries.
pub fn allowed_ips(config: &AppConfig) -> Vec<&str> {
	config
		.allowed_client_ips
		.iter()
		.map(|ip| ip.trim())
		.filter(|ip| !ip.is_empty())
		.collect()
}

fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
	let header = |name: &str| {
		headers
			.get(name)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.split(',').next())
			.map(str::trim)
			.filter(|value| !value.is_empty())
			.map(str::to_owned)
	};

	header("x-forwarded-for")
		.or_else(|| header("x-real-ip"))
		.or_else(|| peer.map(|addr| addr.ip().to_string()))
}
