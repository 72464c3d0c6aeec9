use crate::config::WorkerLimits;
use crate::types::{is_valid_uid, trim_uid, ExamId, UI};
use serde::Deserialize;
use std::fmt::{Debug, Formatter};
use thiserror::Error;
use url::Url;

/// Body of a render request as sent by the caller.
///
/// Billing codes, credentials and the callback URL are only required by the asynchronous endpoint
/// and default to empty values otherwise.
#[derive(Clone, Deserialize)]
pub struct RenderRequestBody {
	#[serde(rename = "examID")]
	pub exam_id: ExamId,
	pub pacs_studies_iuid: String,
	#[serde(rename = "CodAutorizacao", default)]
	pub authorization_code: String,
	#[serde(rename = "CodFaturamento", default)]
	pub billing_code: String,
	#[serde(rename = "CodProcedimento", default)]
	pub procedure_code: String,
	#[serde(rename = "Authorization", default)]
	pub authorization: String,
	#[serde(rename = "IntegrationToken", default)]
	pub integration_token: String,
	#[serde(rename = "UrlCallback", default)]
	pub callback_url: Option<String>,
	#[serde(default)]
	pub anonymize: Option<bool>,
	#[serde(default)]
	pub cover_page: Option<bool>,
	#[serde(default)]
	pub max_workers: Option<i64>,
}

impl Debug for RenderRequestBody {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RenderRequestBody")
			.field("exam_id", &self.exam_id)
			.field("pacs_studies_iuid", &self.pacs_studies_iuid)
			.field("callback_url", &self.callback_url)
			.field("anonymize", &self.anonymize)
			.field("cover_page", &self.cover_page)
			.field("max_workers", &self.max_workers)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("pacs_studies_iuid {0:?} is not a valid DICOM UID")]
	InvalidStudyUid(String),
	#[error("UrlCallback {url:?} is not a valid http(s) URL: {reason}")]
	InvalidCallbackUrl { url: String, reason: String },
}

/// Codes of the requesting system that are echoed back in the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillingCodes {
	pub authorization_code: String,
	pub billing_code: String,
	pub procedure_code: String,
}

/// Opaque secrets of the caller. Never logged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
	/// Forwarded as `Authorization` header of the callback.
	pub authorization: String,
	/// Sent as `token` header of audit log entries.
	pub integration_token: String,
}

impl Debug for Credentials {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str("Credentials { .. }")
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RenderOptions {
	pub anonymize: bool,
	pub cover_page: bool,
	/// Clamped to the configured worker limits.
	pub max_workers: usize,
}

/// A validated render request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct RenderRequest {
	pub exam_id: ExamId,
	pub study_instance_uid: UI,
	pub billing: BillingCodes,
	pub credentials: Credentials,
	pub callback_url: Option<Url>,
	pub options: RenderOptions,
}

impl RenderRequestBody {
	/// Validates the study UID and callback URL and clamps the worker count.
	pub fn validate(self, limits: WorkerLimits) -> Result<RenderRequest, ValidationError> {
		let study_instance_uid = trim_uid(self.pacs_studies_iuid.trim()).to_owned();
		if !is_valid_uid(&study_instance_uid) {
			return Err(ValidationError::InvalidStudyUid(self.pacs_studies_iuid));
		}

		let callback_url = match self.callback_url.as_deref().map(str::trim) {
			None | Some("") => None,
			Some(url) => Some(parse_callback_url(url)?),
		};

		Ok(RenderRequest {
			exam_id: self.exam_id,
			study_instance_uid,
			billing: BillingCodes {
				authorization_code: self.authorization_code,
				billing_code: self.billing_code,
				procedure_code: self.procedure_code,
			},
			credentials: Credentials {
				authorization: self.authorization,
				integration_token: self.integration_token,
			},
			callback_url,
			options: RenderOptions {
				anonymize: self.anonymize.unwrap_or(false),
				cover_page: self.cover_page.unwrap_or(false),
				max_workers: limits.clamp(self.max_workers),
			},
		})
	}
}

fn parse_callback_url(url: &str) -> Result<Url, ValidationError> {
	let invalid = |reason: String| ValidationError::InvalidCallbackUrl {
		url: url.to_owned(),
		reason,
	};
	let parsed = Url::parse(url).map_err(|err| invalid(err.to_string()))?;
	match parsed.scheme() {
		"http" | "https" if parsed.has_host() => Ok(parsed),
		"http" | "https" => Err(invalid(String::from("missing host"))),
		scheme => Err(invalid(format!("unsupported scheme {scheme}"))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn body(value: serde_json::Value) -> RenderRequestBody {
		serde_json::from_value(value).unwrap()
	}

	fn limits() -> WorkerLimits {
		WorkerLimits::new(4, 8)
	}

	#[test]
	fn full_request() {
		let request = body(json!({
			"examID": 42,
			"pacs_studies_iuid": "1.2.826.0.1.3680043.2.1125.1",
			"CodAutorizacao": "A1",
			"CodFaturamento": "F1",
			"CodProcedimento": "P1",
			"Authorization": "Bearer secret",
			"IntegrationToken": "token",
			"UrlCallback": "https://example.com/callback",
			"anonymize": true,
			"cover_page": true,
			"max_workers": 999
		}))
		.validate(limits())
		.unwrap();

		assert_eq!(request.exam_id, 42);
		assert_eq!(request.billing.billing_code, "F1");
		assert_eq!(request.credentials.authorization, "Bearer secret");
		assert_eq!(request.callback_url.unwrap().as_str(), "https://example.com/callback");
		assert_eq!(request.options, RenderOptions {
			anonymize: true,
			cover_page: true,
			max_workers: 8,
		});
	}

	#[test]
	fn optional_fields_have_defaults() {
		let request = body(json!({
			"examID": 7,
			"pacs_studies_iuid": "1.2.3\u{0}",
		}))
		.validate(limits())
		.unwrap();

		assert_eq!(request.study_instance_uid, "1.2.3");
		assert_eq!(request.callback_url, None);
		assert_eq!(request.options, RenderOptions {
			anonymize: false,
			cover_page: false,
			max_workers: 4,
		});
	}

	#[test]
	fn worker_count_is_clamped() {
		let with_workers = |workers: i64| {
			body(json!({"examID": 1, "pacs_studies_iuid": "1.2.3", "max_workers": workers}))
				.validate(limits())
				.unwrap()
				.options
				.max_workers
		};
		assert_eq!(with_workers(999), 8);
		assert_eq!(with_workers(0), 1);
		assert_eq!(with_workers(-3), 1);
		assert_eq!(with_workers(5), 5);
	}

	#[test]
	fn malformed_study_uid_is_rejected() {
		let result = body(json!({"examID": 1, "pacs_studies_iuid": "1.2.840...test"})).validate(limits());
		assert_eq!(result.unwrap_err(), ValidationError::InvalidStudyUid(String::from("1.2.840...test")));
	}

	#[test]
	fn callback_url_must_be_http() {
		for url in ["ftp://example.com/cb", "not a url", "http://"] {
			let result = body(json!({"examID": 1, "pacs_studies_iuid": "1.2.3", "UrlCallback": url}))
				.validate(limits());
			assert!(
				matches!(result, Err(ValidationError::InvalidCallbackUrl { .. })),
				"{url} was accepted"
			);
		}
	}

	#[test]
	fn credentials_are_not_logged() {
		let request = body(json!({
			"examID": 1,
			"pacs_studies_iuid": "1.2.3",
			"Authorization": "Bearer secret",
		}));
		assert!(!format!("{request:?}").contains("secret"));
		let request = request.validate(limits()).unwrap();
		assert!(!format!("{request:?}").contains("secret"));
	}
}
