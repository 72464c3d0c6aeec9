use crate::types::{ExamId, UI};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

/// Body of the callback sent when a job ends.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CallbackPayload {
	Success(SuccessPayload),
	Failure(FailurePayload),
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessPayload {
	#[serde(rename = "examID")]
	pub exam_id: ExamId,
	#[serde(rename = "studyIUID")]
	pub study_instance_uid: UI,
	/// The document, base64 encoded.
	#[serde(rename = "ImagensPDF")]
	pub document: String,
	#[serde(rename = "CodAutorizacao")]
	pub authorization_code: String,
	#[serde(rename = "CodFaturamento")]
	pub billing_code: String,
	#[serde(rename = "CodProcedimento")]
	pub procedure_code: String,
	pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailurePayload {
	#[serde(rename = "examID")]
	pub exam_id: ExamId,
	#[serde(rename = "studyIUID")]
	pub study_instance_uid: UI,
	pub status: &'static str,
	pub error: ErrorDescriptor,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDescriptor {
	/// HTTP status equivalent of the failure.
	pub code: u16,
	/// Stable machine readable reason.
	pub reason: &'static str,
	pub message: String,
}

/// Codes echoed back in a success callback.
#[derive(Debug, Clone, Copy)]
pub struct EchoedCodes<'a> {
	pub authorization_code: &'a str,
	pub billing_code: &'a str,
	pub procedure_code: &'a str,
}

impl CallbackPayload {
	pub fn success(
		exam_id: ExamId,
		study_instance_uid: &str,
		document: &[u8],
		codes: EchoedCodes<'_>,
	) -> Self {
		Self::Success(SuccessPayload {
			exam_id,
			study_instance_uid: study_instance_uid.to_owned(),
			document: STANDARD.encode(document),
			authorization_code: codes.authorization_code.to_owned(),
			billing_code: codes.billing_code.to_owned(),
			procedure_code: codes.procedure_code.to_owned(),
			status: "success",
		})
	}

	pub fn failure(exam_id: ExamId, study_instance_uid: &str, error: ErrorDescriptor) -> Self {
		Self::Failure(FailurePayload {
			exam_id,
			study_instance_uid: study_instance_uid.to_owned(),
			status: "failed",
			error,
		})
	}

	pub const fn is_success(&self) -> bool {
		matches!(self, Self::Success(_))
	}
}
