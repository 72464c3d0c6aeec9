use std::fmt::{Display, Formatter};

/// UI (Unique Identifier) value representation.
pub type UI = String;

/// US (Unsigned Short) value representation.
pub type US = u16;

/// IS (Integer String) value representation, after parsing.
pub type IS = i32;

/// Identifier of an exam in the requesting system.
pub type ExamId = i64;

/// Maximum length of a UID as defined in PS3.5 section 9.1.
const MAX_UID_LENGTH: usize = 64;

/// Checks that a value is a syntactically valid DICOM UID:
/// digit components separated by dots, 1 to 64 characters long.
pub fn is_valid_uid(uid: &str) -> bool {
	!uid.is_empty()
		&& uid.len() <= MAX_UID_LENGTH
		&& uid
			.split('.')
			.all(|component| !component.is_empty() && component.bytes().all(|b| b.is_ascii_digit()))
}

/// Removes the trailing padding that DICOM allows for even-length UI values.
pub fn trim_uid(uid: &str) -> &str {
	uid.trim_end_matches(['\0', ' '])
}

/// Level of the DICOM information model hierarchy a resource belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceLevel {
	Study,
	Instance,
}

impl Display for ResourceLevel {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Study => write!(f, "study"),
			Self::Instance => write!(f, "instance"),
		}
	}
}
