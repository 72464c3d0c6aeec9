use crate::types::trim_uid;
use std::fmt::{Display, Formatter};

/// How the pixel data of a transfer syntax is turned into samples.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Codec {
	/// Samples are stored as-is in Pixel Data.
	Native,
	/// Pixel Data is a sequence of compressed fragments.
	Encapsulated,
	Unsupported,
}

/// The transfer syntaxes this service knows how to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSyntaxKind {
	ImplicitVrLittleEndian,
	ExplicitVrLittleEndian,
	ExplicitVrBigEndian,
	DeflatedExplicitVrLittleEndian,
	JpegBaseline,
	JpegExtended,
	JpegLossless,
	JpegLosslessSv1,
	Jpeg2000Lossless,
	Jpeg2000,
	RleLossless,
	Unsupported(String),
}

impl TransferSyntaxKind {
	pub fn from_uid(uid: &str) -> Self {
		match trim_uid(uid) {
			"1.2.840.10008.1.2" => Self::ImplicitVrLittleEndian,
			"1.2.840.10008.1.2.1" => Self::ExplicitVrLittleEndian,
			"1.2.840.10008.1.2.2" => Self::ExplicitVrBigEndian,
			"1.2.840.10008.1.2.1.99" => Self::DeflatedExplicitVrLittleEndian,
			"1.2.840.10008.1.2.4.50" => Self::JpegBaseline,
			"1.2.840.10008.1.2.4.51" => Self::JpegExtended,
			"1.2.840.10008.1.2.4.57" => Self::JpegLossless,
			"1.2.840.10008.1.2.4.70" => Self::JpegLosslessSv1,
			"1.2.840.10008.1.2.4.90" => Self::Jpeg2000Lossless,
			"1.2.840.10008.1.2.4.91" => Self::Jpeg2000,
			"1.2.840.10008.1.2.5" => Self::RleLossless,
			other => Self::Unsupported(other.to_owned()),
		}
	}

	pub const fn codec(&self) -> Codec {
		match self {
			Self::ImplicitVrLittleEndian
			| Self::ExplicitVrLittleEndian
			| Self::ExplicitVrBigEndian
			| Self::DeflatedExplicitVrLittleEndian => Codec::Native,
			Self::JpegBaseline
			| Self::JpegExtended
			| Self::JpegLossless
			| Self::JpegLosslessSv1
			| Self::Jpeg2000Lossless
			| Self::Jpeg2000
			| Self::RleLossless => Codec::Encapsulated,
			Self::Unsupported(_) => Codec::Unsupported,
		}
	}

	/// JPEG family codecs deliver color data as RGB regardless of the stored photometric
	/// interpretation.
	pub const fn decodes_to_rgb(&self) -> bool {
		matches!(
			self,
			Self::JpegBaseline
				| Self::JpegExtended
				| Self::JpegLossless
				| Self::JpegLosslessSv1
				| Self::Jpeg2000Lossless
				| Self::Jpeg2000
		)
	}
}

impl Display for TransferSyntaxKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Unsupported(uid) => write!(f, "{uid}"),
			other => write!(f, "{other:?}"),
		}
	}
}
