use bytes::Bytes;
use futures::Stream;

/// This uses the `multer` crate to read `multipart/related` response bodies returned by WADO-RS.
/// `multer` itself only accepts `multipart/form-data`, so the boundary is extracted here.
pub struct DicomMultipart<'a>(multer::Multipart<'a>);

/// One body part of a `multipart/related` message.
#[derive(Debug, Clone)]
pub struct Part {
	pub content_type: Option<String>,
	pub data: Bytes,
}

impl<'a> DicomMultipart<'a> {
	/// This implementation is based on [`multer::parse_boundary`],
	/// but with multipart/related instead of multipart/form-data.
	pub fn parse_boundary(content_type: &str) -> multer::Result<String> {
		let mime = content_type
			.parse::<mime::Mime>()
			.map_err(multer::Error::DecodeContentType)?;

		// The `multer` crate expects multipart/form-data here, but in DICOM multipart/related is used.
		if !(mime.type_() == mime::MULTIPART && mime.subtype().as_str() == "related") {
			return Err(multer::Error::NoMultipart);
		}

		mime.get_param(mime::BOUNDARY)
			.map(|name| name.as_str().to_owned())
			.ok_or(multer::Error::NoBoundary)
	}

	pub fn new<S, O, E>(stream: S, boundary: impl Into<String>) -> Self
	where
		S: Stream<Item = Result<O, E>> + Send + 'a,
		O: Into<Bytes> + 'static,
		E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
	{
		Self(multer::Multipart::new(stream, boundary))
	}

	/// Reads the next part completely into memory.
	pub async fn next_part(&mut self) -> multer::Result<Option<Part>> {
		let Some(field) = self.0.next_field().await? else {
			return Ok(None);
		};
		let content_type = field.content_type().map(ToString::to_string);
		let data = field.bytes().await?;
		Ok(Some(Part { content_type, data }))
	}
}

/// Returns true if the content type denotes a `multipart/related` body.
pub fn is_multipart_related(content_type: &str) -> bool {
	content_type
		.parse::<mime::Mime>()
		.is_ok_and(|mime| mime.type_() == mime::MULTIPART && mime.subtype().as_str() == "related")
}
