//! Document assembly. Lays out the ordered frames of a study as a paginated PDF, optionally
//! preceded by a cover page.

mod cover;
mod layout;

use crate::rendering::{encode_jpeg, NormalizedFrame};
use crate::study::{OrderingKey, StudySummary};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use layout::{fit_image, printable, text_width, MARGIN, PAGE_HEIGHT, PAGE_WIDTH, RULE_OFFSET};
use printpdf::{
	BuiltinFont, ColorBits, ColorSpace, Image, ImageFilter, ImageTransform, ImageXObject,
	IndirectFontRef, Mm, PdfDocument, PdfLayerReference, Px,
};
use std::io::BufWriter;
use thiserror::Error;
use tracing::{info, instrument};

/// JPEG quality of embedded frames.
const JPEG_QUALITY: u8 = 90;
const HEADER_SIZE: f32 = 10.0;
const FOOTER_SIZE: f32 = 8.0;

#[derive(Debug, Error)]
pub enum AssemblyError {
	#[error("Document would be empty: no frames and no cover page")]
	EmptyDocument,
	#[error("Failed to encode frame: {0}")]
	Encoding(#[from] image::ImageError),
	#[error("Failed to write PDF: {0}")]
	Pdf(String),
}

impl From<printpdf::Error> for AssemblyError {
	fn from(err: printpdf::Error) -> Self {
		Self::Pdf(err.to_string())
	}
}

/// What a page of the document shows.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageContent {
	Cover,
	Frame(OrderingKey),
}

#[derive(Debug, Clone)]
pub struct RenderedDocument {
	pub bytes: Vec<u8>,
	pub pages: Vec<PageContent>,
	pub generated_at: DateTime<Utc>,
}

impl RenderedDocument {
	pub fn page_count(&self) -> usize {
		self.pages.len()
	}

	pub fn size(&self) -> usize {
		self.bytes.len()
	}
}

/// Annotations of a frame page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FrameLabels {
	series: String,
	image: String,
	window: Option<String>,
}

/// Assembles the document. `frames` must already be in page order.
#[instrument(skip_all, fields(frames = frames.len(), cover_page = cover_page))]
pub fn assemble(
	frames: &[NormalizedFrame],
	cover_page: bool,
	summary: &StudySummary,
) -> Result<RenderedDocument, AssemblyError> {
	if frames.is_empty() && !cover_page {
		return Err(AssemblyError::EmptyDocument);
	}

	let generated_at = Utc::now();
	let (document, first_page, first_layer) =
		PdfDocument::new(cover::TITLE, PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
	let regular = document.add_builtin_font(BuiltinFont::Helvetica)?;
	let bold = document.add_builtin_font(BuiltinFont::HelveticaBold)?;

	let mut pages = Vec::with_capacity(frames.len() + 1);
	let mut next_page = Some((first_page, first_layer));
	let mut new_layer = |name: &str| -> PdfLayerReference {
		let (page, layer) = next_page
			.take()
			.unwrap_or_else(|| document.add_page(PAGE_WIDTH, PAGE_HEIGHT, name));
		document.get_page(page).get_layer(layer)
	};

	if cover_page {
		let layer = new_layer("Cover");
		cover::draw_cover(&layer, &regular, &bold, summary, generated_at);
		pages.push(PageContent::Cover);
	}

	let labels = frame_labels(frames, summary);
	for (frame, labels) in frames.iter().zip(labels) {
		let page_number = pages.len() + 1;
		let layer = new_layer("Frame");
		draw_frame(&layer, &frame.image)?;
		draw_annotations(&layer, &regular, &labels, page_number);
		pages.push(PageContent::Frame(frame.key));
	}

	let mut buffer = BufWriter::new(Vec::new());
	document.save(&mut buffer)?;
	let bytes = buffer
		.into_inner()
		.map_err(|err| AssemblyError::Pdf(err.to_string()))?;

	info!(pages = pages.len(), bytes = bytes.len(), "Assembled document");
	Ok(RenderedDocument {
		bytes,
		pages,
		generated_at,
	})
}

/// Embeds a frame as a JPEG image, scaled to fit the image box.
fn draw_frame(layer: &PdfLayerReference, image: &DynamicImage) -> Result<(), AssemblyError> {
	let color_space = match image {
		DynamicImage::ImageLuma8(_) => ColorSpace::Greyscale,
		_ => ColorSpace::Rgb,
	};
	let image = match image {
		DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.clone(),
		other => DynamicImage::ImageRgb8(other.to_rgb8()),
	};
	let placement = fit_image(image.width(), image.height());

	let xobject = ImageXObject {
		width: Px(image.width() as usize),
		height: Px(image.height() as usize),
		color_space,
		bits_per_component: ColorBits::Bit8,
		interpolate: true,
		image_data: encode_jpeg(&image, JPEG_QUALITY)?,
		image_filter: Some(ImageFilter::DCT),
		smask: None,
		clipping_bbox: None,
	};

	Image::from(xobject).add_to_layer(
		layer.clone(),
		ImageTransform {
			translate_x: Some(placement.x),
			translate_y: Some(placement.y),
			dpi: Some(placement.dpi),
			..ImageTransform::default()
		},
	);
	Ok(())
}

fn draw_annotations(
	layer: &PdfLayerReference,
	font: &IndirectFontRef,
	labels: &FrameLabels,
	page_number: usize,
) {
	let header_y = Mm(PAGE_HEIGHT.0 - RULE_OFFSET.0);
	let right = |text: &str, size: f32| Mm(PAGE_WIDTH.0 - MARGIN.0 - text_width(text, size).0);

	let series = format!("Series: {}", printable(&labels.series));
	layer.use_text(series, HEADER_SIZE, MARGIN, header_y, font);
	let page = format!("Page {page_number}");
	layer.use_text(&page, HEADER_SIZE, right(&page, HEADER_SIZE), header_y, font);

	layer.use_text(&labels.image, FOOTER_SIZE, MARGIN, RULE_OFFSET, font);
	if let Some(window) = &labels.window {
		layer.use_text(window, FOOTER_SIZE, right(window, FOOTER_SIZE), RULE_OFFSET, font);
	}
}

/// Header and footer texts for each frame: series description, the position of the instance in its
/// series, the frame within a multi-frame instance and the applied window.
fn frame_labels(frames: &[NormalizedFrame], summary: &StudySummary) -> Vec<FrameLabels> {
	let mut labels = Vec::with_capacity(frames.len());
	let mut current_series: Option<&str> = None;
	let mut current_instance: Option<&str> = None;
	let mut position = 0;

	for frame in frames {
		if current_series != Some(frame.series_instance_uid.as_str()) {
			current_series = Some(frame.series_instance_uid.as_str());
			position = 0;
		}
		if current_instance != Some(frame.sop_instance_uid.as_str()) {
			current_instance = Some(frame.sop_instance_uid.as_str());
			position += 1;
		}

		let series_instances = summary
			.series
			.iter()
			.find(|s| s.series_instance_uid == frame.series_instance_uid)
			.map_or(position, |s| s.instance_count.max(position));

		let image = if frame.number_of_frames > 1 {
			format!(
				"Instance {position}/{series_instances} (Frame {}/{})",
				frame.frame_index() + 1,
				frame.number_of_frames
			)
		} else {
			format!("Instance {position}/{series_instances}")
		};

		labels.push(FrameLabels {
			series: summary.series_label(&frame.series_instance_uid),
			image,
			window: frame.window.map(|window| window.to_string()),
		});
	}
	labels
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rendering::Window;
	use crate::study::SeriesSummary;
	use crate::testing::count_pdf_pages;
	use image::{GrayImage, RgbImage};

	fn frame(series: i64, instance: i64, frame_index: u32, number_of_frames: u32) -> NormalizedFrame {
		NormalizedFrame {
			key: OrderingKey {
				series_number: series,
				instance_number: instance,
				frame_index,
				discovery_index: 0,
			},
			series_instance_uid: format!("1.2.3.{series}"),
			sop_instance_uid: format!("1.2.3.{series}.{instance}"),
			instance_number: i32::try_from(instance).ok(),
			number_of_frames,
			image: DynamicImage::ImageLuma8(GrayImage::from_fn(64, 32, |x, y| {
				image::Luma([u8::try_from((x + y) % 256).unwrap()])
			})),
			window: Some(Window::new(40.0, 400.0)),
		}
	}

	fn summary() -> StudySummary {
		StudySummary {
			study_instance_uid: String::from("1.2.3"),
			series: vec![SeriesSummary {
				series_instance_uid: String::from("1.2.3.1"),
				series_number: Some(1),
				modality: Some(String::from("CT")),
				description: Some(String::from("AXIAL")),
				instance_count: 2,
				frame_count: 3,
			}],
			..StudySummary::default()
		}
	}

	#[test]
	fn cover_and_frames() {
		let frames = vec![frame(1, 1, 0, 1), frame(1, 2, 0, 2), frame(1, 2, 1, 2)];
		let document = assemble(&frames, true, &summary()).unwrap();

		assert_eq!(document.page_count(), 4);
		assert_eq!(document.pages[0], PageContent::Cover);
		assert_eq!(document.pages[3], PageContent::Frame(frames[2].key));
		assert!(document.bytes.starts_with(b"%PDF"));
		assert_eq!(count_pdf_pages(&document.bytes), 4);
	}

	#[test]
	fn frames_without_cover() {
		let mut rgb = frame(1, 1, 0, 1);
		rgb.image = DynamicImage::ImageRgb8(RgbImage::new(16, 16));
		rgb.window = None;

		let document = assemble(&[rgb], false, &summary()).unwrap();
		assert_eq!(document.pages, [PageContent::Frame(OrderingKey {
			series_number: 1,
			instance_number: 1,
			frame_index: 0,
			discovery_index: 0,
		})]);
		assert_eq!(count_pdf_pages(&document.bytes), 1);
	}

	#[test]
	fn cover_only() {
		let document = assemble(&[], true, &summary()).unwrap();
		assert_eq!(document.pages, [PageContent::Cover]);
	}

	#[test]
	fn nothing_to_render() {
		assert!(matches!(
			assemble(&[], false, &summary()),
			Err(AssemblyError::EmptyDocument)
		));
	}

	#[test]
	fn labels() {
		let frames = vec![frame(1, 1, 0, 1), frame(1, 2, 0, 2), frame(1, 2, 1, 2), frame(2, 1, 0, 1)];
		let labels = frame_labels(&frames, &summary());

		assert_eq!(labels[0].series, "AXIAL");
		assert_eq!(labels[0].image, "Instance 1/2");
		assert_eq!(labels[2].image, "Instance 2/2 (Frame 2/2)");
		assert_eq!(labels[2].window.as_deref(), Some("W: 400 L: 40"));
		assert_eq!(labels[3].series, "Series 1.2.3.2...");
		assert_eq!(labels[3].image, "Instance 1/1");
	}
}
