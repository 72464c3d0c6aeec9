//! Instance decoding. Turns the Part-10 bytes of one instance into 8-bit grayscale or RGB frames
//! that are ready to be placed on a page.

mod palette;
mod photometric;
mod transfer_syntax;
mod window;

pub use palette::PaletteLut;
pub use photometric::Photometric;
pub use transfer_syntax::{Codec, TransferSyntaxKind};
pub use window::Window;

use crate::study::attributes::AttributeExt;
use crate::study::{InstanceDescriptor, OrderingKey};
use crate::types::{IS, UI};
use dicom::dictionary_std::tags;
use dicom::object::{FileDicomObject, FileMetaTable, InMemDicomObject};
use dicom_pixeldata::PixelDecoder;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, RgbImage};
use std::borrow::Cow;
use thiserror::Error;
use tracing::{instrument, trace, warn};

/// Length of the Part-10 preamble that precedes the `DICM` magic code.
const PREAMBLE_LENGTH: usize = 128;

#[derive(Debug, Clone, Error)]
pub enum DecodeError {
	#[error("Transfer syntax {0} is not supported")]
	UnsupportedTransferSyntax(String),
	#[error("Photometric interpretation {0} is not supported")]
	UnsupportedPhotometric(String),
	#[error("Malformed instance: {reason}")]
	Malformed { reason: String },
}

impl DecodeError {
	fn malformed(reason: impl Into<String>) -> Self {
		Self::Malformed {
			reason: reason.into(),
		}
	}
}

impl From<dicom_pixeldata::Error> for DecodeError {
	fn from(err: dicom_pixeldata::Error) -> Self {
		Self::malformed(err.to_string())
	}
}

/// One displayable frame of an instance.
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
	pub key: OrderingKey,
	pub series_instance_uid: UI,
	pub sop_instance_uid: UI,
	pub instance_number: Option<IS>,
	pub number_of_frames: u32,
	/// Either [`DynamicImage::ImageLuma8`] or [`DynamicImage::ImageRgb8`].
	pub image: DynamicImage,
	/// The VOI window applied to grayscale samples, if the instance defines one.
	pub window: Option<Window>,
}

impl NormalizedFrame {
	pub const fn frame_index(&self) -> u32 {
		self.key.frame_index
	}
}

/// Decodes all frames of an instance. Runs on the blocking pool.
#[instrument(skip_all, fields(sop_instance_uid = descriptor.sop_instance_uid))]
pub fn decode_instance(
	descriptor: &InstanceDescriptor,
	data: &[u8],
	discovery_index: usize,
) -> Result<Vec<NormalizedFrame>, DecodeError> {
	let (kind, object) = parse_part10(data)?;

	let photometric = object
		.string(tags::PHOTOMETRIC_INTERPRETATION)
		.or_else(|| descriptor.photometric_interpretation.clone())
		.map(|name| Photometric::from_name(&name))
		.ok_or_else(|| DecodeError::malformed("missing photometric interpretation"))?;
	if let Photometric::Unsupported(name) = &photometric {
		return Err(DecodeError::UnsupportedPhotometric(name.clone()));
	}

	let layout = Layout::from_object(&object)?;
	trace!(transfer_syntax = %kind, %photometric, ?layout, "Decoding instance");

	let (pixels, photometric, layout) = match kind.codec() {
		Codec::Native => (native_pixel_data(&object)?, photometric, layout),
		Codec::Encapsulated => {
			let decoded = object.decode_pixel_data()?;
			let photometric = if kind.decodes_to_rgb() && photometric.is_ybr() {
				Photometric::Rgb
			} else {
				photometric
			};
			(Cow::Owned(decoded.data().to_vec()), photometric, layout.interleaved())
		}
		Codec::Unsupported => {
			return Err(DecodeError::UnsupportedTransferSyntax(kind.to_string()));
		}
	};

	let frame_length = layout.frame_length(&photometric);
	if frame_length == 0 || pixels.len() < frame_length {
		return Err(DecodeError::malformed("pixel data is shorter than one frame"));
	}

	let declared_frames = object
		.int(tags::NUMBER_OF_FRAMES)
		.and_then(|n| u32::try_from(n).ok())
		.filter(|&n| n > 0)
		.unwrap_or(descriptor.number_of_frames);
	let available_frames = u32::try_from(pixels.len() / frame_length).unwrap_or(u32::MAX);
	if available_frames < declared_frames {
		warn!(
			declared_frames,
			available_frames, "Pixel data holds fewer frames than declared"
		);
	}
	let frame_count = declared_frames.min(available_frames);

	let palette = match photometric {
		Photometric::PaletteColor => Some(PaletteLut::from_object(&object)?),
		_ => None,
	};
	let modality_lut = ModalityLut::from_object(&object);
	let window = photometric
		.is_grayscale()
		.then(|| stored_window(&object))
		.flatten();

	pixels
		.chunks_exact(frame_length)
		.take(frame_count as usize)
		.zip(0u32..)
		.map(|(frame, frame_index)| {
			let image = match &photometric {
				Photometric::Monochrome1 | Photometric::Monochrome2 => normalize_grayscale(
					frame,
					&layout,
					&modality_lut,
					window.as_ref(),
					photometric == Photometric::Monochrome1,
				),
				Photometric::Rgb => normalize_rgb(frame, &layout, false),
				Photometric::YbrFull => normalize_rgb(frame, &layout, true),
				Photometric::YbrFull422 => normalize_ybr_422(frame, &layout),
				Photometric::PaletteColor => match &palette {
					Some(palette) => normalize_palette(frame, &layout, palette),
					None => Err(DecodeError::malformed("missing palette")),
				},
				Photometric::Unsupported(name) => {
					Err(DecodeError::UnsupportedPhotometric(name.clone()))
				}
			}?;

			Ok(NormalizedFrame {
				key: descriptor.ordering_key(frame_index, discovery_index),
				series_instance_uid: descriptor.series_instance_uid.clone(),
				sop_instance_uid: descriptor.sop_instance_uid.clone(),
				instance_number: descriptor.instance_number,
				number_of_frames: frame_count,
				image,
				window,
			})
		})
		.collect()
}

/// Encodes a frame as baseline JPEG.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
	let mut buffer = Vec::new();
	let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
	image.write_with_encoder(encoder)?;
	Ok(buffer)
}

/// Parses a Part-10 file with or without its preamble.
/// The file meta group is read first so that unknown transfer syntaxes are reported as such
/// instead of as a parse failure of the data set.
fn parse_part10(
	data: &[u8],
) -> Result<(TransferSyntaxKind, FileDicomObject<InMemDicomObject>), DecodeError> {
	let data = match data.get(PREAMBLE_LENGTH..PREAMBLE_LENGTH + 4) {
		Some(b"DICM") => &data[PREAMBLE_LENGTH..],
		_ => data,
	};

	let meta =
		FileMetaTable::from_reader(data).map_err(|err| DecodeError::malformed(err.to_string()))?;
	let kind = TransferSyntaxKind::from_uid(meta.transfer_syntax());
	if kind.codec() == Codec::Unsupported {
		return Err(DecodeError::UnsupportedTransferSyntax(kind.to_string()));
	}

	let object =
		FileDicomObject::from_reader(data).map_err(|err| DecodeError::malformed(err.to_string()))?;
	Ok((kind, object))
}

fn native_pixel_data(object: &InMemDicomObject) -> Result<Cow<'_, [u8]>, DecodeError> {
	object
		.element(tags::PIXEL_DATA)
		.map_err(|_| DecodeError::malformed("missing pixel data"))?
		.to_bytes()
		.map_err(|err| DecodeError::malformed(err.to_string()))
}

fn stored_window(object: &InMemDicomObject) -> Option<Window> {
	let center = object.floats(tags::WINDOW_CENTER)?.first().copied()?;
	let width = object.floats(tags::WINDOW_WIDTH)?.first().copied()?;
	Some(Window::new(center, width))
}

/// Image pixel module attributes that determine how samples are laid out.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Layout {
	rows: u32,
	columns: u32,
	samples_per_pixel: u16,
	bits_allocated: u16,
	bits_stored: u16,
	signed: bool,
	planar: bool,
}

impl Layout {
	fn from_object(object: &InMemDicomObject) -> Result<Self, DecodeError> {
		let dimension = |tag| {
			object
				.int(tag)
				.and_then(|n| u32::try_from(n).ok())
				.filter(|&n| n > 0)
		};
		let rows = dimension(tags::ROWS).ok_or_else(|| DecodeError::malformed("missing rows"))?;
		let columns =
			dimension(tags::COLUMNS).ok_or_else(|| DecodeError::malformed("missing columns"))?;

		let bits_allocated = object
			.int(tags::BITS_ALLOCATED)
			.and_then(|n| u16::try_from(n).ok())
			.ok_or_else(|| DecodeError::malformed("missing bits allocated"))?;
		if !matches!(bits_allocated, 8 | 16 | 32) {
			return Err(DecodeError::malformed(format!(
				"{bits_allocated} bits allocated are not supported"
			)));
		}
		let bits_stored = object
			.int(tags::BITS_STORED)
			.and_then(|n| u16::try_from(n).ok())
			.filter(|&n| n > 0)
			.map_or(bits_allocated, |n| n.min(bits_allocated));

		Ok(Self {
			rows,
			columns,
			samples_per_pixel: object
				.int(tags::SAMPLES_PER_PIXEL)
				.and_then(|n| u16::try_from(n).ok())
				.filter(|&n| n > 0)
				.unwrap_or(1),
			bits_allocated,
			bits_stored,
			signed: object.int(tags::PIXEL_REPRESENTATION) == Some(1),
			planar: object.int(tags::PLANAR_CONFIGURATION) == Some(1),
		})
	}

	/// Codecs deliver color samples pixel by pixel.
	const fn interleaved(self) -> Self {
		Self {
			planar: false,
			..self
		}
	}

	const fn pixels(&self) -> usize {
		self.rows as usize * self.columns as usize
	}

	const fn bytes_per_sample(&self) -> usize {
		self.bits_allocated as usize / 8
	}

	fn frame_length(&self, photometric: &Photometric) -> usize {
		match photometric {
			// Two luminance samples share one pair of chroma samples
			Photometric::YbrFull422 => self.pixels() * 2 * self.bytes_per_sample(),
			Photometric::Monochrome1 | Photometric::Monochrome2 | Photometric::PaletteColor => {
				self.pixels() * self.bytes_per_sample()
			}
			_ => self.pixels() * usize::from(self.samples_per_pixel) * self.bytes_per_sample(),
		}
	}

	/// Reads the sample at `index`, honouring bits stored and pixel representation.
	#[allow(clippy::cast_possible_wrap)]
	fn sample(&self, frame: &[u8], index: usize) -> i64 {
		let width = self.bytes_per_sample();
		let bytes = &frame[index * width..(index + 1) * width];
		let raw = match bytes {
			[b0] => u64::from(*b0),
			[b0, b1] => u64::from(u16::from_le_bytes([*b0, *b1])),
			[b0, b1, b2, b3] => u64::from(u32::from_le_bytes([*b0, *b1, *b2, *b3])),
			_ => 0,
		};

		let bits = u32::from(self.bits_stored);
		let raw = raw & ((1u64 << bits) - 1);
		if self.signed {
			let shift = 64 - bits;
			((raw << shift) as i64) >> shift
		} else {
			raw as i64
		}
	}

	fn samples(&self, frame: &[u8], count: usize) -> Vec<i64> {
		(0..count).map(|index| self.sample(frame, index)).collect()
	}

	/// Color samples in `R G B` (or `Y Cb Cr`) pixel order.
	fn color_samples(&self, frame: &[u8]) -> Vec<i64> {
		let pixels = self.pixels();
		let samples = self.samples(frame, pixels * 3);
		if !self.planar {
			return samples;
		}

		let mut interleaved = Vec::with_capacity(samples.len());
		for pixel in 0..pixels {
			for plane in 0..3 {
				interleaved.push(samples[plane * pixels + pixel]);
			}
		}
		interleaved
	}
}

/// Rescale Slope and Intercept, mapping stored values to modality values.
#[derive(Debug, Copy, Clone, PartialEq)]
struct ModalityLut {
	slope: f64,
	intercept: f64,
}

impl ModalityLut {
	fn from_object(object: &InMemDicomObject) -> Self {
		Self {
			slope: object
				.float(tags::RESCALE_SLOPE)
				.filter(|slope| *slope != 0.0)
				.unwrap_or(1.0),
			intercept: object.float(tags::RESCALE_INTERCEPT).unwrap_or(0.0),
		}
	}

	#[allow(clippy::cast_precision_loss)]
	fn apply(&self, value: i64) -> f64 {
		(value as f64).mul_add(self.slope, self.intercept)
	}
}

fn normalize_grayscale(
	frame: &[u8],
	layout: &Layout,
	modality_lut: &ModalityLut,
	window: Option<&Window>,
	invert: bool,
) -> Result<DynamicImage, DecodeError> {
	let values: Vec<f64> = layout
		.samples(frame, layout.pixels())
		.into_iter()
		.map(|value| modality_lut.apply(value))
		.collect();

	let mut pixels = match window {
		Some(window) => values.iter().map(|&value| window.apply(value)).collect(),
		None => window::rescale_min_max(&values),
	};
	if invert {
		for pixel in &mut pixels {
			*pixel = photometric::invert(*pixel);
		}
	}

	GrayImage::from_raw(layout.columns, layout.rows, pixels)
		.map(DynamicImage::ImageLuma8)
		.ok_or_else(|| DecodeError::malformed("frame size does not match its dimensions"))
}

fn normalize_rgb(frame: &[u8], layout: &Layout, ybr: bool) -> Result<DynamicImage, DecodeError> {
	if layout.samples_per_pixel != 3 {
		return Err(DecodeError::malformed(format!(
			"color data with {} samples per pixel",
			layout.samples_per_pixel
		)));
	}

	let mut pixels = to_8bit(&layout.color_samples(frame), layout.bits_allocated);
	if ybr {
		for triplet in pixels.chunks_exact_mut(3) {
			let rgb = photometric::ybr_to_rgb(triplet[0], triplet[1], triplet[2]);
			triplet.copy_from_slice(&rgb);
		}
	}

	rgb_image(layout, pixels)
}

fn normalize_ybr_422(frame: &[u8], layout: &Layout) -> Result<DynamicImage, DecodeError> {
	if layout.bits_allocated != 8 {
		return Err(DecodeError::malformed("YBR_FULL_422 requires 8 bits allocated"));
	}

	let mut pixels = photometric::upsample_422(frame, layout.pixels());
	for triplet in pixels.chunks_exact_mut(3) {
		let rgb = photometric::ybr_to_rgb(triplet[0], triplet[1], triplet[2]);
		triplet.copy_from_slice(&rgb);
	}

	rgb_image(layout, pixels)
}

fn normalize_palette(
	frame: &[u8],
	layout: &Layout,
	palette: &PaletteLut,
) -> Result<DynamicImage, DecodeError> {
	let pixels = layout
		.samples(frame, layout.pixels())
		.into_iter()
		.flat_map(|index| palette.map(index))
		.collect();

	rgb_image(layout, pixels)
}

fn rgb_image(layout: &Layout, pixels: Vec<u8>) -> Result<DynamicImage, DecodeError> {
	RgbImage::from_raw(layout.columns, layout.rows, pixels)
		.map(DynamicImage::ImageRgb8)
		.ok_or_else(|| DecodeError::malformed("frame size does not match its dimensions"))
}

/// Color data is never windowed. Samples wider than 8 bit are rescaled to the display range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn to_8bit(samples: &[i64], bits_allocated: u16) -> Vec<u8> {
	if bits_allocated == 8 {
		samples.iter().map(|&s| s.clamp(0, 255) as u8).collect()
	} else {
		let values: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
		window::rescale_min_max(&values)
	}
}
