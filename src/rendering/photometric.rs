use std::fmt::{Display, Formatter};

/// Photometric interpretations the decoder can normalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Photometric {
	Monochrome1,
	Monochrome2,
	Rgb,
	YbrFull,
	YbrFull422,
	PaletteColor,
	Unsupported(String),
}

impl Photometric {
	pub fn from_name(name: &str) -> Self {
		match name.trim_matches(|c: char| c == '\0' || c.is_whitespace()) {
			"MONOCHROME1" => Self::Monochrome1,
			"MONOCHROME2" => Self::Monochrome2,
			// JPEG 2000 component transforms are undone by the codec
			"RGB" | "YBR_ICT" | "YBR_RCT" => Self::Rgb,
			"YBR_FULL" => Self::YbrFull,
			"YBR_FULL_422" => Self::YbrFull422,
			"PALETTE COLOR" => Self::PaletteColor,
			other => Self::Unsupported(other.to_owned()),
		}
	}

	pub const fn is_grayscale(&self) -> bool {
		matches!(self, Self::Monochrome1 | Self::Monochrome2)
	}

	pub const fn is_ybr(&self) -> bool {
		matches!(self, Self::YbrFull | Self::YbrFull422)
	}
}

impl Display for Photometric {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Monochrome1 => "MONOCHROME1",
			Self::Monochrome2 => "MONOCHROME2",
			Self::Rgb => "RGB",
			Self::YbrFull => "YBR_FULL",
			Self::YbrFull422 => "YBR_FULL_422",
			Self::PaletteColor => "PALETTE COLOR",
			Self::Unsupported(name) => name,
		};
		f.write_str(name)
	}
}

/// MONOCHROME1 displays the minimum sample as white.
pub const fn invert(value: u8) -> u8 {
	u8::MAX - value
}

/// Full range BT.601 YCbCr to RGB.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn ybr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
	let y = f64::from(y);
	let cb = f64::from(cb) - 128.0;
	let cr = f64::from(cr) - 128.0;

	let clamp = |v: f64| v.round().clamp(0.0, 255.0) as u8;
	[
		clamp(1.402f64.mul_add(cr, y)),
		clamp(0.714_136f64.mul_add(-cr, 0.344_136f64.mul_add(-cb, y))),
		clamp(1.772f64.mul_add(cb, y)),
	]
}

/// Expands 4:2:2 subsampled YBR (`Y0 Y1 Cb Cr` per pixel pair) into full resolution
/// interleaved `Y Cb Cr` triplets.
pub fn upsample_422(data: &[u8], pixels: usize) -> Vec<u8> {
	let mut full = Vec::with_capacity(pixels * 3);
	for group in data.chunks_exact(4) {
		let [y0, y1, cb, cr] = [group[0], group[1], group[2], group[3]];
		full.extend_from_slice(&[y0, cb, cr]);
		if full.len() < pixels * 3 {
			full.extend_from_slice(&[y1, cb, cr]);
		}
		if full.len() >= pixels * 3 {
			break;
		}
	}
	full
}
