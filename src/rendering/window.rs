use std::fmt::{Display, Formatter};

/// Mid grey used for frames without any contrast.
const MID_GREY: u8 = 128;

/// A VOI window as stored in Window Center / Window Width.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Window {
	pub center: f64,
	pub width: f64,
}

impl Window {
	pub const fn new(center: f64, width: f64) -> Self {
		Self { center, width }
	}

	/// Maps a modality value to the 8-bit display range.
	/// Widths below 1 are treated as 1.
	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	pub fn apply(&self, value: f64) -> u8 {
		let width = self.width.max(1.0);
		let scaled = ((value - self.center) / width + 0.5) * 255.0;
		scaled.round().clamp(0.0, 255.0) as u8
	}
}

impl Display for Window {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "W: {:.0} L: {:.0}", self.width, self.center)
	}
}

/// Linear full-range rescale from the observed minimum and maximum.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rescale_min_max(values: &[f64]) -> Vec<u8> {
	let (min, max) = values
		.iter()
		.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &v| {
			(min.min(v), max.max(v))
		});

	if values.is_empty() || max <= min {
		return vec![MID_GREY; values.len()];
	}

	let range = max - min;
	values
		.iter()
		.map(|&v| ((v - min) / range * 255.0).round().clamp(0.0, 255.0) as u8)
		.collect()
}
