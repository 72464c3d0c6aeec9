use printpdf::Mm;

/// A4 portrait.
pub const PAGE_WIDTH: Mm = Mm(210.0);
pub const PAGE_HEIGHT: Mm = Mm(297.0);

const MM_PER_INCH: f32 = 25.4;
const MM_PER_POINT: f32 = MM_PER_INCH / 72.0;

/// Side margin of 0.75 inch.
pub const MARGIN: Mm = Mm(0.75 * MM_PER_INCH);
/// Baseline offset of header and footer lines from the page edge.
pub const RULE_OFFSET: Mm = Mm(0.5 * MM_PER_INCH);
/// Vertical space reserved for header and footer in addition to the margins.
const ANNOTATION_SPACE: Mm = Mm(MM_PER_INCH);

/// Average Helvetica glyph width relative to the font size.
const AVERAGE_GLYPH_WIDTH: f32 = 0.5;

/// Where an image is drawn on the page and at which resolution.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Placement {
	pub x: Mm,
	pub y: Mm,
	pub width: Mm,
	pub height: Mm,
	/// Resolution at which the image has exactly the placed size.
	pub dpi: f32,
}

/// The box available for frame images.
pub fn image_box() -> (Mm, Mm, Mm, Mm) {
	let width = PAGE_WIDTH.0 - 2.0 * MARGIN.0;
	let height = PAGE_HEIGHT.0 - 2.0 * MARGIN.0 - ANNOTATION_SPACE.0;
	let x = MARGIN.0;
	let y = (PAGE_HEIGHT.0 - height) / 2.0;
	(Mm(x), Mm(y), Mm(width), Mm(height))
}

/// Scales an image of `pixels_wide` x `pixels_high` to fit the image box, preserving its aspect
/// ratio, and centers it.
#[allow(clippy::cast_precision_loss)]
pub fn fit_image(pixels_wide: u32, pixels_high: u32) -> Placement {
	let (box_x, box_y, box_width, box_height) = image_box();
	let pixels_wide = pixels_wide.max(1) as f32;
	let pixels_high = pixels_high.max(1) as f32;

	let scale = (box_width.0 / pixels_wide).min(box_height.0 / pixels_high);
	let width = pixels_wide * scale;
	let height = pixels_high * scale;

	Placement {
		x: Mm(box_x.0 + (box_width.0 - width) / 2.0),
		y: Mm(box_y.0 + (box_height.0 - height) / 2.0),
		width: Mm(width),
		height: Mm(height),
		dpi: MM_PER_INCH / scale,
	}
}

/// Approximate rendered width of a text line, used to right-align and center text.
#[allow(clippy::cast_precision_loss)]
pub fn text_width(text: &str, font_size: f32) -> Mm {
	Mm(text.chars().count() as f32 * font_size * AVERAGE_GLYPH_WIDTH * MM_PER_POINT)
}

/// The standard fonts only cover Latin-1.
pub fn printable(text: &str) -> String {
	text.chars()
		.map(|c| if c.is_control() || u32::from(c) > 0xFF { '?' } else { c })
		.collect()
}
