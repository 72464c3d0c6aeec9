use crate::document::layout::{printable, text_width, MARGIN, PAGE_HEIGHT, PAGE_WIDTH};
use crate::study::StudySummary;
use chrono::{DateTime, NaiveDate, Utc};
use printpdf::{IndirectFontRef, Mm, PdfLayerReference};

pub const TITLE: &str = "DICOM Study Report";
const ANONYMIZED: &str = "[ANONYMIZED]";
const UNKNOWN: &str = "Unknown";

/// Formats a DA value (`YYYYMMDD`) as `YYYY-MM-DD`. Other values are returned unchanged.
pub fn format_study_date(value: &str) -> String {
	NaiveDate::parse_from_str(value.trim(), "%Y%m%d")
		.map_or_else(|_| value.to_owned(), |date| date.format("%Y-%m-%d").to_string())
}

/// The text lines of the cover page, as label/value pairs. An empty label denotes a free line.
pub fn cover_lines(summary: &StudySummary, generated_at: DateTime<Utc>) -> Vec<(String, String)> {
	let known = |value: &Option<String>| value.clone().unwrap_or_else(|| UNKNOWN.to_owned());
	let mut lines = Vec::new();

	if summary.anonymized {
		lines.push((String::from("Patient"), ANONYMIZED.to_owned()));
		lines.push((String::from("Patient ID"), ANONYMIZED.to_owned()));
	} else {
		lines.push((String::from("Patient Name"), known(&summary.patient_name)));
		lines.push((String::from("Patient ID"), known(&summary.patient_id)));
	}

	lines.push((
		String::from("Study Date"),
		summary
			.study_date
			.as_deref()
			.map_or_else(|| UNKNOWN.to_owned(), format_study_date),
	));
	lines.push((String::from("Accession Number"), known(&summary.accession_number)));
	lines.push((String::from("Study UID"), summary.study_instance_uid.clone()));
	if let Some(description) = &summary.study_description {
		lines.push((String::from("Study Description"), description.clone()));
	}
	if let Some(institution) = &summary.institution_name {
		lines.push((String::from("Institution"), institution.clone()));
	}

	lines.push((String::new(), String::new()));
	lines.push((String::from("Series Summary"), String::new()));
	for series in &summary.series {
		lines.push((
			String::new(),
			format!(
				"- {} - {} ({} instances, {} images)",
				series.modality.as_deref().unwrap_or(UNKNOWN),
				series.description.as_deref().unwrap_or("No description"),
				series.instance_count,
				series.frame_count
			),
		));
	}

	lines.push((String::new(), String::new()));
	lines.push((
		String::new(),
		format!("Generated on: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
	));
	lines
}

/// Draws the cover page onto `layer`.
pub fn draw_cover(
	layer: &PdfLayerReference,
	regular: &IndirectFontRef,
	bold: &IndirectFontRef,
	summary: &StudySummary,
	generated_at: DateTime<Utc>,
) {
	const TITLE_SIZE: f32 = 24.0;
	const LINE_SIZE: f32 = 12.0;
	const LINE_HEIGHT: Mm = Mm(7.0);

	let title_x = (PAGE_WIDTH.0 - text_width(TITLE, TITLE_SIZE).0) / 2.0;
	let mut y = Mm(PAGE_HEIGHT.0 - 2.0 * MARGIN.0 - 10.0);
	layer.use_text(TITLE, TITLE_SIZE, Mm(title_x), y, bold);
	y -= Mm(20.0);

	for (label, value) in cover_lines(summary, generated_at) {
		if label.is_empty() {
			if !value.is_empty() {
				layer.use_text(printable(&value), LINE_SIZE, MARGIN, y, regular);
			}
		} else {
			let label = format!("{label}:");
			layer.use_text(&label, LINE_SIZE, MARGIN, y, bold);
			let offset = text_width(&label, LINE_SIZE).0 + 2.0;
			layer.use_text(printable(&value), LINE_SIZE, Mm(MARGIN.0 + offset), y, regular);
		}
		y -= LINE_HEIGHT;
		// Series beyond the page are not listed
		if y.0 < MARGIN.0 {
			break;
		}
	}
}
