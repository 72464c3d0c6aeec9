use dicom::core::Tag;
use dicom::object::InMemDicomObject;
use std::str::FromStr;

/// Lenient attribute accessors. Missing, empty or unconvertible values are all reported as `None`
/// since archives differ widely in which attributes they populate.
pub trait AttributeExt {
	fn string(&self, tag: Tag) -> Option<String>;
	fn int(&self, tag: Tag) -> Option<i64>;
	fn ints(&self, tag: Tag) -> Option<Vec<i64>>;
	fn float(&self, tag: Tag) -> Option<f64>;
	fn floats(&self, tag: Tag) -> Option<Vec<f64>>;
}

impl AttributeExt for InMemDicomObject {
	fn string(&self, tag: Tag) -> Option<String> {
		let value = self.element(tag).ok()?.to_str().ok()?;
		let value = value.trim_end_matches(['\0', ' ']).trim_start();
		(!value.is_empty()).then(|| value.to_owned())
	}

	fn int(&self, tag: Tag) -> Option<i64> {
		self.element(tag).ok()?.to_int::<i64>().ok()
	}

	fn ints(&self, tag: Tag) -> Option<Vec<i64>> {
		let element = self.element(tag).ok()?;
		match element.to_multi_int::<i64>() {
			Ok(values) if values.len() > 1 => Some(values),
			// Multiple values kept in a single string are not split by the conversion
			_ => split_values(&element.to_str().ok()?),
		}
	}

	fn float(&self, tag: Tag) -> Option<f64> {
		self.element(tag).ok()?.to_float64().ok()
	}

	fn floats(&self, tag: Tag) -> Option<Vec<f64>> {
		let element = self.element(tag).ok()?;
		match element.to_multi_float64() {
			Ok(values) if values.len() > 1 => Some(values),
			// Multiple values kept in a single string are not split by the conversion
			_ => split_values(&element.to_str().ok()?),
		}
	}
}

/// Parses a backslash separated multi-value string. Any unparsable part rejects the whole value.
fn split_values<T: FromStr>(value: &str) -> Option<Vec<T>> {
	value
		.trim_end_matches(['\0', ' '])
		.split('\\')
		.map(|part| part.trim().parse().ok())
		.collect()
}
