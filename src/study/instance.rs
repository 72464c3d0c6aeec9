use crate::study::attributes::AttributeExt;
use crate::types::{trim_uid, IS, UI, US};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;

/// (0008,3002) Available Transfer Syntax UID, returned by some archives in metadata responses.
const AVAILABLE_TRANSFER_SYNTAX_UID: Tag = Tag(0x0008, 0x3002);

/// Identity and pixel layout of one instance, as discovered from the study metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
	pub study_instance_uid: UI,
	pub series_instance_uid: UI,
	pub sop_instance_uid: UI,
	pub sop_class_uid: Option<UI>,
	pub series_number: Option<IS>,
	pub instance_number: Option<IS>,
	pub transfer_syntax_uid: Option<UI>,
	pub photometric_interpretation: Option<String>,
	pub bits_allocated: Option<US>,
	pub number_of_frames: u32,
	pub rows: Option<US>,
	pub columns: Option<US>,
	pub modality: Option<String>,
	pub series_description: Option<String>,
}

impl InstanceDescriptor {
	/// Builds a descriptor from a metadata object.
	/// Returns `None` if the object lacks the series or SOP instance UID.
	pub fn from_object(study_instance_uid: &str, object: &InMemDicomObject) -> Option<Self> {
		let uid = |tag| object.string(tag).map(|uid| trim_uid(&uid).to_owned());

		Some(Self {
			study_instance_uid: uid(tags::STUDY_INSTANCE_UID)
				.unwrap_or_else(|| study_instance_uid.to_owned()),
			series_instance_uid: uid(tags::SERIES_INSTANCE_UID)?,
			sop_instance_uid: uid(tags::SOP_INSTANCE_UID)?,
			sop_class_uid: uid(tags::SOP_CLASS_UID),
			series_number: object.int(tags::SERIES_NUMBER).and_then(|n| IS::try_from(n).ok()),
			instance_number: object
				.int(tags::INSTANCE_NUMBER)
				.and_then(|n| IS::try_from(n).ok()),
			transfer_syntax_uid: uid(tags::TRANSFER_SYNTAX_UID)
				.or_else(|| uid(AVAILABLE_TRANSFER_SYNTAX_UID)),
			photometric_interpretation: object.string(tags::PHOTOMETRIC_INTERPRETATION),
			bits_allocated: object.int(tags::BITS_ALLOCATED).and_then(|n| US::try_from(n).ok()),
			number_of_frames: object
				.int(tags::NUMBER_OF_FRAMES)
				.and_then(|n| u32::try_from(n).ok())
				.filter(|&n| n > 0)
				.unwrap_or(1),
			rows: object.int(tags::ROWS).and_then(|n| US::try_from(n).ok()),
			columns: object.int(tags::COLUMNS).and_then(|n| US::try_from(n).ok()),
			modality: object.string(tags::MODALITY),
			series_description: object.string(tags::SERIES_DESCRIPTION),
		})
	}

	/// Ordering key of one frame of this instance.
	pub fn ordering_key(&self, frame_index: u32, discovery_index: usize) -> OrderingKey {
		OrderingKey {
			series_number: self.series_number.map_or(i64::MAX, i64::from),
			instance_number: self.instance_number.map_or(i64::MAX, i64::from),
			frame_index,
			discovery_index,
		}
	}

	/// Discovery order: series number, series UID, instance number, SOP instance UID.
	pub(crate) fn discovery_cmp(&self, other: &Self) -> std::cmp::Ordering {
		let series = |d: &Self| d.series_number.map_or(i64::MAX, i64::from);
		let instance = |d: &Self| d.instance_number.map_or(i64::MAX, i64::from);

		series(self)
			.cmp(&series(other))
			.then_with(|| self.series_instance_uid.cmp(&other.series_instance_uid))
			.then_with(|| instance(self).cmp(&instance(other)))
			.then_with(|| self.sop_instance_uid.cmp(&other.sop_instance_uid))
	}
}

/// Page order of a frame. Compares by series number, instance number and frame index, with the
/// discovery index as the final tie breaker so that the order is total and deterministic.
/// Missing series or instance numbers sort last.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderingKey {
	pub series_number: i64,
	pub instance_number: i64,
	pub frame_index: u32,
	pub discovery_index: usize,
}

#[cfg(test)]
mod tests {
	use super::*;
	use dicom::core::VR;

	fn object(series_number: Option<&str>, instance_number: Option<&str>) -> InMemDicomObject {
		let mut object = InMemDicomObject::new_empty();
		object.put_str(tags::SERIES_INSTANCE_UID, VR::UI, "1.2.3.1");
		object.put_str(tags::SOP_INSTANCE_UID, VR::UI, "1.2.3.1.1\0");
		if let Some(number) = series_number {
			object.put_str(tags::SERIES_NUMBER, VR::IS, number);
		}
		if let Some(number) = instance_number {
			object.put_str(tags::INSTANCE_NUMBER, VR::IS, number);
		}
		object
	}

	#[test]
	fn descriptor_from_metadata() {
		let mut metadata = object(Some("2"), Some("7"));
		metadata.put_str(tags::NUMBER_OF_FRAMES, VR::IS, "3");
		metadata.put_str(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
		metadata.put_str(tags::TRANSFER_SYNTAX_UID, VR::UI, "1.2.840.10008.1.2.1");

		let descriptor = InstanceDescriptor::from_object("1.2.3", &metadata).unwrap();
		assert_eq!(descriptor.study_instance_uid, "1.2.3");
		assert_eq!(descriptor.sop_instance_uid, "1.2.3.1.1");
		assert_eq!(descriptor.series_number, Some(2));
		assert_eq!(descriptor.instance_number, Some(7));
		assert_eq!(descriptor.number_of_frames, 3);
		assert_eq!(
			descriptor.photometric_interpretation.as_deref(),
			Some("MONOCHROME2")
		);
		assert_eq!(
			descriptor.transfer_syntax_uid.as_deref(),
			Some("1.2.840.10008.1.2.1")
		);
	}

	#[test]
	fn descriptor_requires_instance_identity() {
		let mut metadata = InMemDicomObject::new_empty();
		metadata.put_str(tags::SERIES_INSTANCE_UID, VR::UI, "1.2.3.1");
		assert!(InstanceDescriptor::from_object("1.2.3", &metadata).is_none());
	}

	#[test]
	fn missing_numbers_sort_last() {
		let numbered = InstanceDescriptor::from_object("1.2.3", &object(Some("1"), Some("1"))).unwrap();
		let unnumbered = InstanceDescriptor::from_object("1.2.3", &object(None, None)).unwrap();

		assert!(numbered.ordering_key(0, 1) < unnumbered.ordering_key(0, 0));
		assert!(numbered.ordering_key(0, 0) < numbered.ordering_key(1, 0));
	}
}
