use crate::study::anonymize::strip_patient_identity;
use crate::study::attributes::AttributeExt;
use crate::study::instance::InstanceDescriptor;
use crate::types::{trim_uid, IS, UI};
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use tracing::warn;

/// The metadata objects of one study as returned by the archive.
#[derive(Debug, Clone)]
pub struct StudyMetadata {
	study_instance_uid: UI,
	objects: Vec<InMemDicomObject>,
	anonymized: bool,
}

impl StudyMetadata {
	pub fn new(study_instance_uid: impl Into<UI>, objects: Vec<InMemDicomObject>) -> Self {
		Self {
			study_instance_uid: study_instance_uid.into(),
			objects,
			anonymized: false,
		}
	}

	pub fn study_instance_uid(&self) -> &str {
		&self.study_instance_uid
	}

	pub fn len(&self) -> usize {
		self.objects.len()
	}

	/// Removes patient identifying attributes from every object.
	pub fn anonymize(&mut self) {
		for object in &mut self.objects {
			strip_patient_identity(object);
		}
		self.anonymized = true;
	}

	/// The instances of the study in discovery order.
	/// Objects without instance identity or belonging to another study are skipped.
	pub fn instances(&self) -> Vec<InstanceDescriptor> {
		let mut instances: Vec<InstanceDescriptor> = self
			.objects
			.iter()
			.filter_map(|object| {
				let descriptor = InstanceDescriptor::from_object(&self.study_instance_uid, object);
				if descriptor.is_none() {
					warn!("Skipping metadata object without series or SOP instance UID");
				}
				descriptor
			})
			.filter(|descriptor| {
				let same_study = descriptor.study_instance_uid == self.study_instance_uid;
				if !same_study {
					warn!(
						sop_instance_uid = descriptor.sop_instance_uid,
						"Skipping instance of another study"
					);
				}
				same_study
			})
			.collect();

		instances.sort_by(InstanceDescriptor::discovery_cmp);
		instances.dedup_by(|a, b| a.sop_instance_uid == b.sop_instance_uid);
		instances
	}

	/// Study level information for the cover page.
	/// Study attributes are taken from the first object that has them.
	pub fn summary(&self) -> StudySummary {
		let first = |tag| self.objects.iter().find_map(|object| object.string(tag));

		let mut series: Vec<SeriesSummary> = Vec::new();
		for instance in self.instances() {
			let frames = u64::from(instance.number_of_frames);
			if let Some(summary) = series
				.iter_mut()
				.find(|s| s.series_instance_uid == instance.series_instance_uid)
			{
				summary.instance_count += 1;
				summary.frame_count += frames;
				if summary.modality.is_none() {
					summary.modality = instance.modality;
				}
			} else {
				series.push(SeriesSummary {
					series_instance_uid: instance.series_instance_uid,
					series_number: instance.series_number,
					modality: instance.modality,
					description: instance.series_description,
					instance_count: 1,
					frame_count: frames,
				});
			}
		}

		StudySummary {
			study_instance_uid: self.study_instance_uid.clone(),
			patient_name: first(tags::PATIENT_NAME).map(|name| format_person_name(&name)),
			patient_id: first(tags::PATIENT_ID),
			patient_birth_date: first(tags::PATIENT_BIRTH_DATE),
			patient_sex: first(tags::PATIENT_SEX),
			study_date: first(tags::STUDY_DATE),
			accession_number: first(tags::ACCESSION_NUMBER),
			study_description: first(tags::STUDY_DESCRIPTION),
			institution_name: first(tags::INSTITUTION_NAME),
			anonymized: self.anonymized,
			series,
		}
	}
}

/// Study, patient and procedure information shown on the cover page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudySummary {
	pub study_instance_uid: UI,
	pub patient_name: Option<String>,
	pub patient_id: Option<String>,
	pub patient_birth_date: Option<String>,
	pub patient_sex: Option<String>,
	pub study_date: Option<String>,
	pub accession_number: Option<String>,
	pub study_description: Option<String>,
	pub institution_name: Option<String>,
	pub anonymized: bool,
	pub series: Vec<SeriesSummary>,
}

impl StudySummary {
	/// Description of a series for page headers.
	pub fn series_label(&self, series_instance_uid: &str) -> String {
		self.series
			.iter()
			.find(|s| s.series_instance_uid == series_instance_uid)
			.and_then(|s| s.description.clone())
			.unwrap_or_else(|| {
				let uid = trim_uid(series_instance_uid);
				let prefix: String = uid.chars().take(8).collect();
				format!("Series {prefix}...")
			})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSummary {
	pub series_instance_uid: UI,
	pub series_number: Option<IS>,
	pub modality: Option<String>,
	pub description: Option<String>,
	pub instance_count: usize,
	pub frame_count: u64,
}

/// Renders a PN value (`FAMILY^GIVEN^MIDDLE^PREFIX^SUFFIX`) as plain text.
fn format_person_name(name: &str) -> String {
	// Only the alphabetic component group is used
	let alphabetic = name.split('=').next().unwrap_or_default();
	alphabetic
		.split('^')
		.map(str::trim)
		.filter(|component| !component.is_empty())
		.collect::<Vec<_>>()
		.join(" ")
}

#[cfg(test)]
mod tests {
	use super::*;
	use dicom::core::VR;

	fn instance(series: &str, series_number: &str, sop: &str, number: &str) -> InMemDicomObject {
		let mut object = InMemDicomObject::new_empty();
		object.put_str(tags::STUDY_INSTANCE_UID, VR::UI, "1.2.3");
		object.put_str(tags::SERIES_INSTANCE_UID, VR::UI, series);
		object.put_str(tags::SERIES_NUMBER, VR::IS, series_number);
		object.put_str(tags::SOP_INSTANCE_UID, VR::UI, sop);
		object.put_str(tags::INSTANCE_NUMBER, VR::IS, number);
		object.put_str(tags::MODALITY, VR::CS, "CT");
		object.put_str(tags::PATIENT_NAME, VR::PN, "DOE^JANE");
		object.put_str(tags::PATIENT_ID, VR::LO, "P-1");
		object
	}

	#[test]
	fn instances_are_in_discovery_order() {
		let metadata = StudyMetadata::new(
			"1.2.3",
			vec![
				instance("1.2.3.2", "2", "1.2.3.2.1", "1"),
				instance("1.2.3.1", "1", "1.2.3.1.2", "2"),
				instance("1.2.3.1", "1", "1.2.3.1.1", "1"),
				instance("1.2.3.1", "1", "1.2.3.1.1", "1"),
			],
		);

		let uids: Vec<String> = metadata
			.instances()
			.into_iter()
			.map(|i| i.sop_instance_uid)
			.collect();
		assert_eq!(uids, ["1.2.3.1.1", "1.2.3.1.2", "1.2.3.2.1"]);
	}

	#[test]
	fn foreign_instances_are_skipped() {
		let mut foreign = instance("9.9.1", "1", "9.9.1.1", "1");
		foreign.put_str(tags::STUDY_INSTANCE_UID, VR::UI, "9.9");
		let metadata = StudyMetadata::new("1.2.3", vec![foreign]);
		assert!(metadata.instances().is_empty());
	}

	#[test]
	fn summary_groups_series() {
		let metadata = StudyMetadata::new(
			"1.2.3",
			vec![
				instance("1.2.3.1", "1", "1.2.3.1.1", "1"),
				instance("1.2.3.1", "1", "1.2.3.1.2", "2"),
				instance("1.2.3.2", "2", "1.2.3.2.1", "1"),
			],
		);

		let summary = metadata.summary();
		assert_eq!(summary.patient_name.as_deref(), Some("DOE JANE"));
		assert_eq!(summary.series.len(), 2);
		assert_eq!(summary.series[0].instance_count, 2);
		assert_eq!(summary.series[0].frame_count, 2);
		assert_eq!(summary.series_label("1.2.3.2"), "Series 1.2.3.2...");
	}

	#[test]
	fn anonymized_summary_has_no_identity() {
		let mut metadata = StudyMetadata::new("1.2.3", vec![instance("1.2.3.1", "1", "1.2.3.1.1", "1")]);
		metadata.anonymize();

		let summary = metadata.summary();
		assert!(summary.anonymized);
		assert_eq!(summary.patient_name, None);
		assert_eq!(summary.patient_id, None);
		assert_eq!(summary.series.len(), 1);
	}
}
