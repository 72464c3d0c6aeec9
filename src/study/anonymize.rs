use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;

/// Patient identifying attributes removed when anonymization is requested.
const PATIENT_IDENTITY_TAGS: &[Tag] = &[
	tags::PATIENT_NAME,
	tags::PATIENT_ID,
	tags::PATIENT_BIRTH_DATE,
	tags::PATIENT_SEX,
	Tag(0x0010, 0x0021), // Issuer of Patient ID
	Tag(0x0010, 0x0032), // Patient's Birth Time
	Tag(0x0010, 0x1000), // Other Patient IDs
	Tag(0x0010, 0x1001), // Other Patient Names
	Tag(0x0010, 0x1002), // Other Patient IDs Sequence
	Tag(0x0010, 0x1005), // Patient's Birth Name
	Tag(0x0010, 0x1040), // Patient's Address
	Tag(0x0010, 0x1060), // Patient's Mother's Birth Name
	Tag(0x0010, 0x1090), // Medical Record Locator
	Tag(0x0010, 0x2154), // Patient's Telephone Numbers
	Tag(0x0010, 0x4000), // Patient Comments
	Tag(0x0008, 0x0090), // Referring Physician's Name
	Tag(0x0008, 0x0092), // Referring Physician's Address
	Tag(0x0008, 0x0094), // Referring Physician's Telephone Numbers
];

/// Strips patient identifying attributes from a metadata object. Pixel data is not touched.
pub fn strip_patient_identity(object: &mut InMemDicomObject) {
	for tag in PATIENT_IDENTITY_TAGS {
		object.remove_element(*tag);
	}
}
