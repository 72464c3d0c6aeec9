use crate::rendering::DecodeError;
use crate::study::attributes::AttributeExt;
use dicom::core::Tag;
use dicom::object::InMemDicomObject;

const RED_DESCRIPTOR: Tag = Tag(0x0028, 0x1101);
const GREEN_DESCRIPTOR: Tag = Tag(0x0028, 0x1102);
const BLUE_DESCRIPTOR: Tag = Tag(0x0028, 0x1103);
const RED_DATA: Tag = Tag(0x0028, 0x1201);
const GREEN_DATA: Tag = Tag(0x0028, 0x1202);
const BLUE_DATA: Tag = Tag(0x0028, 0x1203);

/// One color channel of a PALETTE COLOR lookup table, normalized to 8 bit entries.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChannelLut {
	first_mapped: i64,
	entries: Vec<u8>,
}

impl ChannelLut {
	fn read(object: &InMemDicomObject, descriptor: Tag, data: Tag) -> Result<Self, DecodeError> {
		let malformed = |reason: &str| DecodeError::Malformed {
			reason: format!("palette {descriptor}: {reason}"),
		};

		let descriptor_values = object
			.ints(descriptor)
			.filter(|values| values.len() == 3)
			.ok_or_else(|| malformed("missing or invalid LUT descriptor"))?;
		// An entry count of 0 means 2^16 entries
		let count = match descriptor_values[0] {
			0 => 65_536,
			n => usize::try_from(n).map_err(|_| malformed("negative entry count"))?,
		};
		let first_mapped = descriptor_values[1];
		let bits = descriptor_values[2];

		let raw = object
			.element(data)
			.map_err(|_| malformed("missing LUT data"))?
			.to_bytes()
			.map_err(|err| malformed(&err.to_string()))?;

		let entries: Vec<u8> = if bits <= 8 && raw.len() == count {
			raw.to_vec()
		} else {
			raw.chunks_exact(2)
				.take(count)
				.map(|word| {
					let value = u16::from_le_bytes([word[0], word[1]]);
					if bits <= 8 {
						(value & 0xFF) as u8
					} else {
						(value >> 8) as u8
					}
				})
				.collect()
		};

		if entries.is_empty() {
			return Err(malformed("empty LUT data"));
		}

		Ok(Self {
			first_mapped,
			entries,
		})
	}

	/// Values below the first mapped value use the first entry, values past the end use the last.
	fn lookup(&self, index: i64) -> u8 {
		let offset = index.saturating_sub(self.first_mapped).max(0);
		let offset = usize::try_from(offset).unwrap_or(usize::MAX);
		self.entries
			.get(offset)
			.or_else(|| self.entries.last())
			.copied()
			.unwrap_or_default()
	}
}

/// The red, green and blue lookup tables of a PALETTE COLOR instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteLut {
	red: ChannelLut,
	green: ChannelLut,
	blue: ChannelLut,
}

impl PaletteLut {
	pub fn from_object(object: &InMemDicomObject) -> Result<Self, DecodeError> {
		Ok(Self {
			red: ChannelLut::read(object, RED_DESCRIPTOR, RED_DATA)?,
			green: ChannelLut::read(object, GREEN_DESCRIPTOR, GREEN_DATA)?,
			blue: ChannelLut::read(object, BLUE_DESCRIPTOR, BLUE_DATA)?,
		})
	}

	pub fn map(&self, index: i64) -> [u8; 3] {
		[
			self.red.lookup(index),
			self.green.lookup(index),
			self.blue.lookup(index),
		]
	}
}
