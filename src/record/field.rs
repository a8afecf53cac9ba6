//! Scalar values and field descriptors for the declarative Record Model.

/// A decoded scalar value, tagged with its original width/signedness so
/// constraint comparisons can still distinguish `u32` from `i32` when it
/// matters, while comparing magnitudes via `as_i128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarValue {
	U8(u8),
	U16(u16),
	U32(u32),
	U64(u64),
	I8(i8),
	I16(i16),
	I32(i32),
	I64(i64),
}

impl ScalarValue {
	pub fn as_i128(&self) -> i128 {
		match *self {
			ScalarValue::U8(v) => v as i128,
			ScalarValue::U16(v) => v as i128,
			ScalarValue::U32(v) => v as i128,
			ScalarValue::U64(v) => v as i128,
			ScalarValue::I8(v) => v as i128,
			ScalarValue::I16(v) => v as i128,
			ScalarValue::I32(v) => v as i128,
			ScalarValue::I64(v) => v as i128,
		}
	}

	pub fn as_u64(&self) -> Option<u64> {
		u64::try_from(self.as_i128()).ok()
	}
}

/// Byte width of an integer or bitfield-backing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
	W1,
	W2,
	W4,
	W8,
}

impl IntWidth {
	pub const fn bytes(self) -> u32 {
		match self {
			IntWidth::W1 => 1,
			IntWidth::W2 => 2,
			IntWidth::W4 => 4,
			IntWidth::W8 => 8,
		}
	}
}

/// The declared shape of one field of a [`super::RecordType`].
#[derive(Debug, Clone)]
pub enum FieldKind {
	Integer { width: IntWidth, signed: bool },
	/// A pointer, optionally to a named, registered Record Type. `weak`
	/// pointers are chased for bookkeeping but a failed recursive
	/// validation of the pointee does not fail this field's own
	/// constraint (spec.md 4.F: "unless the field is marked weak").
	Pointer { pointee: Option<String>, weak: bool },
	/// A nested record, decoded in place at `field.offset` within the
	/// same byte image.
	Inline(String),
	/// A fixed-length array. When `element_size` equals the platform's
	/// pointer width the Validator decodes each element as a pointer
	/// (used for the Windows heap's segment table); otherwise the array
	/// is kept as raw bytes.
	Array { element_size: u32, count: u32 },
	/// `bit_width` bits starting at `bit_offset` within an integer of the
	/// given backing `width`.
	Bitfield { width: IntWidth, bit_offset: u8, bit_width: u8 },
	/// Bytes with no further structural interpretation.
	Opaque { size: u32 },
}

#[derive(Debug, Clone)]
pub struct Field {
	pub name: String,
	pub offset: u32,
	pub width: u32,
	pub kind: FieldKind,
	pub constraint: Option<super::Constraint>,
}

/// Extracts `bit_width` bits starting at `bit_offset` from a decoded
/// integer. Modeled after the teacher's bit-manipulation idiom
/// (`GetBit::get_bitmask`), generalized from compile-time primitive impls
/// to a runtime `(bit_offset, bit_width)` pair.
pub fn extract_bits(raw: u64, bit_offset: u8, bit_width: u8) -> u64 {
	if bit_width == 0 || bit_offset >= 64 {
		return 0;
	}
	let width = bit_width.min(64 - bit_offset);
	let mask: u64 = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
	(raw >> bit_offset) & mask
}
