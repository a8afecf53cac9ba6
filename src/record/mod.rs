//! The declarative Record Model (spec.md component E): record types are a
//! tagged-variant tree of field descriptors rather than a trait-object or
//! inheritance hierarchy, so new layouts (including the Windows heap's
//! internal structures in [`crate::heap::types`]) are plain data, never new
//! Rust types.

mod constraint;
mod field;
mod instance;
mod registry;

pub use constraint::{check_scalar, Constraint};
pub use field::{extract_bits, Field, FieldKind, IntWidth, ScalarValue};
pub use instance::RecordInstance;
pub use registry::RecordRegistry;

use crate::platform::PointerWidth;

/// A named, fixed-size layout: an ordered list of [`Field`]s plus their
/// total byte size. Built with [`RecordTypeBuilder`] rather than written by
/// hand, so offsets always agree with declaration order.
#[derive(Debug, Clone)]
pub struct RecordType {
	pub name: String,
	pub fields: Vec<Field>,
	pub size: u32,
}

impl RecordType {
	pub fn field(&self, name: &str) -> Option<&Field> {
		self.fields.iter().find(|f| f.name == name)
	}
}

/// Fluent builder that accumulates field offsets as fields are declared, in
/// lieu of hard-coding real struct offsets we have no way to verify without
/// running the toolchain against a real ntdll. See `DESIGN.md` for the
/// rationale.
pub struct RecordTypeBuilder {
	name: String,
	fields: Vec<Field>,
	cursor: u32,
	pointer_width: PointerWidth,
}

impl RecordTypeBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into(), fields: Vec::new(), cursor: 0, pointer_width: PointerWidth::Bits64 }
	}

	/// Sets the pointer width used to size pointer/pointer-array fields
	/// declared from this point onward. Call before any `pointer`/
	/// `pointer_array` invocation that needs the narrower width.
	pub fn pointer_width(mut self, width: PointerWidth) -> Self {
		self.pointer_width = width;
		self
	}

	fn push(&mut self, name: &str, width: u32, kind: FieldKind, constraint: Option<Constraint>) {
		self.fields.push(Field { name: name.to_owned(), offset: self.cursor, width, kind, constraint });
		self.cursor += width;
	}

	pub fn integer(mut self, name: &str, width: IntWidth, signed: bool) -> Self {
		let w = width.bytes();
		self.push(name, w, FieldKind::Integer { width, signed }, None);
		self
	}

	pub fn integer_u8(self, name: &str) -> Self {
		self.integer(name, IntWidth::W1, false)
	}

	pub fn integer_u16(self, name: &str) -> Self {
		self.integer(name, IntWidth::W2, false)
	}

	pub fn integer_u32(self, name: &str) -> Self {
		self.integer(name, IntWidth::W4, false)
	}

	pub fn integer_u64(self, name: &str) -> Self {
		self.integer(name, IntWidth::W8, false)
	}

	pub fn integer_with_constraint(
		mut self,
		name: &str,
		width: IntWidth,
		signed: bool,
		constraint: Constraint,
	) -> Self {
		let w = width.bytes();
		self.push(name, w, FieldKind::Integer { width, signed }, Some(constraint));
		self
	}

	pub fn pointer(mut self, name: &str, pointee: Option<&str>, weak: bool) -> Self {
		let w = self.pointer_width.as_bytes() as u32;
		self.push(
			name,
			w,
			FieldKind::Pointer { pointee: pointee.map(|s| s.to_owned()), weak },
			None,
		);
		self
	}

	pub fn pointer_with_constraint(
		mut self,
		name: &str,
		pointee: Option<&str>,
		weak: bool,
		constraint: Constraint,
	) -> Self {
		let w = self.pointer_width.as_bytes() as u32;
		self.push(
			name,
			w,
			FieldKind::Pointer { pointee: pointee.map(|s| s.to_owned()), weak },
			Some(constraint),
		);
		self
	}

	pub fn inline(mut self, name: &str, type_name: &str, size: u32) -> Self {
		self.push(name, size, FieldKind::Inline(type_name.to_owned()), None);
		self
	}

	pub fn array(mut self, name: &str, element_size: u32, count: u32) -> Self {
		self.push(name, element_size * count, FieldKind::Array { element_size, count }, None);
		self
	}

	pub fn bitfield(mut self, name: &str, width: IntWidth, bit_offset: u8, bit_width: u8) -> Self {
		let w = width.bytes();
		self.push(name, w, FieldKind::Bitfield { width, bit_offset, bit_width }, None);
		self
	}

	pub fn opaque(mut self, name: &str, size: u32) -> Self {
		self.push(name, size, FieldKind::Opaque { size }, None);
		self
	}

	/// Pads the cursor out to `size`, appending an unnamed opaque tail
	/// field if there is a gap. Used when a declared layout needs to match
	/// a known total size without naming every trailing byte.
	pub fn pad_to(mut self, size: u32) -> Self {
		if size > self.cursor {
			let gap = size - self.cursor;
			self.push("_pad", gap, FieldKind::Opaque { size: gap }, None);
		}
		self
	}

	pub fn build(self) -> RecordType {
		RecordType { name: self.name, fields: self.fields, size: self.cursor }
	}
}
