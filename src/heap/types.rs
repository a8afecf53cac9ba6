//! Declared layouts for the NT heap structures this module understands.
//!
//! Real ntdll offsets vary across Windows versions and are not something
//! we can verify without a running target, so these layouts are built
//! field-by-field with [`RecordTypeBuilder`] rather than hard-coded at
//! specific byte offsets; see `DESIGN.md` for the rationale. The set
//! algebra in `walker.rs` only depends on field *names*, not absolute
//! offsets, so this is transparent to the rest of the module.

use crate::platform::PointerWidth;
use crate::record::{Constraint, IntWidth, RecordRegistry, RecordTypeBuilder};

/// Upper bound on segments tracked directly in `win32.HEAP`, mirroring the
/// real `HEAP_MAXIMUM_SEGMENTS` constant.
pub const MAX_SEGMENTS: u32 = 64;

/// Upper bound on LFH blocks tracked by one `win32.HEAP_USERDATA_HEADER`,
/// matched to the two 64-bit bitmap fields declared below.
pub const MAX_LFH_BLOCKS: u32 = 128;

pub fn register_all(registry: &mut RecordRegistry, pointer_width: PointerWidth) {
	registry.register(pointer_width, heap(pointer_width));
	registry.register(pointer_width, heap_segment(pointer_width));
	registry.register(pointer_width, heap_entry(pointer_width));
	registry.register(pointer_width, heap_ucr_descriptor(pointer_width));
	registry.register(pointer_width, heap_virtual_alloc_entry(pointer_width));
	registry.register(pointer_width, heap_userdata_header(pointer_width));
}

/// Byte offset of `win32.HEAP`'s `signature` field; the Heap Finder scans
/// for [`super::HEAP_SIGNATURE`] at this offset within a candidate region.
pub fn heap_signature_field_offset() -> u32 {
	0
}

pub fn heap(pointer_width: PointerWidth) -> crate::record::RecordType {
	RecordTypeBuilder::new("win32.HEAP")
		.pointer_width(pointer_width)
		.integer_u32("signature")
		.integer_u32("flags")
		.integer_u32("front_end_heap_type")
		.pointer_with_constraint("front_end_heap", None, true, Constraint::ValidPointer)
		.pointer_with_constraint("lookaside_list", None, true, Constraint::ValidPointer)
		.pointer("virtual_alloc_list", Some("win32.HEAP_VIRTUAL_ALLOC_ENTRY"), true)
		.integer_u32("segment_count")
		.array("segments", pointer_width.as_bytes() as u32, MAX_SEGMENTS)
		.build()
}

pub fn heap_segment(pointer_width: PointerWidth) -> crate::record::RecordType {
	RecordTypeBuilder::new("win32.HEAP_SEGMENT")
		.pointer_width(pointer_width)
		.integer_u32("signature")
		.pointer_with_constraint("heap", None, false, Constraint::ValidInstanceOf("win32.HEAP".to_owned()))
		.pointer_with_constraint("first_entry", None, true, Constraint::ValidPointer)
		.pointer("last_valid_entry", None, true)
		.integer_u32("num_ucrs")
		.pointer("ucr_head", Some("win32.HEAP_UCR_DESCRIPTOR"), true)
		.build()
}

pub fn heap_entry(pointer_width: PointerWidth) -> crate::record::RecordType {
	RecordTypeBuilder::new("win32.HEAP_ENTRY")
		.pointer_width(pointer_width)
		.integer_u16("size")
		.integer_u16("previous_size")
		.integer_u8("segment_offset")
		.integer_u8("flags")
		.integer_u8("unused_bytes")
		.integer_u8("reserved")
		.build()
}

pub fn heap_ucr_descriptor(pointer_width: PointerWidth) -> crate::record::RecordType {
	RecordTypeBuilder::new("win32.HEAP_UCR_DESCRIPTOR")
		.pointer_width(pointer_width)
		.pointer("next", Some("win32.HEAP_UCR_DESCRIPTOR"), true)
		.pointer("address", None, true)
		.integer("size", IntWidth::W8, false)
		.build()
}

pub fn heap_virtual_alloc_entry(pointer_width: PointerWidth) -> crate::record::RecordType {
	RecordTypeBuilder::new("win32.HEAP_VIRTUAL_ALLOC_ENTRY")
		.pointer_width(pointer_width)
		.pointer("next", Some("win32.HEAP_VIRTUAL_ALLOC_ENTRY"), true)
		.integer("commit_size", IntWidth::W8, false)
		.integer("reserve_size", IntWidth::W8, false)
		.build()
}

/// Deliberately simplified low-fragmentation-heap bucket model: the real
/// LFH bucket layout differs across Windows 7/8/10 and is a named Open
/// Question this module resolves with a version-agnostic table instead of
/// hard-coded offsets for one specific version.
pub fn heap_userdata_header(pointer_width: PointerWidth) -> crate::record::RecordType {
	RecordTypeBuilder::new("win32.HEAP_USERDATA_HEADER")
		.pointer_width(pointer_width)
		.pointer("list_next", Some("win32.HEAP_USERDATA_HEADER"), true)
		.integer_u32("block_size_granules")
		.integer_u32("block_count")
		.integer("bitmap_lo", IntWidth::W8, false)
		.integer("bitmap_hi", IntWidth::W8, false)
		.build()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn heap_layout_differs_by_pointer_width() {
		let heap32 = heap(PointerWidth::Bits32);
		let heap64 = heap(PointerWidth::Bits64);
		assert!(heap64.size > heap32.size);
	}

	#[test]
	fn signature_offset_is_first_field() {
		let heap64 = heap(PointerWidth::Bits64);
		assert_eq!(heap64.field("signature").unwrap().offset, heap_signature_field_offset());
	}
}
