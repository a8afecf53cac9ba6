//! Windows Heap Walker and Heap Finder (spec.md components H and I): NT
//! heap internals (segments, the look-aside list, the low-fragmentation
//! heap, and virtual-alloc blocks) reduced to two disjoint chunk sets —
//! user allocations and free chunks — via the set algebra in `walker.rs`.

pub mod finder;
pub mod types;
pub mod walker;

pub use finder::HeapFinder;
pub use walker::{Chunk, HeapWalker};

use crate::platform::PointerWidth;
use crate::record::RecordRegistry;

/// Marks a live `HEAP` structure; read from the first four bytes of
/// `win32.HEAP`. Constant across all supported Windows versions.
pub const HEAP_SIGNATURE: u32 = 0xEEFF_EEFF;

/// Set on a `HEAP_ENTRY`'s flags byte when the chunk is in use. Chunks
/// without this bit are free.
pub const HEAP_ENTRY_BUSY: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEndHeapType {
	None,
	LookAside,
	LowFragmentation,
}

impl FrontEndHeapType {
	pub fn from_raw(raw: u8) -> Self {
		match raw {
			1 => FrontEndHeapType::LookAside,
			2 => FrontEndHeapType::LowFragmentation,
			_ => FrontEndHeapType::None,
		}
	}
}

/// Registers every `win32.*` record type this module needs for both
/// pointer widths. Call once before running a [`HeapFinder`] or
/// constructing a [`HeapWalker`] directly.
pub fn register_win32_heap_types(registry: &mut RecordRegistry) {
	types::register_all(registry, PointerWidth::Bits32);
	types::register_all(registry, PointerWidth::Bits64);
}
