//! Heap Finder (spec.md component I): scans every region for the NT heap
//! signature and hands back a [`HeapWalker`] for each confirmed hit.

use std::sync::OnceLock;

use crate::error::HsResult;
use crate::memory::MemoryHandler;
use crate::platform::PointerWidth;
use crate::record::RecordRegistry;
use crate::validator::Validator;

use super::types::heap_signature_field_offset;
use super::{HeapWalker, HEAP_SIGNATURE};

/// Both pointer widths the finder tries against every signature match
/// (spec.md §4.I): a process's own declared platform width says nothing
/// about the width of a heap living inside it (WoW64 hosts 32-bit heaps
/// inside 64-bit processes, and vice versa for a 32-bit debugger attached
/// to a 64-bit dump).
const TRIAL_WIDTHS: [PointerWidth; 2] = [PointerWidth::Bits32, PointerWidth::Bits64];

pub struct HeapFinder<'h> {
	handler: &'h MemoryHandler,
	registry: &'h RecordRegistry,
	walkers: OnceLock<Vec<HeapWalker<'h>>>,
	address_index: OnceLock<Vec<(u64, u64, usize)>>,
}

impl<'h> HeapFinder<'h> {
	pub fn new(handler: &'h MemoryHandler, registry: &'h RecordRegistry) -> Self {
		Self { handler, registry, walkers: OnceLock::new(), address_index: OnceLock::new() }
	}

	/// Page-sized stride (spec.md §4.I): heap segments are page-allocated,
	/// so a `HEAP` header only ever begins on a page boundary.
	const SCAN_STRIDE: u64 = 4096;

	/// Scans every region at page-sized strides for [`HEAP_SIGNATURE`],
	/// confirming each candidate against both pointer widths and keeping
	/// whichever confirms first. Walkers come back sorted by heap address,
	/// since regions are iterated in ascending `start` order and each
	/// region is scanned low-to-high. The result is memoised: repeated
	/// calls re-scan only once per `HeapFinder`.
	pub fn list_heap_walkers(&self) -> HsResult<&[HeapWalker<'h>]> {
		if let Some(found) = self.walkers.get() {
			return Ok(found);
		}

		let mut found = Vec::new();
		for region in self.handler.regions() {
			let mut addr = crate::searcher::align_up(region.start, Self::SCAN_STRIDE);
			while addr + 4 <= region.end {
				if let Ok(bytes) = region.read_bytes(addr, 4) {
					let signature = self.handler.platform().read_u32(&bytes);
					if signature == HEAP_SIGNATURE {
						if let Some(width) = self.confirm_heap_at(addr) {
							self.handler.set_heap_hint(addr);
							found.push(HeapWalker::new(self.handler, self.registry, addr, width));
						}
					}
				}
				addr += Self::SCAN_STRIDE;
			}
		}
		let _ = self.walkers.set(found);
		Ok(self.walkers.get().expect("just initialized"))
	}

	/// Re-validates a candidate address as a full `win32.HEAP` record,
	/// trying both pointer widths in turn and returning the first one that
	/// confirms, rejecting the candidate only if neither width decodes a
	/// consistent signature (spec.md §4.I).
	pub fn confirm_heap_at(&self, addr: u64) -> Option<PointerWidth> {
		for width in TRIAL_WIDTHS {
			let validator = Validator::with_pointer_width(self.handler, self.registry, width);
			if let Ok(instance) = validator.load(addr, "win32.HEAP", 1) {
				if instance.validated && instance.scalar_u64("signature") == Some(HEAP_SIGNATURE as u64) {
					return Some(width);
				}
			}
		}
		None
	}

	/// The confirmed heap (if any) whose used mappings contain `addr`,
	/// built lazily from [`list_heap_walkers`] and each walker's
	/// `list_used_mappings()` (spec.md §4.I) and cached for the finder's
	/// lifetime.
	pub fn walker_for_address(&self, addr: u64) -> HsResult<Option<&HeapWalker<'h>>> {
		self.list_heap_walkers()?;
		if self.address_index.get().is_none() {
			let walkers = self.walkers.get().expect("populated by list_heap_walkers");
			let mut index = Vec::new();
			for (i, walker) in walkers.iter().enumerate() {
				for (start, end) in walker.list_used_mappings()? {
					index.push((start, end, i));
				}
			}
			index.sort_by_key(|&(start, _, _)| start);
			let _ = self.address_index.set(index);
		}

		let index = self.address_index.get().expect("just initialized");
		let walkers = self.walkers.get().expect("populated by list_heap_walkers");
		Ok(index
			.iter()
			.find(|&&(start, end, _)| addr >= start && addr < end)
			.map(|&(_, _, i)| &walkers[i]))
	}

	/// The byte offset within `win32.HEAP` the scan matches against;
	/// exposed for callers that want to locate the signature without
	/// decoding the whole structure.
	pub fn signature_offset() -> u32 {
		heap_signature_field_offset()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::{InMemorySource, Permissions, Region};
	use crate::platform::TargetPlatform;
	use crate::record::RecordRegistry;

	#[test]
	fn finds_confirmed_heap_signature() {
		let mut registry = RecordRegistry::new();
		super::super::register_win32_heap_types(&mut registry);
		let pw = TargetPlatform::windows_x86_64().pointer_width();
		let heap_size = registry.get("win32.HEAP", pw).unwrap().size as usize;

		let heap_addr = 0x5000u64;
		let mut bytes = vec![0u8; heap_size];
		bytes[0..4].copy_from_slice(&HEAP_SIGNATURE.to_le_bytes());

		let region = Region::new(
			heap_addr,
			heap_addr + heap_size as u64,
			Permissions::READ,
			None,
			Box::new(InMemorySource::new(bytes)),
		);
		let handler = MemoryHandler::new(TargetPlatform::windows_x86_64(), vec![region]).unwrap();

		let finder = HeapFinder::new(&handler, &registry);
		let walkers = finder.list_heap_walkers().unwrap();
		assert_eq!(walkers.len(), 1);
		assert_eq!(walkers[0].heap_address(), heap_addr);
	}

	/// A heap backed by a region only big enough for the 32-bit `win32.HEAP`
	/// layout must still confirm even though the handler declares a 64-bit
	/// platform (spec.md §4.I: try both widths regardless of the host
	/// platform) — the 64-bit trial runs out of region before it finishes
	/// decoding and fails, leaving the 32-bit trial as the one that matches.
	#[test]
	fn confirms_32_bit_heap_inside_a_64_bit_handler() {
		let mut registry = RecordRegistry::new();
		super::super::register_win32_heap_types(&mut registry);
		let heap_size_32 = registry.get("win32.HEAP", PointerWidth::Bits32).unwrap().size as usize;
		let heap_size_64 = registry.get("win32.HEAP", PointerWidth::Bits64).unwrap().size as usize;
		assert!(heap_size_32 < heap_size_64, "fixture assumes the 64-bit layout is strictly larger");

		let heap_addr = 0x6000u64;
		let mut bytes = vec![0u8; heap_size_32];
		bytes[0..4].copy_from_slice(&HEAP_SIGNATURE.to_le_bytes());

		let region = Region::new(
			heap_addr,
			heap_addr + heap_size_32 as u64,
			Permissions::READ,
			None,
			Box::new(InMemorySource::new(bytes)),
		);
		let handler = MemoryHandler::new(TargetPlatform::windows_x86_64(), vec![region]).unwrap();

		let finder = HeapFinder::new(&handler, &registry);
		assert_eq!(finder.confirm_heap_at(heap_addr), Some(PointerWidth::Bits32));

		let walkers = finder.list_heap_walkers().unwrap();
		assert_eq!(walkers.len(), 1);
		assert_eq!(walkers[0].pointer_width(), PointerWidth::Bits32);
	}

	#[test]
	fn walker_for_address_resolves_via_used_mappings() {
		let mut registry = RecordRegistry::new();
		super::super::register_win32_heap_types(&mut registry);
		let pw = TargetPlatform::windows_x86_64().pointer_width();
		let heap_size = registry.get("win32.HEAP", pw).unwrap().size as usize;

		let heap_addr = 0x7000u64;
		let mut bytes = vec![0u8; heap_size];
		bytes[0..4].copy_from_slice(&HEAP_SIGNATURE.to_le_bytes());

		let region = Region::new(
			heap_addr,
			heap_addr + heap_size as u64,
			Permissions::READ,
			None,
			Box::new(InMemorySource::new(bytes)),
		);
		let handler = MemoryHandler::new(TargetPlatform::windows_x86_64(), vec![region]).unwrap();

		let finder = HeapFinder::new(&handler, &registry);
		// a heap with no segments has no used mappings, so no address
		// (including its own header) resolves through the dictionary.
		assert!(finder.walker_for_address(heap_addr).unwrap().is_none());
		assert!(finder.walker_for_address(0xdead_beef).unwrap().is_none());
	}
}
