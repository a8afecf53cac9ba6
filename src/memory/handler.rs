use std::sync::OnceLock;

use sorted_vec::SortedVec;

use crate::error::{HsError, HsResult};
use crate::platform::TargetPlatform;

use super::Region;

/// Memory Handler (spec.md component C): the full set of regions backing a
/// target, kept sorted by start address for binary-search lookup, plus the
/// target platform they belong to.
///
/// `heap()` resolves the memory handler's notion of "the" heap without
/// this module depending on `crate::heap`: the Heap Finder calls
/// `set_heap_hint` once it has located one, avoiding a circular module
/// dependency between `memory` and `heap`.
pub struct MemoryHandler {
	platform: TargetPlatform,
	regions: SortedVec<Region>,
	heap_hint: OnceLock<u64>,
}

impl MemoryHandler {
	/// Builds a handler from an already-sorted-or-not list of regions,
	/// rejecting overlaps up front so every later lookup can assume a
	/// disjoint, sorted region set.
	pub fn new(platform: TargetPlatform, regions: Vec<Region>) -> HsResult<Self> {
		let mut sorted = SortedVec::new();
		for region in regions {
			sorted.insert(region);
		}
		check_no_overlaps(&sorted)?;
		Ok(Self { platform, regions: sorted, heap_hint: OnceLock::new() })
	}

	pub fn platform(&self) -> &TargetPlatform {
		&self.platform
	}

	pub fn regions(&self) -> impl Iterator<Item = &Region> {
		self.regions.iter()
	}

	pub fn region_count(&self) -> usize {
		self.regions.len()
	}

	/// Finds the region containing `addr`, if any, via binary search over
	/// the sorted region set.
	pub fn find_region(&self, addr: u64) -> Option<&Region> {
		let slice = self.regions.as_slice();
		let idx = match slice.binary_search_by(|r| r.start.cmp(&addr)) {
			Ok(i) => i,
			Err(0) => return None,
			Err(i) => i - 1,
		};
		let region = &slice[idx];
		region.contains(addr).then_some(region)
	}

	/// `find_region` plus a permission check (spec.md §4.B): an address only
	/// counts as valid if the region backing it is actually readable.
	pub fn is_valid_address(&self, addr: u64) -> Option<&Region> {
		self.find_region(addr).filter(|r| r.permissions.contains(super::Permissions::READ))
	}

	pub fn read_bytes(&self, addr: u64, len: usize) -> HsResult<Vec<u8>> {
		self.find_region(addr).ok_or(HsError::OutOfRegion)?.read_bytes(addr, len)
	}

	pub fn read_pointer(&self, addr: u64) -> HsResult<u64> {
		self.find_region(addr).ok_or(HsError::OutOfRegion)?.read_pointer(addr, &self.platform)
	}

	/// The region explicitly labelled `"heap"`, if any; otherwise the
	/// region previously recorded by `set_heap_hint`, if any.
	pub fn heap(&self) -> Option<&Region> {
		if let Some(region) = self.regions.iter().find(|r| r.is_heap()) {
			return Some(region);
		}
		self.heap_hint.get().and_then(|addr| self.find_region(*addr))
	}

	/// Records the address of a region confirmed by the Heap Finder as a
	/// fallback for `heap()` when no region carries an explicit `"heap"`
	/// label. Only the first call takes effect.
	pub fn set_heap_hint(&self, addr: u64) {
		let _ = self.heap_hint.set(addr);
	}
}

fn check_no_overlaps(regions: &SortedVec<Region>) -> HsResult<()> {
	let slice = regions.as_slice();
	for pair in slice.windows(2) {
		let (a, b) = (&pair[0], &pair[1]);
		if a.end > b.start {
			return Err(HsError::OverlappingRegion {
				a_start: a.start,
				a_end: a.end,
				b_start: b.start,
				b_end: b.end,
			});
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::region::{InMemorySource, Permissions};

	fn region(start: u64, end: u64, label: Option<&str>) -> Region {
		Region::new(
			start,
			end,
			Permissions::READ,
			label.map(|s| s.to_owned()),
			Box::new(InMemorySource::new(vec![0u8; (end - start) as usize])),
		)
	}

	#[test]
	fn finds_region_containing_address() {
		let handler = MemoryHandler::new(
			TargetPlatform::linux_x86_64(),
			vec![region(0x1000, 0x2000, None), region(0x3000, 0x4000, None)],
		)
		.unwrap();

		assert!(handler.find_region(0x1500).is_some());
		assert!(handler.find_region(0x2500).is_none());
		assert!(handler.find_region(0x3FFF).is_some());
	}

	#[test]
	fn rejects_overlapping_regions() {
		let err = MemoryHandler::new(
			TargetPlatform::linux_x86_64(),
			vec![region(0x1000, 0x2000, None), region(0x1800, 0x2800, None)],
		)
		.unwrap_err();
		assert!(matches!(err, HsError::OverlappingRegion { .. }));
	}

	#[test]
	fn heap_prefers_explicit_label_over_hint() {
		let handler = MemoryHandler::new(
			TargetPlatform::linux_x86_64(),
			vec![region(0x1000, 0x2000, None), region(0x3000, 0x4000, Some("heap"))],
		)
		.unwrap();
		handler.set_heap_hint(0x1000);
		assert_eq!(handler.heap().unwrap().start, 0x3000);
	}

	#[test]
	fn is_valid_address_requires_read_permission() {
		let no_read = Region::new(
			0x1000,
			0x2000,
			Permissions::WRITE,
			None,
			Box::new(InMemorySource::new(vec![0u8; 0x1000])),
		);
		let handler = MemoryHandler::new(TargetPlatform::linux_x86_64(), vec![no_read]).unwrap();
		assert!(handler.find_region(0x1500).is_some());
		assert!(handler.is_valid_address(0x1500).is_none());
	}

	#[test]
	fn heap_falls_back_to_hint_when_unlabelled() {
		let handler = MemoryHandler::new(
			TargetPlatform::linux_x86_64(),
			vec![region(0x1000, 0x2000, None), region(0x3000, 0x4000, None)],
		)
		.unwrap();
		assert!(handler.heap().is_none());
		handler.set_heap_hint(0x3050);
		assert_eq!(handler.heap().unwrap().start, 0x3000);
	}
}
