//! Searcher (spec.md component G): scans regions at pointer-width
//! alignment for addresses that validate as a given record type, with
//! optional confinement to a single region, cooperative cancellation, and
//! progress reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::HsResult;
use crate::memory::MemoryHandler;
use crate::record::{RecordInstance, RecordRegistry};
use crate::validator::Validator;

/// Sentinel for "no limit on the number of matches to return".
pub const UNBOUNDED: usize = usize::MAX;

/// How many candidate addresses the search advances between cancellation
/// checks and progress callbacks. Small enough to stay responsive, large
/// enough that the check itself isn't the bottleneck.
const DEFAULT_POLL_STRIDE: u64 = 4096;

/// The subset of a Memory Handler's regions a search is confined to when no
/// `hint` narrows it to one region directly (spec.md §4.G).
#[derive(Debug, Clone)]
pub enum Perimeter {
	/// The region `MemoryHandler::heap()` resolves to, if any. If none is
	/// labelled or hinted, the search finds nothing rather than silently
	/// falling back to scanning everything.
	Heap,
	/// Every region in the handler.
	All,
	/// A caller-supplied subset, identified by each region's start address.
	Regions(Vec<u64>),
}

impl Default for Perimeter {
	fn default() -> Self {
		Perimeter::Heap
	}
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
	pub record_type: String,
	/// Confines the search to the single region containing this address and
	/// starts scanning from it, if set. Takes priority over `perimeter`.
	pub hint: Option<u64>,
	/// Which regions to scan when `hint` is unset. Defaults to the heap
	/// region.
	pub perimeter: Perimeter,
	pub depth: u32,
	/// Stops after this many matches. Use [`UNBOUNDED`] for no limit.
	pub limit: usize,
	pub poll_stride: u64,
}

impl Default for SearchOptions {
	fn default() -> Self {
		Self {
			record_type: String::new(),
			hint: None,
			perimeter: Perimeter::default(),
			depth: crate::validator::DEFAULT_DEPTH,
			limit: UNBOUNDED,
			poll_stride: DEFAULT_POLL_STRIDE,
		}
	}
}

/// Cooperative cancellation flag shared between the caller and a search
/// running on another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	pub fn new() -> Self {
		Self(Arc::new(AtomicBool::new(false)))
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}

pub trait ProgressObserver {
	/// Called roughly every `poll_stride` addresses with the address just
	/// reached and the bounds of the region currently being scanned.
	fn on_progress(&mut self, scanned_addr: u64, region_start: u64, region_end: u64);
}

/// A [`ProgressObserver`] that does nothing, for callers that don't care.
pub struct NullProgress;

impl ProgressObserver for NullProgress {
	fn on_progress(&mut self, _scanned_addr: u64, _region_start: u64, _region_end: u64) {}
}

pub fn align_down(addr: u64, alignment: u64) -> u64 {
	addr - (addr % alignment)
}

pub fn align_up(addr: u64, alignment: u64) -> u64 {
	let rem = addr % alignment;
	if rem == 0 {
		addr
	} else {
		addr + (alignment - rem)
	}
}

pub struct Searcher<'h> {
	handler: &'h MemoryHandler,
	registry: &'h RecordRegistry,
}

impl<'h> Searcher<'h> {
	pub fn new(handler: &'h MemoryHandler, registry: &'h RecordRegistry) -> Self {
		Self { handler, registry }
	}

	/// Runs a pointer-aligned scan, returning every validated match found
	/// in ascending `(region, address)` order, up to `options.limit`.
	pub fn search(
		&self,
		options: &SearchOptions,
		cancel: &CancelToken,
		progress: &mut dyn ProgressObserver,
	) -> HsResult<Vec<RecordInstance>> {
		let alignment = self.handler.platform().alignment() as u64;
		let validator = Validator::new(self.handler, self.registry);
		let mut matches = Vec::new();

		let regions: Vec<&crate::memory::Region> = match options.hint {
			Some(hint) => self.handler.find_region(hint).into_iter().collect(),
			None => match &options.perimeter {
				Perimeter::All => self.handler.regions().collect(),
				Perimeter::Heap => self.handler.heap().into_iter().collect(),
				Perimeter::Regions(starts) => {
					let wanted: std::collections::HashSet<u64> = starts.iter().copied().collect();
					self.handler.regions().filter(|r| wanted.contains(&r.start)).collect()
				}
			},
		};

		'regions: for region in regions {
			if cancel.is_cancelled() {
				break;
			}
			let start = match options.hint {
				Some(hint) if region.start <= hint && hint < region.end => {
					align_down(hint, alignment).max(region.start)
				}
				_ => align_up(region.start, alignment),
			};
			let end = region.end;
			let mut addr = start;
			let mut since_poll: u64 = 0;

			while addr < end {
				if since_poll >= options.poll_stride {
					progress.on_progress(addr, region.start, region.end);
					since_poll = 0;
					if cancel.is_cancelled() {
						break 'regions;
					}
				}

				match validator.load(addr, &options.record_type, options.depth) {
					Ok(instance) if instance.validated => {
						matches.push(instance);
						if matches.len() >= options.limit {
							break 'regions;
						}
					}
					Ok(_) => {}
					Err(crate::error::HsError::OutOfRegion) => break,
					Err(e) => {
						log::debug!("search I/O error at {addr:#x}, skipping: {e}");
					}
				}

				addr += alignment;
				since_poll += alignment;
			}
		}

		Ok(matches)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::{InMemorySource, Permissions, Region};
	use crate::platform::TargetPlatform;
	use crate::record::{RecordRegistry, RecordTypeBuilder};

	fn handler_with_signature_at(offset: usize, len: usize) -> MemoryHandler {
		let mut bytes = vec![0u8; len];
		bytes[offset..offset + 4].copy_from_slice(&0xCAFE_BABEu32.to_le_bytes());
		let region = Region::new(
			0x1000,
			0x1000 + len as u64,
			Permissions::READ,
			None,
			Box::new(InMemorySource::new(bytes)),
		);
		MemoryHandler::new(TargetPlatform::linux_x86_64(), vec![region]).unwrap()
	}

	#[test]
	fn finds_aligned_signature_match() {
		let handler = handler_with_signature_at(8, 64);
		let mut registry = RecordRegistry::new();
		registry.register(
			handler.platform().pointer_width(),
			RecordTypeBuilder::new("demo.Signature")
				.integer_with_constraint(
					"magic",
					crate::record::IntWidth::W4,
					false,
					crate::record::Constraint::Equals(crate::record::ScalarValue::U32(0xCAFE_BABE)),
				)
				.build(),
		);

		let searcher = Searcher::new(&handler, &registry);
		let options = SearchOptions {
			record_type: "demo.Signature".to_owned(),
			perimeter: Perimeter::All,
			..Default::default()
		};
		let cancel = CancelToken::new();
		let results = searcher.search(&options, &cancel, &mut NullProgress).unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].address, 0x1008);
	}

	#[test]
	fn cancellation_stops_the_scan_early() {
		let handler = handler_with_signature_at(56, 64);
		let mut registry = RecordRegistry::new();
		registry.register(
			handler.platform().pointer_width(),
			RecordTypeBuilder::new("demo.Signature")
				.integer_with_constraint(
					"magic",
					crate::record::IntWidth::W4,
					false,
					crate::record::Constraint::Equals(crate::record::ScalarValue::U32(0xCAFE_BABE)),
				)
				.build(),
		);

		let searcher = Searcher::new(&handler, &registry);
		let options = SearchOptions {
			record_type: "demo.Signature".to_owned(),
			perimeter: Perimeter::All,
			poll_stride: 8,
			..Default::default()
		};
		let cancel = CancelToken::new();
		cancel.cancel();
		let results = searcher.search(&options, &cancel, &mut NullProgress).unwrap();
		assert!(results.is_empty());
	}

	#[test]
	fn hint_confines_scan_to_region_and_starts_at_hint() {
		// A match before the hint must not be found; a match at or after
		// it, in the same region, must be.
		let mut bytes = vec![0u8; 64];
		bytes[8..12].copy_from_slice(&0xCAFE_BABEu32.to_le_bytes());
		bytes[40..44].copy_from_slice(&0xCAFE_BABEu32.to_le_bytes());
		let region = Region::new(
			0x1000,
			0x1000 + bytes.len() as u64,
			Permissions::READ,
			None,
			Box::new(InMemorySource::new(bytes)),
		);
		let other = Region::new(
			0x2000,
			0x2040,
			Permissions::READ,
			None,
			Box::new(InMemorySource::new(vec![0u8; 64])),
		);
		let handler =
			MemoryHandler::new(TargetPlatform::linux_x86_64(), vec![region, other]).unwrap();

		let mut registry = RecordRegistry::new();
		registry.register(
			handler.platform().pointer_width(),
			RecordTypeBuilder::new("demo.Signature")
				.integer_with_constraint(
					"magic",
					crate::record::IntWidth::W4,
					false,
					crate::record::Constraint::Equals(crate::record::ScalarValue::U32(0xCAFE_BABE)),
				)
				.build(),
		);

		let searcher = Searcher::new(&handler, &registry);
		let options = SearchOptions {
			record_type: "demo.Signature".to_owned(),
			hint: Some(0x1020),
			..Default::default()
		};
		let cancel = CancelToken::new();
		let results = searcher.search(&options, &cancel, &mut NullProgress).unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].address, 0x1000 + 40);
	}

	#[test]
	fn default_perimeter_is_heap_only() {
		// Two regions, each carrying a matching signature; only the one
		// labelled "heap" should be scanned when no hint/perimeter is given.
		let mut heap_bytes = vec![0u8; 64];
		heap_bytes[8..12].copy_from_slice(&0xCAFE_BABEu32.to_le_bytes());
		let heap_region = Region::new(
			0x1000,
			0x1040,
			Permissions::READ,
			Some("heap".to_owned()),
			Box::new(InMemorySource::new(heap_bytes)),
		);
		let mut other_bytes = vec![0u8; 64];
		other_bytes[8..12].copy_from_slice(&0xCAFE_BABEu32.to_le_bytes());
		let other_region = Region::new(
			0x2000,
			0x2040,
			Permissions::READ,
			None,
			Box::new(InMemorySource::new(other_bytes)),
		);
		let handler =
			MemoryHandler::new(TargetPlatform::linux_x86_64(), vec![heap_region, other_region]).unwrap();

		let mut registry = RecordRegistry::new();
		registry.register(
			handler.platform().pointer_width(),
			RecordTypeBuilder::new("demo.Signature")
				.integer_with_constraint(
					"magic",
					crate::record::IntWidth::W4,
					false,
					crate::record::Constraint::Equals(crate::record::ScalarValue::U32(0xCAFE_BABE)),
				)
				.build(),
		);

		let searcher = Searcher::new(&handler, &registry);
		let options = SearchOptions { record_type: "demo.Signature".to_owned(), ..Default::default() };
		let cancel = CancelToken::new();
		let results = searcher.search(&options, &cancel, &mut NullProgress).unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].address, 0x1008);
	}

	#[test]
	fn no_heap_and_no_perimeter_finds_nothing() {
		let handler = handler_with_signature_at(8, 64);
		let mut registry = RecordRegistry::new();
		registry.register(
			handler.platform().pointer_width(),
			RecordTypeBuilder::new("demo.Signature")
				.integer_with_constraint(
					"magic",
					crate::record::IntWidth::W4,
					false,
					crate::record::Constraint::Equals(crate::record::ScalarValue::U32(0xCAFE_BABE)),
				)
				.build(),
		);

		let searcher = Searcher::new(&handler, &registry);
		let options = SearchOptions { record_type: "demo.Signature".to_owned(), ..Default::default() };
		let cancel = CancelToken::new();
		let results = searcher.search(&options, &cancel, &mut NullProgress).unwrap();
		assert!(results.is_empty());
	}

	#[test]
	fn align_helpers_round_correctly() {
		assert_eq!(align_down(0x1007, 8), 0x1000);
		assert_eq!(align_up(0x1001, 8), 0x1008);
		assert_eq!(align_up(0x1000, 8), 0x1000);
	}
}
