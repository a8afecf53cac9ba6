//! Reduces one NT heap's internals to two chunk sets, applying the exact
//! set algebra of the original heap walker this module was distilled
//! from: `A = V ∪ (C \ header)`, `Fb = Cf \ header`, and then depending on
//! `FrontEndHeapType`:
//!
//! - `None`            → `user = A`,               `free = Fb`
//! - `LookAside`        → `user = A \ Fa`,           `free = Fa ∪ Fb`
//! - `LowFragmentation` → `user = (A \ Fa) ∪ Aa`,    `free = Fa ∪ Fb ∪ Faa`
//!
//! where `Fa` is the look-aside list's free chunks and `(Aa, Faa)` are the
//! low-fragmentation heap's active/free blocks.

use std::collections::HashSet;
use std::sync::OnceLock;

use crate::error::HsResult;
use crate::memory::MemoryHandler;
use crate::platform::PointerWidth;
use crate::record::{RecordInstance, RecordRegistry};
use crate::validator::Validator;

use super::types::MAX_LFH_BLOCKS;
use super::{FrontEndHeapType, HEAP_ENTRY_BUSY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
	pub start: u64,
	pub size: u64,
}

impl Chunk {
	pub fn end(&self) -> u64 {
		self.start + self.size
	}
}

#[derive(Debug, Default)]
struct ChunkSets {
	user_allocations: Vec<Chunk>,
	free_chunks: Vec<Chunk>,
}

/// Walks the heap rooted at `heap_addr`. Chunk sets are computed lazily on
/// first access and memoised for the walker's lifetime, since recomputing
/// the full segment/LAL/LFH walk on every query would be wasteful when
/// callers typically ask for both `user_allocations` and `free_chunks`.
pub struct HeapWalker<'h> {
	handler: &'h MemoryHandler,
	registry: &'h RecordRegistry,
	heap_addr: u64,
	pointer_width: PointerWidth,
	cache: OnceLock<ChunkSets>,
}

impl<'h> HeapWalker<'h> {
	/// `pointer_width` is the width this heap was *confirmed* at (see
	/// `HeapFinder`), which need not match the handler's own declared
	/// `TargetPlatform` width — a 64-bit process can still host a 32-bit
	/// heap, and vice versa.
	pub fn new(
		handler: &'h MemoryHandler,
		registry: &'h RecordRegistry,
		heap_addr: u64,
		pointer_width: PointerWidth,
	) -> Self {
		Self { handler, registry, heap_addr, pointer_width, cache: OnceLock::new() }
	}

	pub fn heap_address(&self) -> u64 {
		self.heap_addr
	}

	pub fn pointer_width(&self) -> PointerWidth {
		self.pointer_width
	}

	fn validator(&self) -> Validator<'_> {
		Validator::with_pointer_width(self.handler, self.registry, self.pointer_width)
	}

	fn record_size(&self, type_name: &str) -> u64 {
		self.registry.get(type_name, self.pointer_width).map(|rt| rt.size as u64).unwrap_or(0)
	}

	pub fn get_heap(&self) -> HsResult<RecordInstance> {
		self.validator().load(self.heap_addr, "win32.HEAP", 0)
	}

	pub fn segments(&self) -> HsResult<Vec<RecordInstance>> {
		let heap = self.get_heap()?;
		let mut segments = Vec::new();
		if let Some(ptrs) = heap.pointer_array("segments") {
			for &addr in ptrs {
				if addr == 0 {
					continue;
				}
				segments.push(self.validator().load(addr, "win32.HEAP_SEGMENT", 0)?);
			}
		}
		Ok(segments)
	}

	/// UCR descriptors hanging off one segment, as `(address, size)` pairs.
	pub fn segment_ucrs(&self, segment: &RecordInstance) -> HsResult<Vec<(u64, u64)>> {
		let mut out = Vec::new();
		let mut addr = segment.pointer("ucr_head").unwrap_or(0);
		let mut seen = HashSet::new();
		while addr != 0 && seen.insert(addr) {
			let ucr = self.validator().load(addr, "win32.HEAP_UCR_DESCRIPTOR", 0)?;
			let base = ucr.pointer("address").unwrap_or(0);
			let size = ucr.scalar_u64("size").unwrap_or(0);
			if base != 0 && size != 0 {
				out.push((base, size));
			}
			addr = ucr.pointer("next").unwrap_or(0);
		}
		Ok(out)
	}

	/// Walks one segment's `HEAP_ENTRY` chain from `first_entry` to
	/// `last_valid_entry`, returning `(busy, free)` chunks with the
	/// segment's own header entry excluded from both sets. Uncommitted
	/// ranges are gaps in this span with no entries at all; the cursor
	/// jumps straight past them rather than trying to read through them.
	fn backend_chunks(&self, segment: &RecordInstance) -> HsResult<(Vec<Chunk>, Vec<Chunk>)> {
		let granule = self.pointer_width.heap_granule() as u64;
		let entry_size = self.record_size("win32.HEAP_ENTRY").max(1);
		let first = segment.pointer("first_entry").unwrap_or(0);
		let last = segment.pointer("last_valid_entry").unwrap_or(0);

		let mut busy = Vec::new();
		let mut free = Vec::new();
		if first == 0 || last == 0 || first >= last {
			return Ok((busy, free));
		}

		let ucrs = self.segment_ucrs(segment)?;

		let mut addr = first;
		let mut is_header = true;
		while addr + entry_size <= last {
			if let Some(&(ucr_addr, ucr_size)) =
				ucrs.iter().find(|&&(base, size)| addr >= base && addr < base + size)
			{
				addr = ucr_addr + ucr_size;
				continue;
			}

			let entry = self.validator().load(addr, "win32.HEAP_ENTRY", 0)?;
			let size_granules = entry.scalar_u64("size").unwrap_or(0);
			let total_size = size_granules * granule;
			if total_size < entry_size {
				return Err(crate::error::HsError::HeapCorruption(format!(
					"HEAP_ENTRY at {addr:#x} declares {size_granules} granules, smaller than the header itself"
				)));
			}

			if !is_header {
				let flags = entry.scalar_u64("flags").unwrap_or(0);
				let user_size = total_size - entry_size;
				if user_size == 0 {
					return Err(crate::error::HsError::HeapCorruption(format!(
						"HEAP_ENTRY at {addr:#x} has zero user-visible size"
					)));
				}
				let chunk = Chunk { start: addr + entry_size, size: user_size };
				if flags & HEAP_ENTRY_BUSY as u64 != 0 {
					busy.push(chunk);
				} else {
					free.push(chunk);
				}
			}
			is_header = false;
			addr += total_size;
		}
		Ok((busy, free))
	}

	/// Virtual-alloc blocks (`V`): always fully committed, so always
	/// counted as user allocations regardless of front-end heap type.
	pub fn virtual_allocations(&self) -> HsResult<Vec<Chunk>> {
		let heap = self.get_heap()?;
		let entry_size = self.record_size("win32.HEAP_VIRTUAL_ALLOC_ENTRY").max(1);
		let mut out = Vec::new();
		let mut addr = heap.pointer("virtual_alloc_list").unwrap_or(0);
		let mut seen = HashSet::new();
		while addr != 0 && seen.insert(addr) {
			let entry = self.validator().load(addr, "win32.HEAP_VIRTUAL_ALLOC_ENTRY", 0)?;
			let commit = entry.scalar_u64("commit_size").unwrap_or(0);
			if commit <= entry_size {
				return Err(crate::error::HsError::HeapCorruption(format!(
					"HEAP_VIRTUAL_ALLOC_ENTRY at {addr:#x} commits {commit} bytes, not more than its own header"
				)));
			}
			out.push(Chunk { start: addr + entry_size, size: commit - entry_size });
			addr = entry.pointer("next").unwrap_or(0);
		}
		Ok(out)
	}

	/// Free chunks held on the 128-bucket look-aside list (`Fa`). Bucket
	/// `i` holds chunks of `(i + 1) * heap_granule` bytes; this sizing
	/// rule is our own and not a claim about any specific ntdll version.
	/// Tracked by its own `lookaside_list` pointer, independent of
	/// `front_end_heap` (which `lfh_chunks` uses for the LFH context chain)
	/// — the two front-end mechanisms coexist per the `LowFragmentation`
	/// combination rule (`free = Fa ∪ Fb ∪ Faa`).
	fn lookaside_free_chunks(&self) -> HsResult<Vec<Chunk>> {
		const LAL_BUCKETS: u64 = 128;
		let heap = self.get_heap()?;
		let granule = self.pointer_width.heap_granule() as u64;
		let ptr_width = self.pointer_width.as_bytes();
		let mut out = Vec::new();

		let front = heap.pointer("lookaside_list").unwrap_or(0);
		if front == 0 {
			return Ok(out);
		}

		for bucket in 0..LAL_BUCKETS {
			let slot_addr = front + bucket * ptr_width as u64;
			let size = (bucket + 1) * granule;
			let mut addr = match self
				.handler
				.read_bytes(slot_addr, ptr_width)
				.and_then(|b| self.handler.platform().read_pointer_as(&b, self.pointer_width))
			{
				Ok(a) => a,
				Err(_) => continue,
			};
			let mut seen = HashSet::new();
			while addr != 0 && seen.insert(addr) {
				out.push(Chunk { start: addr, size });
				addr = match self
					.handler
					.read_bytes(addr, ptr_width)
					.and_then(|b| self.handler.platform().read_pointer_as(&b, self.pointer_width))
				{
					Ok(a) => a,
					Err(_) => break,
				};
			}
		}
		Ok(out)
	}

	/// Active (`Aa`) and free low-fragmentation-heap blocks, walking the
	/// chain of `HEAP_USERDATA_HEADER`s from the heap's front-end pointer.
	fn lfh_chunks(&self) -> HsResult<(Vec<Chunk>, Vec<Chunk>)> {
		let heap = self.get_heap()?;
		let granule = self.pointer_width.heap_granule() as u64;
		let header_size = self.record_size("win32.HEAP_USERDATA_HEADER");

		let mut active = Vec::new();
		let mut free = Vec::new();
		let mut addr = heap.pointer("front_end_heap").unwrap_or(0);
		let mut seen = HashSet::new();

		while addr != 0 && seen.insert(addr) {
			let header = self.validator().load(addr, "win32.HEAP_USERDATA_HEADER", 0)?;
			let block_size = header.scalar_u64("block_size_granules").unwrap_or(0) * granule;
			let block_count =
				header.scalar_u64("block_count").unwrap_or(0).min(MAX_LFH_BLOCKS as u64);
			let bitmap_lo = header.scalar_u64("bitmap_lo").unwrap_or(0);
			let bitmap_hi = header.scalar_u64("bitmap_hi").unwrap_or(0);

			if block_size > 0 {
				for i in 0..block_count {
					let active_bit =
						if i < 64 { (bitmap_lo >> i) & 1 } else { (bitmap_hi >> (i - 64)) & 1 };
					let chunk = Chunk { start: addr + header_size + i * block_size, size: block_size };
					if active_bit != 0 {
						active.push(chunk);
					} else {
						free.push(chunk);
					}
				}
			}
			addr = header.pointer("list_next").unwrap_or(0);
		}
		Ok((active, free))
	}

	/// Every memory-handler region overlapping a segment's `[start,
	/// last_valid_entry)` span, by address or by the segment starting
	/// inside the region.
	pub fn list_used_mappings(&self) -> HsResult<Vec<(u64, u64)>> {
		let mut out = Vec::new();
		for segment in self.segments()? {
			let start = segment.address;
			let last_valid = segment.pointer("last_valid_entry").unwrap_or(start);
			for region in self.handler.regions() {
				let overlaps = (region.start <= start && start < region.end)
					|| (start <= region.start && region.start < last_valid);
				if overlaps {
					out.push((region.start, region.end));
				}
			}
		}
		Ok(out)
	}

	fn compute_chunks(&self) -> HsResult<ChunkSets> {
		let heap = self.get_heap()?;
		let front_end_type =
			FrontEndHeapType::from_raw(heap.scalar_u64("front_end_heap_type").unwrap_or(0) as u8);

		let mut busy = Vec::new();
		let mut free_backend = Vec::new();
		for segment in self.segments()? {
			let (segment_busy, segment_free) = self.backend_chunks(&segment)?;
			busy.extend(segment_busy);
			free_backend.extend(segment_free);
		}
		let virtual_allocs = self.virtual_allocations()?;

		let a: Vec<Chunk> = virtual_allocs.into_iter().chain(busy).collect();

		let (user_allocations, free_chunks) = match front_end_type {
			FrontEndHeapType::None => (a, free_backend),
			FrontEndHeapType::LookAside => {
				let fa = self.lookaside_free_chunks()?;
				let fa_starts: HashSet<u64> = fa.iter().map(|c| c.start).collect();
				let user = a.into_iter().filter(|c| !fa_starts.contains(&c.start)).collect();
				let mut free = fa;
				free.extend(free_backend);
				(user, free)
			}
			FrontEndHeapType::LowFragmentation => {
				let fa = self.lookaside_free_chunks()?;
				let (active, lfh_free) = self.lfh_chunks()?;
				let fa_starts: HashSet<u64> = fa.iter().map(|c| c.start).collect();
				let mut user: Vec<Chunk> =
					a.into_iter().filter(|c| !fa_starts.contains(&c.start)).collect();
				user.extend(active);
				let mut free = fa;
				free.extend(free_backend);
				free.extend(lfh_free);
				(user, free)
			}
		};

		let user_starts: HashSet<u64> = user_allocations.iter().map(|c| c.start).collect();
		if let Some(overlap) = free_chunks.iter().find(|c| user_starts.contains(&c.start)) {
			return Err(crate::error::HsError::HeapCorruption(format!(
				"chunk at {:#x} is classified as both allocated and free",
				overlap.start
			)));
		}

		Ok(ChunkSets { user_allocations, free_chunks })
	}

	fn chunk_sets(&self) -> HsResult<&ChunkSets> {
		if let Some(sets) = self.cache.get() {
			return Ok(sets);
		}
		let computed = self.compute_chunks()?;
		let _ = self.cache.set(computed);
		Ok(self.cache.get().expect("cache was just populated"))
	}

	pub fn user_allocations(&self) -> HsResult<&[Chunk]> {
		Ok(self.chunk_sets()?.user_allocations.as_slice())
	}

	pub fn free_chunks(&self) -> HsResult<&[Chunk]> {
		Ok(self.chunk_sets()?.free_chunks.as_slice())
	}
}
