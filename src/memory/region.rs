//! Memory Region (spec.md component B): a contiguous `[start, end)` byte
//! range with permissions and a pluggable byte source, plus Memory Handler
//! (component C) in `handler.rs`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use bitflags::bitflags;

use crate::error::{HsError, HsResult};
use crate::platform::TargetPlatform;

bitflags! {
	#[derive(Default)]
	pub struct Permissions: u8 {
		const READ    = 0b0000_0001;
		const WRITE   = 0b0000_0010;
		const EXECUTE = 0b0000_0100;
		const SHARED  = 0b0000_1000;
	}
}

/// Abstracts how a region's bytes are actually fetched. A region owns its
/// source for its whole lifetime; sources never overlap between regions.
pub trait ByteSource: std::fmt::Debug + Send + Sync {
	/// Reads `len` bytes starting at `offset` into the region's own byte
	/// source. `offset` is relative to the region's start, not an absolute
	/// address.
	fn read_at(&self, offset: u64, len: usize) -> HsResult<Vec<u8>>;

	fn len(&self) -> u64;
}

/// A region whose bytes are already resident, e.g. decoded from a dump
/// manifest's inline data or built up in a test.
#[derive(Debug)]
pub struct InMemorySource {
	bytes: Vec<u8>,
}

impl InMemorySource {
	pub fn new(bytes: Vec<u8>) -> Self {
		Self { bytes }
	}
}

impl ByteSource for InMemorySource {
	fn read_at(&self, offset: u64, len: usize) -> HsResult<Vec<u8>> {
		let offset = offset as usize;
		let end = offset.checked_add(len).ok_or(HsError::OutOfRegion)?;
		self.bytes.get(offset..end).map(|s| s.to_vec()).ok_or(HsError::OutOfRegion)
	}

	fn len(&self) -> u64 {
		self.bytes.len() as u64
	}
}

/// A region backed by a memory-mapped file, used for dump-directory
/// backing files and the raw-file loader. Mapping is read-only; this crate
/// never writes through the map.
#[derive(Debug)]
pub struct MappedFileSource {
	mmap: memmap2::Mmap,
}

impl MappedFileSource {
	pub fn open(path: &std::path::Path) -> HsResult<Self> {
		let file = File::open(path)?;
		Self::from_file(file)
	}

	pub fn from_file(file: File) -> HsResult<Self> {
		// Safe because this crate only ever reads through the mapping and
		// the backing file is never modified concurrently by us.
		let mmap = unsafe { memmap2::Mmap::map(&file)? };
		Ok(Self { mmap })
	}
}

impl ByteSource for MappedFileSource {
	fn read_at(&self, offset: u64, len: usize) -> HsResult<Vec<u8>> {
		let offset = offset as usize;
		let end = offset.checked_add(len).ok_or(HsError::OutOfRegion)?;
		self.mmap.get(offset..end).map(|s| s.to_vec()).ok_or(HsError::OutOfRegion)
	}

	fn len(&self) -> u64 {
		self.mmap.len() as u64
	}
}

/// A region read lazily via `seek`+`read`, used for live-process memory
/// (`/proc/<pid>/mem`) where mapping is unreliable. Wrapped in a mutex
/// because seeking is stateful but regions are shared behind `&self`.
#[derive(Debug)]
pub struct FileSource {
	file: Mutex<File>,
	len: u64,
}

impl FileSource {
	pub fn new(file: File, len: u64) -> Self {
		Self { file: Mutex::new(file), len }
	}

	/// Opens `path` for lazy reads, seeking to `base` before each read.
	pub fn at_offset(path: &std::path::Path, base: u64, len: u64) -> HsResult<Self> {
		let file = File::open(path)?;
		Ok(Self { file: Mutex::new(OffsetFile { file, base }.into_file()?), len })
	}
}

/// Helper used only to thread a fixed base offset through `FileSource`
/// without storing it as separate state that every `read_at` has to add.
struct OffsetFile {
	file: File,
	base: u64,
}

impl OffsetFile {
	fn into_file(mut self) -> HsResult<File> {
		self.file.seek(SeekFrom::Start(self.base))?;
		Ok(self.file)
	}
}

impl ByteSource for FileSource {
	fn read_at(&self, offset: u64, len: usize) -> HsResult<Vec<u8>> {
		let mut file = self.file.lock().expect("FileSource mutex poisoned");
		file.seek(SeekFrom::Start(offset))?;
		let mut buf = vec![0u8; len];
		file.read_exact(&mut buf)?;
		Ok(buf)
	}

	fn len(&self) -> u64 {
		self.len
	}
}

/// A labelled, contiguous span of the target's address space.
#[derive(Debug)]
pub struct Region {
	pub start: u64,
	pub end: u64,
	pub permissions: Permissions,
	pub label: Option<String>,
	pub source: Box<dyn ByteSource>,
}

impl Region {
	pub fn new(
		start: u64,
		end: u64,
		permissions: Permissions,
		label: Option<String>,
		source: Box<dyn ByteSource>,
	) -> Self {
		Self { start, end, permissions, label, source }
	}

	pub fn len(&self) -> u64 {
		self.end - self.start
	}

	pub fn is_empty(&self) -> bool {
		self.start == self.end
	}

	pub fn contains(&self, addr: u64) -> bool {
		addr >= self.start && addr < self.end
	}

	pub fn is_heap(&self) -> bool {
		self.label.as_deref() == Some("heap")
	}

	/// Reads `len` bytes at absolute address `addr`, bounds-checked against
	/// this region's `[start, end)` span.
	pub fn read_bytes(&self, addr: u64, len: usize) -> HsResult<Vec<u8>> {
		if addr < self.start || addr.checked_add(len as u64).map_or(true, |e| e > self.end) {
			return Err(HsError::OutOfRegion);
		}
		self.source.read_at(addr - self.start, len)
	}

	pub fn read_pointer(&self, addr: u64, platform: &TargetPlatform) -> HsResult<u64> {
		let bytes = self.read_bytes(addr, platform.pointer_width().as_bytes())?;
		platform.read_pointer(&bytes)
	}
}

impl PartialEq for Region {
	fn eq(&self, other: &Self) -> bool {
		self.start == other.start
	}
}

impl Eq for Region {}

impl PartialOrd for Region {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Region {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.start.cmp(&other.start)
	}
}
