//! Live-process backend: reads `/proc/<pid>/maps` for the region layout
//! and `/proc/<pid>/mem` for bytes. Linux-only; the Target Platform is
//! still explicit rather than inferred, since a 32-bit process inspected
//! from a 64-bit host needs `PointerWidth::Bits32` regardless of the host.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::{HsError, HsResult};
use crate::memory::{FileSource, Region};
use crate::platform::TargetPlatform;

use super::dump::parse_manifest;
use super::RegionLoader;

/// Attaches to a running process by pid. `mmap` controls whether regions
/// attempt to `mmap` `/proc/<pid>/mem` (fast, but unreliable across
/// kernels for this particular file) before falling back to lazy
/// seek+read; see `DESIGN.md` for why both paths exist.
pub struct LiveProcessLoader {
	pid: u32,
	platform: TargetPlatform,
	mmap: bool,
}

impl LiveProcessLoader {
	pub fn new(pid: u32, platform: TargetPlatform) -> Self {
		Self { pid, platform, mmap: false }
	}

	pub fn with_mmap(mut self, mmap: bool) -> Self {
		self.mmap = mmap;
		self
	}

	fn maps_path(&self) -> PathBuf {
		PathBuf::from(format!("/proc/{}/maps", self.pid))
	}

	fn mem_path(&self) -> PathBuf {
		PathBuf::from(format!("/proc/{}/mem", self.pid))
	}
}

impl RegionLoader for LiveProcessLoader {
	fn load(&self) -> HsResult<(TargetPlatform, Vec<Region>)> {
		let contents = fs::read_to_string(self.maps_path()).map_err(map_access_error)?;
		let lines = parse_manifest(&contents)?;
		let mem_path = self.mem_path();

		let mut regions = Vec::with_capacity(lines.len());
		for line in lines {
			let len = line.end - line.start;
			let source: Box<dyn crate::memory::ByteSource> = if self.mmap {
				match File::open(&mem_path).and_then(|f| {
					// SAFETY: read-only mapping of our own address space view.
					unsafe { memmap2::MmapOptions::new().offset(line.start).len(len as usize).map(&f) }
				}) {
					Ok(mmap) => Box::new(MmapAtOffset { mmap }),
					Err(e) => {
						log::debug!(
							"mmap of /proc/{}/mem at {:#x} failed ({e}), falling back to lazy reads",
							self.pid,
							line.start
						);
						Box::new(
							FileSource::new(File::open(&mem_path).map_err(map_access_error)?, len),
						)
					}
				}
			} else {
				Box::new(FileSource::new(File::open(&mem_path).map_err(map_access_error)?, len))
			};

			let label = line
				.pathname
				.as_deref()
				.and_then(|p| if p == "[heap]" { Some("heap".to_owned()) } else { None });
			regions.push(Region::new(line.start, line.end, line.permissions, label, source));
		}
		Ok((self.platform, regions))
	}
}

fn map_access_error(err: std::io::Error) -> HsError {
	if err.kind() == ErrorKind::PermissionDenied {
		HsError::AccessDenied(err.to_string())
	} else {
		HsError::IoError(err)
	}
}

/// A memory-mapped window into `/proc/<pid>/mem` starting at a region's own
/// base address rather than file offset zero, so `ByteSource::read_at`
/// still addresses bytes relative to the region.
#[derive(Debug)]
struct MmapAtOffset {
	mmap: memmap2::Mmap,
}

impl crate::memory::ByteSource for MmapAtOffset {
	fn read_at(&self, offset: u64, len: usize) -> HsResult<Vec<u8>> {
		let offset = offset as usize;
		let end = offset.checked_add(len).ok_or(HsError::OutOfRegion)?;
		self.mmap.get(offset..end).map(|s| s.to_vec()).ok_or(HsError::OutOfRegion)
	}

	fn len(&self) -> u64 {
		self.mmap.len() as u64
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_path_uses_pid() {
		let loader = LiveProcessLoader::new(1234, TargetPlatform::linux_x86_64());
		assert_eq!(loader.maps_path(), PathBuf::from("/proc/1234/maps"));
		assert_eq!(loader.mem_path(), PathBuf::from("/proc/1234/mem"));
	}
}
