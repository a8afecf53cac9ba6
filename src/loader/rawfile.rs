//! Raw-file backend: a single flat file treated as one region starting at
//! a caller-supplied base address. Used for standalone heap dumps that
//! carry no manifest at all.

use std::path::PathBuf;

use crate::error::HsResult;
use crate::memory::{ByteSource, MappedFileSource, Permissions, Region};
use crate::platform::TargetPlatform;

use super::RegionLoader;

pub struct RawFileLoader {
	path: PathBuf,
	base: u64,
	platform: TargetPlatform,
	label: Option<String>,
}

impl RawFileLoader {
	pub fn new(path: impl Into<PathBuf>, base: u64, platform: TargetPlatform) -> Self {
		Self { path: path.into(), base, platform, label: None }
	}

	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}
}

impl RegionLoader for RawFileLoader {
	fn load(&self) -> HsResult<(TargetPlatform, Vec<Region>)> {
		let source = MappedFileSource::open(&self.path)?;
		let end = self.base + source.len();
		// spec.md §6: a raw file is treated as one `rw-p` region labelled
		// with the file's own name unless the caller overrides it.
		let permissions = Permissions::READ | Permissions::WRITE;
		let label = self.label.clone().or_else(|| {
			self.path.file_name().map(|n| n.to_string_lossy().into_owned())
		});
		let region = Region::new(self.base, end, permissions, label, Box::new(source));
		Ok((self.platform, vec![region]))
	}
}
