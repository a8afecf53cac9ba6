//! Region Loader (spec.md component D): three backends that all produce
//! the same `Vec<Region>` + `TargetPlatform` pair consumed by
//! [`crate::memory::MemoryHandler::new`].

pub mod dump;
pub mod live;
pub mod rawfile;

pub use dump::DumpDirectoryLoader;
pub use live::LiveProcessLoader;
pub use rawfile::RawFileLoader;

use crate::error::HsResult;
use crate::memory::Region;
use crate::platform::TargetPlatform;

/// Produces the region set and target platform a [`crate::memory::MemoryHandler`]
/// is built from. Implementors own whatever backing files/handles the
/// regions they hand back will read through.
pub trait RegionLoader {
	fn load(&self) -> HsResult<(TargetPlatform, Vec<Region>)>;
}
