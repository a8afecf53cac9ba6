pub mod error;
pub mod heap;
pub mod loader;
pub mod memory;
pub mod platform;
pub mod record;
pub mod searcher;
pub mod validator;

pub use error::{HsError, HsResult};
pub use heap::{HeapFinder, HeapWalker};
pub use loader::{DumpDirectoryLoader, LiveProcessLoader, RawFileLoader, RegionLoader};
pub use memory::{MemoryHandler, Region};
pub use platform::{Endian, PointerWidth, TargetOs, TargetPlatform};
pub use record::{RecordInstance, RecordRegistry, RecordType, RecordTypeBuilder};
pub use searcher::{CancelToken, NullProgress, Perimeter, ProgressObserver, SearchOptions, Searcher};
pub use validator::{load_record, Validator};
