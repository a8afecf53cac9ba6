//! Memory Region and Memory Handler (spec.md components B and C).

pub mod handler;
pub mod region;

pub use handler::MemoryHandler;
pub use region::{ByteSource, FileSource, InMemorySource, MappedFileSource, Permissions, Region};
