//! State store implementations.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
