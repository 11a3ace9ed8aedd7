//! Infrastructure adapters: plan directory and memory sources.

pub mod directory;
pub mod memory_source;

pub use directory::InMemoryPlanDirectory;
pub use memory_source::{FixedMemorySource, ProcessMemorySource};
