pub mod backend;
pub mod tracker;

pub use backend::{MemoryBackend, SystemBackend};

pub use tracker::{global, MemorySpace, MemoryStats, MemoryTracker};
