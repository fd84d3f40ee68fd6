//! Infrastructure core shared by the numerical front ends of a GPU tensor
//! library: a memory-space-aware allocation tracker and a generic plan cache,
//! plus the operand-layout dispatch and fingerprint derivation every domain
//! front end (transform, matrix multiply, dense factorization) repeats.
//!
//! The numerical algorithms themselves live behind per-domain backend traits;
//! this crate guarantees at most one expensive backend plan exists per
//! distinct operation signature, keeps allocation metadata consistent under
//! concurrent access, and classifies derived pointers back to their owning
//! allocation and memory kind.

pub mod cache;
pub mod error;
pub mod layout;
pub mod memory;
pub mod ops;
pub mod types;

// Re-export commonly used types
pub use cache::PlanCache;
pub use error::{Error, Result};
pub use layout::{resolve_matrix_layout, MatrixOp, ResolvedLayout};
pub use memory::{MemoryBackend, MemorySpace, MemoryStats, MemoryTracker, SystemBackend};
pub use ops::matmul::{MatMulBackend, MatMulContext, MatMulParams, Provider};
pub use ops::solver::{
    FactorKind, FactorParams, FillMode, SolverBackend, SolverContext, SolverWorkspace,
};
pub use ops::transform::{
    Direction, TransformBackend, TransformContext, TransformKind, TransformParams,
};
pub use types::{DataType, Element, Stream, TensorDesc};
