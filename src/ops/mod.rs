pub mod matmul;
pub mod solver;
pub mod transform;

pub use matmul::{MatMulBackend, MatMulContext, MatMulParams, Provider};
pub use solver::{FactorKind, FactorParams, FillMode, SolverBackend, SolverContext, SolverWorkspace};
pub use transform::{
    Direction, TransformBackend, TransformContext, TransformKind, TransformParams,
};
