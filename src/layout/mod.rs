pub mod operand;

pub use operand::{resolve_matrix_layout, MatrixOp, ResolvedLayout};
