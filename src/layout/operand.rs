use crate::error::{Error, Result};
use crate::types::TensorDesc;

/// How a 2-D operand participates in an operation: as stored, or through a
/// logical axis permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixOp {
    None,
    Transpose,
}

/// The matrix view of an operand after layout resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLayout {
    pub op: MatrixOp,
    /// Row count of the operand as the backend will consume it.
    pub rows: usize,
    pub cols: usize,
    /// Stride between consecutive rows (or columns under `Transpose`), in
    /// elements.
    pub leading_dim: usize,
}

impl ResolvedLayout {
    /// The resolution of the same data viewed through a swapped-axis
    /// permutation: the op flips, the geometry is unchanged.
    pub fn permuted(self) -> Self {
        Self {
            op: match self.op {
                MatrixOp::None => MatrixOp::Transpose,
                MatrixOp::Transpose => MatrixOp::None,
            },
            ..self
        }
    }
}

/// Resolve the memory layout of an operand's trailing two axes.
///
/// If the fastest-varying stride is 1 the operand is row-major. Otherwise, if
/// the next-fastest stride is 1 the data is column-major and is consumed
/// through a logical axis permutation, a reinterpretation of the existing
/// buffer rather than a physical transpose. Any other stride pattern is an
/// arbitrary affine layout no provider accepts.
///
/// This runs before fingerprint construction so that layout, not just shape,
/// participates in cache-key equality.
pub fn resolve_matrix_layout(desc: &TensorDesc) -> Result<ResolvedLayout> {
    let rank = desc.rank();
    if rank < 2 {
        return Err(Error::InvalidParameter(format!(
            "matrix operand requires rank >= 2, got rank {}",
            rank
        )));
    }

    let inner = rank - 1;
    let outer = rank - 2;

    if desc.stride(inner) == 1 {
        Ok(ResolvedLayout {
            op: MatrixOp::None,
            rows: desc.size(outer),
            cols: desc.size(inner),
            leading_dim: desc.stride(outer),
        })
    } else if desc.stride(outer) == 1 {
        Ok(ResolvedLayout {
            op: MatrixOp::Transpose,
            rows: desc.size(inner),
            cols: desc.size(outer),
            leading_dim: desc.stride(inner),
        })
    } else {
        Err(Error::NotSupported(format!(
            "affine operand layout (strides {:?} have no unit stride on either trailing axis)",
            desc.strides()
        )))
    }
}
