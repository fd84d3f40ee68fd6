use std::ptr::NonNull;
use std::sync::Arc;

use log::debug;

use crate::cache::PlanCache;
use crate::error::{Error, Result};
use crate::layout::{resolve_matrix_layout, MatrixOp};
use crate::memory::{MemorySpace, MemoryTracker};
use crate::types::{DataType, Stream, TensorDesc};

/// Which vendor library executes the multiply. Part of the fingerprint: a
/// plan built for one provider is never reused for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// General provider accepting row- and column-major operands.
    BlasLt,
    /// Tiled provider; row-major operands only.
    Tiled,
}

/// Every parameter that determines whether two multiply requests can share
/// one backend plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatMulParams {
    pub a_rows: usize,
    pub a_cols: usize,
    pub b_rows: usize,
    pub b_cols: usize,
    pub c_rows: usize,
    pub c_cols: usize,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
    pub batch: usize,
    pub op_a: MatrixOp,
    pub op_b: MatrixOp,
    pub dtype: DataType,
    pub provider: Provider,
    pub stream: Stream,
}

impl MatMulParams {
    /// Derive the fingerprint for `c = a * b` over the operands' trailing two
    /// axes. Rank 3 batches on the third-from-last axis.
    ///
    /// Layout resolution happens here, before the fingerprint exists, so two
    /// calls differing only in operand layout never share a plan.
    pub fn from_desc(
        c: &TensorDesc,
        a: &TensorDesc,
        b: &TensorDesc,
        provider: Provider,
        stream: Stream,
    ) -> Result<Self> {
        let rank = a.rank();
        if rank < 2 {
            return Err(Error::InvalidParameter(format!(
                "matrix multiply requires rank >= 2 operands, got rank {}",
                rank
            )));
        }
        if b.rank() != rank || c.rank() != rank {
            return Err(Error::InvalidParameter(format!(
                "matrix multiply operands must have equal rank, got a={}, b={}, c={}",
                rank,
                b.rank(),
                c.rank()
            )));
        }
        if a.dtype() != b.dtype() || a.dtype() != c.dtype() {
            return Err(Error::InvalidType(format!(
                "matrix multiply operands must share one element type, got a={}, b={}, c={}",
                a.dtype(),
                b.dtype(),
                c.dtype()
            )));
        }

        for axis in 0..rank - 2 {
            if a.size(axis) != b.size(axis) || a.size(axis) != c.size(axis) {
                return Err(Error::InvalidParameter(format!(
                    "batch axis {} disagrees: a={}, b={}, c={}",
                    axis,
                    a.size(axis),
                    b.size(axis),
                    c.size(axis)
                )));
            }
        }

        let batch = if rank >= 3 { a.size(rank - 3) } else { 1 };

        let la = resolve_matrix_layout(a)?;
        let lb = resolve_matrix_layout(b)?;
        let lc = resolve_matrix_layout(c)?;

        // A column-major output view must still be written MxN in memory. By
        // the identity C' = B'A', swap A and B and resolve all three through
        // the axis permutation instead.
        let (la, lb, lc) = if lc.op == MatrixOp::Transpose && lc.rows != 1 {
            (lb.permuted(), la.permuted(), lc.permuted())
        } else {
            (la, lb, lc)
        };

        if provider == Provider::Tiled && (la.op != MatrixOp::None || lb.op != MatrixOp::None) {
            return Err(Error::NotSupported(
                "tiled provider accepts only row-major operands".to_string(),
            ));
        }

        // Resolved rows/cols describe the stored array; the logical operand
        // flips them under a transpose.
        let logical = |l: &crate::layout::ResolvedLayout| match l.op {
            MatrixOp::None => (l.rows, l.cols),
            MatrixOp::Transpose => (l.cols, l.rows),
        };
        let (m, k) = logical(&la);
        let (bk, n) = logical(&lb);
        if bk != k {
            return Err(Error::InvalidParameter(format!(
                "inner dimensions disagree: op(a) is {}x{} but op(b) is {}x{}",
                m, k, bk, n
            )));
        }
        let (cm, cn) = logical(&lc);
        if cm != m || cn != n {
            return Err(Error::InvalidParameter(format!(
                "output is {}x{} but the product is {}x{}",
                cm, cn, m, n
            )));
        }

        Ok(Self {
            a_rows: la.rows,
            a_cols: la.cols,
            b_rows: lb.rows,
            b_cols: lb.cols,
            c_rows: m,
            c_cols: n,
            m,
            n,
            k,
            lda: la.leading_dim,
            ldb: lb.leading_dim,
            ldc: lc.leading_dim,
            batch,
            op_a: la.op,
            op_b: lb.op,
            dtype: a.dtype(),
            provider,
            stream,
        })
    }
}

/// Vendor multiply library seam.
pub trait MatMulBackend: Send + Sync {
    type Plan: Send + Sync;

    /// Bytes of device workspace plan construction needs; 0 for none.
    fn workspace_size(&self, _params: &MatMulParams) -> Result<usize> {
        Ok(0)
    }

    fn build(&self, params: &MatMulParams, workspace: Option<NonNull<u8>>) -> Result<Self::Plan>;

    fn exec(
        &self,
        plan: &Self::Plan,
        c: &TensorDesc,
        a: &TensorDesc,
        b: &TensorDesc,
    ) -> Result<()>;
}

/// Matrix-multiply front end.
pub struct MatMulContext<B: MatMulBackend> {
    backend: B,
    cache: PlanCache<MatMulParams, B::Plan>,
    memory: Arc<MemoryTracker>,
}

impl<B: MatMulBackend> MatMulContext<B> {
    pub fn new(backend: B, memory: Arc<MemoryTracker>) -> Self {
        Self {
            backend,
            cache: PlanCache::new(),
            memory,
        }
    }

    /// Compute `c = a * b` on `stream`, building a plan on the first call
    /// for this shape/layout/provider and reusing it afterwards.
    ///
    /// Workspace allocated for plan construction is stream-ordered on the
    /// target stream, owned by the cached plan, and lives as long as it does.
    pub fn matmul(
        &self,
        c: &TensorDesc,
        a: &TensorDesc,
        b: &TensorDesc,
        provider: Provider,
        stream: Stream,
    ) -> Result<()> {
        let params = MatMulParams::from_desc(c, a, b, provider, stream)?;
        let plan = self.cache.get_or_create(&params, || {
            debug!(
                "building {:?} multiply plan, m={} n={} k={} batch={}",
                params.provider, params.m, params.n, params.k, params.batch
            );
            let workspace = match self.backend.workspace_size(&params)? {
                0 => None,
                bytes => Some(
                    self.memory
                        .allocate(bytes, MemorySpace::AsyncDevice, stream)?,
                ),
            };
            self.backend.build(&params, workspace)
        })?;
        self.backend.exec(&plan, c, a, b)
    }

    /// Number of plans retained by this front end.
    pub fn cached_plans(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fdesc(shape: &[usize], strides: Option<&[usize]>) -> TensorDesc {
        TensorDesc::of::<f32>(std::ptr::null_mut(), shape, strides).unwrap()
    }

    #[test]
    fn test_row_major_derivation() {
        let a = fdesc(&[4, 8], None);
        let b = fdesc(&[8, 16], None);
        let c = fdesc(&[4, 16], None);
        let params = MatMulParams::from_desc(&c, &a, &b, Provider::BlasLt, Stream::DEFAULT).unwrap();

        assert_eq!((params.m, params.n, params.k), (4, 16, 8));
        assert_eq!((params.op_a, params.op_b), (MatrixOp::None, MatrixOp::None));
        assert_eq!((params.lda, params.ldb, params.ldc), (8, 16, 16));
        assert_eq!(params.batch, 1);
    }

    #[test]
    fn test_column_major_operand_becomes_transpose() {
        let a = fdesc(&[4, 8], Some(&[1, 4]));
        let b = fdesc(&[8, 16], None);
        let c = fdesc(&[4, 16], None);
        let params = MatMulParams::from_desc(&c, &a, &b, Provider::BlasLt, Stream::DEFAULT).unwrap();

        assert_eq!(params.op_a, MatrixOp::Transpose);
        // Stored array is 8x4; the logical operand is still 4x8.
        assert_eq!((params.a_rows, params.a_cols), (8, 4));
        assert_eq!((params.m, params.k), (4, 8));
        assert_eq!(params.lda, 4);
    }

    #[test]
    fn test_rank3_batches_on_third_axis() {
        let a = fdesc(&[5, 4, 8], None);
        let b = fdesc(&[5, 8, 16], None);
        let c = fdesc(&[5, 4, 16], None);
        let params = MatMulParams::from_desc(&c, &a, &b, Provider::BlasLt, Stream::DEFAULT).unwrap();
        assert_eq!(params.batch, 5);
    }

    #[test]
    fn test_batch_dimension_mismatch_rejected() {
        let a = fdesc(&[5, 4, 8], None);
        let b = fdesc(&[2, 8, 16], None);
        let c = fdesc(&[5, 4, 16], None);
        let err =
            MatMulParams::from_desc(&c, &a, &b, Provider::BlasLt, Stream::DEFAULT).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_inner_dimension_mismatch_rejected() {
        let a = fdesc(&[4, 8], None);
        let b = fdesc(&[9, 16], None);
        let c = fdesc(&[4, 16], None);
        let err =
            MatMulParams::from_desc(&c, &a, &b, Provider::BlasLt, Stream::DEFAULT).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_dtype_mismatch_rejected() {
        let a = fdesc(&[4, 8], None);
        let b = TensorDesc::of::<f64>(std::ptr::null_mut(), &[8, 16], None).unwrap();
        let c = fdesc(&[4, 16], None);
        let err =
            MatMulParams::from_desc(&c, &a, &b, Provider::BlasLt, Stream::DEFAULT).unwrap_err();
        assert!(matches!(err, Error::InvalidType(_)));
    }

    #[test]
    fn test_affine_operand_rejected() {
        let a = fdesc(&[4, 8], Some(&[16, 2]));
        let b = fdesc(&[8, 16], None);
        let c = fdesc(&[4, 16], None);
        let err =
            MatMulParams::from_desc(&c, &a, &b, Provider::BlasLt, Stream::DEFAULT).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn test_tiled_provider_rejects_transposed_operands() {
        let a = fdesc(&[4, 8], Some(&[1, 4]));
        let b = fdesc(&[8, 16], None);
        let c = fdesc(&[4, 16], None);
        let err = MatMulParams::from_desc(&c, &a, &b, Provider::Tiled, Stream::DEFAULT).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn test_column_major_output_swaps_operands() {
        let a = fdesc(&[4, 8], None);
        let b = fdesc(&[8, 16], None);
        // C stored column-major: 4x16 with strides [1, 4].
        let c = fdesc(&[4, 16], Some(&[1, 4]));
        let params = MatMulParams::from_desc(&c, &a, &b, Provider::BlasLt, Stream::DEFAULT).unwrap();

        // C' = B'A': the product is computed as 16x4.
        assert_eq!((params.m, params.n, params.k), (16, 4, 8));
        assert_eq!((params.op_a, params.op_b), (MatrixOp::Transpose, MatrixOp::Transpose));
    }

    #[test]
    fn test_provider_participates_in_fingerprint() {
        let a = fdesc(&[4, 8], None);
        let b = fdesc(&[8, 16], None);
        let c = fdesc(&[4, 16], None);
        let p1 = MatMulParams::from_desc(&c, &a, &b, Provider::BlasLt, Stream::DEFAULT).unwrap();
        let p2 = MatMulParams::from_desc(&c, &a, &b, Provider::Tiled, Stream::DEFAULT).unwrap();
        assert_ne!(p1, p2);
    }
}
