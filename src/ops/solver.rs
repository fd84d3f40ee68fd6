use std::ptr::NonNull;
use std::sync::Arc;

use log::debug;

use crate::cache::PlanCache;
use crate::error::{Error, Result};
use crate::memory::{MemorySpace, MemoryTracker};
use crate::types::{DataType, Stream, TensorDesc};

/// Which triangle of a symmetric/Hermitian input the factorization reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Upper,
    Lower,
}

/// The factorization family, carried as data in one fingerprint type rather
/// than one param struct per factorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorKind {
    Cholesky { uplo: FillMode },
    Lu,
    Qr,
    Svd,
    Eig { uplo: FillMode },
}

impl FactorKind {
    /// Whether the trailing two axes must be square.
    fn requires_square(&self) -> bool {
        matches!(self, FactorKind::Cholesky { .. } | FactorKind::Eig { .. })
    }
}

/// Every parameter that determines whether two factorization requests can
/// share one backend plan. The input's data address is deliberately not part
/// of the fingerprint; only geometry, type, kind, and stream are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactorParams {
    pub kind: FactorKind,
    pub m: usize,
    pub n: usize,
    pub batch: usize,
    pub dtype: DataType,
    pub stream: Stream,
}

impl FactorParams {
    /// Derive the fingerprint for factoring the trailing two axes of `a`;
    /// every axis above them batches.
    pub fn from_desc(a: &TensorDesc, kind: FactorKind, stream: Stream) -> Result<Self> {
        let rank = a.rank();
        if rank < 2 {
            return Err(Error::InvalidParameter(format!(
                "factorization requires rank >= 2 input, got rank {}",
                rank
            )));
        }

        let m = a.size(rank - 2);
        let n = a.size(rank - 1);
        if kind.requires_square() && m != n {
            return Err(Error::InvalidParameter(format!(
                "{:?} requires a square input, got {}x{}",
                kind, m, n
            )));
        }

        Ok(Self {
            kind,
            m,
            n,
            batch: a.shape()[..rank - 2].iter().product(),
            dtype: a.dtype(),
            stream,
        })
    }
}

/// Host and device scratch buffers a factorization plan works in. Allocated
/// through the shared tracker on plan construction and owned by the plan, so
/// they live (and leak at process exit) with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverWorkspace {
    pub host: Option<NonNull<u8>>,
    pub host_bytes: usize,
    pub device: Option<NonNull<u8>>,
    pub device_bytes: usize,
}

// SAFETY: the workspace only carries addresses; the buffers they name are
// owned by the plan entry and never aliased mutably across threads by this
// crate.
unsafe impl Send for SolverWorkspace {}
unsafe impl Sync for SolverWorkspace {}

/// Vendor dense-solver library seam.
pub trait SolverBackend: Send + Sync {
    type Plan: Send + Sync;

    /// (host bytes, device bytes) of workspace the factorization needs.
    fn workspace_size(&self, params: &FactorParams) -> Result<(usize, usize)>;

    fn build(&self, params: &FactorParams, workspace: SolverWorkspace) -> Result<Self::Plan>;

    fn exec(&self, plan: &Self::Plan, out: &TensorDesc, a: &TensorDesc) -> Result<()>;
}

/// Dense factorization front end covering the whole family through one
/// cache keyed by [`FactorParams`].
pub struct SolverContext<B: SolverBackend> {
    backend: B,
    cache: PlanCache<FactorParams, B::Plan>,
    memory: Arc<MemoryTracker>,
}

impl<B: SolverBackend> SolverContext<B> {
    pub fn new(backend: B, memory: Arc<MemoryTracker>) -> Self {
        Self {
            backend,
            cache: PlanCache::new(),
            memory,
        }
    }

    pub fn cholesky(
        &self,
        out: &TensorDesc,
        a: &TensorDesc,
        uplo: FillMode,
        stream: Stream,
    ) -> Result<()> {
        self.run(out, a, FactorKind::Cholesky { uplo }, stream)
    }

    pub fn lu(&self, out: &TensorDesc, a: &TensorDesc, stream: Stream) -> Result<()> {
        self.run(out, a, FactorKind::Lu, stream)
    }

    pub fn qr(&self, out: &TensorDesc, a: &TensorDesc, stream: Stream) -> Result<()> {
        self.run(out, a, FactorKind::Qr, stream)
    }

    pub fn svd(&self, out: &TensorDesc, a: &TensorDesc, stream: Stream) -> Result<()> {
        self.run(out, a, FactorKind::Svd, stream)
    }

    pub fn eig(
        &self,
        out: &TensorDesc,
        a: &TensorDesc,
        uplo: FillMode,
        stream: Stream,
    ) -> Result<()> {
        self.run(out, a, FactorKind::Eig { uplo }, stream)
    }

    fn run(&self, out: &TensorDesc, a: &TensorDesc, kind: FactorKind, stream: Stream) -> Result<()> {
        let params = FactorParams::from_desc(a, kind, stream)?;
        let plan = self.cache.get_or_create(&params, || {
            debug!(
                "building {:?} factorization plan, {}x{} batch={}",
                params.kind, params.m, params.n, params.batch
            );
            let workspace = self.allocate_workspace(&params, stream)?;
            self.backend.build(&params, workspace)
        })?;
        self.backend.exec(&plan, out, a)
    }

    fn allocate_workspace(&self, params: &FactorParams, stream: Stream) -> Result<SolverWorkspace> {
        let (host_bytes, device_bytes) = self.backend.workspace_size(params)?;
        let host = if host_bytes > 0 {
            Some(
                self.memory
                    .allocate(host_bytes, MemorySpace::HostPinned, stream)?,
            )
        } else {
            None
        };
        let device = if device_bytes > 0 {
            Some(
                self.memory
                    .allocate(device_bytes, MemorySpace::AsyncDevice, stream)?,
            )
        } else {
            None
        };
        Ok(SolverWorkspace {
            host,
            host_bytes,
            device,
            device_bytes,
        })
    }

    /// Number of plans retained by this front end.
    pub fn cached_plans(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fdesc(shape: &[usize]) -> TensorDesc {
        TensorDesc::of::<f64>(std::ptr::null_mut(), shape, None).unwrap()
    }

    #[test]
    fn test_batch_multiplies_axes_above_trailing_two() {
        let a = fdesc(&[3, 2, 8, 8]);
        let params =
            FactorParams::from_desc(&a, FactorKind::Lu, Stream::DEFAULT).unwrap();
        assert_eq!((params.m, params.n, params.batch), (8, 8, 6));
    }

    #[test]
    fn test_cholesky_requires_square_input() {
        let a = fdesc(&[8, 9]);
        let err = FactorParams::from_desc(
            &a,
            FactorKind::Cholesky { uplo: FillMode::Upper },
            Stream::DEFAULT,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_lu_accepts_rectangular_input() {
        let a = fdesc(&[8, 5]);
        let params = FactorParams::from_desc(&a, FactorKind::Lu, Stream::DEFAULT).unwrap();
        assert_eq!((params.m, params.n), (8, 5));
    }

    #[test]
    fn test_rank_one_rejected() {
        let a = fdesc(&[8]);
        let err = FactorParams::from_desc(&a, FactorKind::Qr, Stream::DEFAULT).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_kind_participates_in_fingerprint() {
        let a = fdesc(&[8, 8]);
        let lu = FactorParams::from_desc(&a, FactorKind::Lu, Stream::DEFAULT).unwrap();
        let qr = FactorParams::from_desc(&a, FactorKind::Qr, Stream::DEFAULT).unwrap();
        let chol_u = FactorParams::from_desc(
            &a,
            FactorKind::Cholesky { uplo: FillMode::Upper },
            Stream::DEFAULT,
        )
        .unwrap();
        let chol_l = FactorParams::from_desc(
            &a,
            FactorKind::Cholesky { uplo: FillMode::Lower },
            Stream::DEFAULT,
        )
        .unwrap();
        assert_ne!(lu, qr);
        assert_ne!(chol_u, chol_l);
    }
}
