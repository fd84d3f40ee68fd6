use log::debug;

use crate::cache::PlanCache;
use crate::error::{Error, Result};
use crate::types::{DataType, Stream, TensorDesc};

/// Highest supported transform rank.
pub const MAX_TRANSFORM_RANK: usize = 2;

/// Transform domain pairing, deduced from the element types of the operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    /// Complex input, complex output.
    C2C,
    /// Real input, complex output.
    R2C,
    /// Complex input, real output.
    C2R,
}

/// Transform direction. Deliberately not part of the fingerprint: one plan
/// serves both directions, so the direction is an execution argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Inverse,
}

/// Every parameter that determines whether two transform requests can share
/// one backend plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformParams {
    /// Transform lengths, innermost axis first; unused entries stay 0.
    pub n: [usize; MAX_TRANSFORM_RANK],
    /// Transform rank (1 or 2), carried as data.
    pub rank: usize,
    /// Number of independent same-shaped transforms per invocation.
    pub batch: usize,
    pub inembed: [usize; MAX_TRANSFORM_RANK],
    pub onembed: [usize; MAX_TRANSFORM_RANK],
    pub istride: usize,
    pub ostride: usize,
    pub idist: usize,
    pub odist: usize,
    pub kind: TransformKind,
    pub input_type: DataType,
    pub output_type: DataType,
    pub stream: Stream,
}

impl TransformParams {
    /// Derive the fingerprint for a rank-`rank` transform over the trailing
    /// axes of the operands. The axis above the transform axes batches; for
    /// rank-2 every axis above the trailing two batches.
    pub fn from_desc(
        out: &TensorDesc,
        inp: &TensorDesc,
        rank: usize,
        stream: Stream,
    ) -> Result<Self> {
        if rank == 0 || rank > MAX_TRANSFORM_RANK {
            return Err(Error::InvalidParameter(format!(
                "transform rank must be 1 or 2, got {}",
                rank
            )));
        }
        if out.rank() != inp.rank() {
            return Err(Error::InvalidParameter(format!(
                "transform operands must have equal rank, got output {} and input {}",
                out.rank(),
                inp.rank()
            )));
        }
        if inp.rank() < rank {
            return Err(Error::InvalidParameter(format!(
                "rank-{} transform requires rank-{} operands at minimum, got rank {}",
                rank,
                rank,
                inp.rank()
            )));
        }

        let drank = inp.rank();
        // The transform axes may legitimately differ in extent (R2C/C2R);
        // every axis above them must agree, or the derived batch count walks
        // past the smaller operand.
        if out.shape()[..drank - rank] != inp.shape()[..drank - rank] {
            return Err(Error::InvalidParameter(format!(
                "batch axes disagree: output {:?}, input {:?}",
                &out.shape()[..drank - rank],
                &inp.shape()[..drank - rank]
            )));
        }

        let kind = deduce_kind(inp.dtype(), out.dtype())?;
        // Real-output transforms size from the output; everything else from
        // the input.
        let sized = if kind == TransformKind::C2R { out } else { inp };

        let last = drank - 1;

        let mut params = Self {
            n: [0; MAX_TRANSFORM_RANK],
            rank,
            batch: 1,
            inembed: [0; MAX_TRANSFORM_RANK],
            onembed: [0; MAX_TRANSFORM_RANK],
            istride: inp.stride(last),
            ostride: out.stride(last),
            idist: 0,
            odist: 0,
            kind,
            input_type: inp.dtype(),
            output_type: out.dtype(),
            stream,
        };

        if rank == 1 {
            params.n[0] = sized.size(last);
            params.inembed[0] = inp.size(last);
            params.onembed[0] = out.size(last);
            if drank == 1 {
                params.idist = inp.size(0);
                params.odist = out.size(0);
            } else {
                params.batch = inp.size(drank - 2);
                params.idist = inp.stride(drank - 2);
                params.odist = out.stride(drank - 2);
            }
        } else {
            params.n[0] = sized.size(last);
            params.n[1] = sized.size(last - 1);
            params.inembed[0] = inp.size(last);
            params.inembed[1] = inp.size(last - 1);
            params.onembed[0] = out.size(last);
            params.onembed[1] = out.size(last - 1);
            params.batch = inp.shape()[..drank - 2].iter().product();
            params.idist = inp.size(last) * inp.size(last - 1);
            params.odist = out.size(last) * out.size(last - 1);
        }

        Ok(params)
    }
}

fn deduce_kind(input: DataType, output: DataType) -> Result<TransformKind> {
    match (input, output) {
        (DataType::Complex32, DataType::Complex32) | (DataType::Complex64, DataType::Complex64) => {
            Ok(TransformKind::C2C)
        }
        (DataType::Float32, DataType::Complex32) | (DataType::Float64, DataType::Complex64) => {
            Ok(TransformKind::R2C)
        }
        (DataType::Complex32, DataType::Float32) | (DataType::Complex64, DataType::Float64) => {
            Ok(TransformKind::C2R)
        }
        _ => Err(Error::InvalidType(format!(
            "no transform maps {} input to {} output",
            input, output
        ))),
    }
}

/// Vendor transform library seam. Building a plan is the expensive call the
/// cache amortizes; execution reuses it.
pub trait TransformBackend: Send + Sync {
    type Plan: Send + Sync;

    fn build(&self, params: &TransformParams) -> Result<Self::Plan>;

    fn exec(
        &self,
        plan: &Self::Plan,
        out: &TensorDesc,
        inp: &TensorDesc,
        direction: Direction,
    ) -> Result<()>;
}

/// Transform front end. Owns the domain's plan cache, so every entry point
/// behaves as a pure function of its operands and stream while reusing
/// backend plans whenever the fingerprints match.
pub struct TransformContext<B: TransformBackend> {
    backend: B,
    cache: PlanCache<TransformParams, B::Plan>,
}

impl<B: TransformBackend> TransformContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cache: PlanCache::new(),
        }
    }

    /// Forward 1-D transform over the trailing axis.
    pub fn fft(&self, out: &TensorDesc, inp: &TensorDesc, stream: Stream) -> Result<()> {
        self.run(out, inp, 1, Direction::Forward, stream)
    }

    /// Inverse 1-D transform over the trailing axis.
    pub fn ifft(&self, out: &TensorDesc, inp: &TensorDesc, stream: Stream) -> Result<()> {
        self.run(out, inp, 1, Direction::Inverse, stream)
    }

    /// Forward 2-D transform over the trailing two axes.
    pub fn fft2(&self, out: &TensorDesc, inp: &TensorDesc, stream: Stream) -> Result<()> {
        self.run(out, inp, 2, Direction::Forward, stream)
    }

    /// Inverse 2-D transform over the trailing two axes.
    pub fn ifft2(&self, out: &TensorDesc, inp: &TensorDesc, stream: Stream) -> Result<()> {
        self.run(out, inp, 2, Direction::Inverse, stream)
    }

    fn run(
        &self,
        out: &TensorDesc,
        inp: &TensorDesc,
        rank: usize,
        direction: Direction,
        stream: Stream,
    ) -> Result<()> {
        let params = TransformParams::from_desc(out, inp, rank, stream)?;
        let plan = self.cache.get_or_create(&params, || {
            debug!(
                "building rank-{} {:?} transform plan, n={:?}, batch={}",
                params.rank, params.kind, params.n, params.batch
            );
            self.backend.build(&params)
        })?;
        self.backend.exec(&plan, out, inp, direction)
    }

    /// Number of plans retained by this front end.
    pub fn cached_plans(&self) -> usize {
        self.cache.len()
    }
}
