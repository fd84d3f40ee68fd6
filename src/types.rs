use half::{bf16, f16};
use num_complex::{Complex32, Complex64};
use strum_macros::{Display, EnumIter};

use crate::error::{Error, Result};

/// Handle to an ordered queue of device work. Work submitted to the same
/// stream executes in submission order; ordering across distinct streams is
/// unspecified unless the caller synchronizes explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stream(pub u64);

impl Stream {
    /// The default (null) stream.
    pub const DEFAULT: Stream = Stream(0);

    /// Raw stream handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Element types supported by the numerical front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum DataType {
    Float16,
    BFloat16,
    Float32,
    Float64,
    Complex32,
    Complex64,
    Int32,
    Int64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_of(&self) -> usize {
        match self {
            DataType::Float16 | DataType::BFloat16 => 2,
            DataType::Float32 | DataType::Int32 => 4,
            DataType::Float64 | DataType::Int64 | DataType::Complex32 => 8,
            DataType::Complex64 => 16,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DataType::Complex32 | DataType::Complex64)
    }
}

/// Maps a Rust element type to its [`DataType`] tag.
pub trait Element: Copy + 'static {
    const DTYPE: DataType;
}

impl Element for f16 {
    const DTYPE: DataType = DataType::Float16;
}

impl Element for bf16 {
    const DTYPE: DataType = DataType::BFloat16;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::Float32;
}

impl Element for f64 {
    const DTYPE: DataType = DataType::Float64;
}

impl Element for Complex32 {
    const DTYPE: DataType = DataType::Complex32;
}

impl Element for Complex64 {
    const DTYPE: DataType = DataType::Complex64;
}

impl Element for i32 {
    const DTYPE: DataType = DataType::Int32;
}

impl Element for i64 {
    const DTYPE: DataType = DataType::Int64;
}

/// Description of an operand buffer as the front ends see it: base address,
/// element type, shape, and strides in element units.
///
/// This is not a tensor implementation. Indexing, views, and data movement
/// live with the callers; the front ends only need enough geometry to derive
/// a fingerprint and hand addresses to a backend.
#[derive(Debug, Clone)]
pub struct TensorDesc {
    data: *mut u8,
    dtype: DataType,
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl TensorDesc {
    /// Create a descriptor. If strides are not provided, defaults to
    /// row-major contiguous strides for the shape.
    pub fn new(
        data: *mut u8,
        dtype: DataType,
        shape: &[usize],
        strides: Option<&[usize]>,
    ) -> Result<Self> {
        let strides = match strides {
            Some(strides) => {
                if strides.len() != shape.len() {
                    return Err(Error::InvalidParameter(format!(
                        "shape has {} axes but strides has {}",
                        shape.len(),
                        strides.len()
                    )));
                }
                strides.to_vec()
            }
            None => Self::contiguous_strides(shape),
        };

        Ok(Self {
            data,
            dtype,
            shape: shape.to_vec(),
            strides,
        })
    }

    /// Create a descriptor over a typed buffer.
    pub fn of<T: Element>(data: *mut T, shape: &[usize], strides: Option<&[usize]>) -> Result<Self> {
        Self::new(data as *mut u8, T::DTYPE, shape, strides)
    }

    /// Row-major contiguous strides, e.g. shape [2, 3, 4] -> [12, 4, 1].
    fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    pub fn data(&self) -> *mut u8 {
        self.data
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Extent of one dimension.
    pub fn size(&self, dim: usize) -> usize {
        self.shape[dim]
    }

    /// Stride of one dimension, in elements.
    pub fn stride(&self, dim: usize) -> usize {
        self.strides[dim]
    }
}
