use thiserror::Error;

use crate::memory::MemorySpace;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("out of memory: failed to allocate {bytes} bytes of {space} memory")]
    OutOfMemory { bytes: usize, space: MemorySpace },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("backend operation failed: {0}")]
    Backend(String),
}
