use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a compute device backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("buffer of {requested} elements exceeds the device limit of {limit} elements")]
    InvalidBufferSize { requested: usize, limit: usize },

    #[error("out of memory allocating {requested} elements")]
    OutOfMemory { requested: usize },

    #[error("kernel {entry_point} not found in program {program}")]
    KernelNotFound { program: String, entry_point: String },

    #[error("compute error: {0}")]
    Compute(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl DeviceError {
    /// True for failures the reduction engine recovers from by shrinking its buffers.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, DeviceError::InvalidBufferSize { .. } | DeviceError::OutOfMemory { .. })
    }
}

#[derive(Debug, Error)]
pub enum KMeansError {
    #[error("dimension mismatch: expected {expected}, found {found} ({context})")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        context: String,
    },

    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("expected {expected} centroids, found {found}")]
    ClusterCountMismatch { expected: usize, found: usize },

    #[error("could not allocate a reduction buffer: {0}")]
    AllocationFailure(String),

    #[error("device compute error: {0}")]
    DeviceCompute(#[from] DeviceError),

    #[error("unknown strategy {0:?}, expected one of: cpu, sequential, ocl, accelerated")]
    UnknownStrategy(String),

    #[error("clustering engine is not initialized")]
    NotInitialized,

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: cannot parse {token:?} as a number")]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },

    #[error("encoding failed: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("decoding failed: {0}")]
    Decode(#[from] prost::DecodeError),
}

pub type Result<T, E = KMeansError> = std::result::Result<T, E>;
