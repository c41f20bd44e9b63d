//! Compute device abstraction used by the reduction engine.
//!
//! Every call is synchronous from the caller's point of view. Implementations
//! must be shareable behind an `Arc`, so anything mutable (the kernel cache,
//! counters) lives behind interior mutability.

mod host;
#[cfg(feature = "opencl")]
mod opencl;

pub use host::{HostBuffer, HostDevice, HostDeviceConfig, HostKernel};
#[cfg(feature = "opencl")]
pub use opencl::{OclBuffer, OclDevice, OclKernel};

use crate::error::DeviceError;

/// Program holding the reduction kernels.
pub const REDUCTION_PROGRAM: &str = "reduction";
/// Work-group sum over `f32` values.
pub const SUM_FLOAT_KERNEL: &str = "sumFloat";

pub const SIZEOF_FLOAT: usize = std::mem::size_of::<f32>();

pub trait ComputeDevice {
    type Buffer;
    type Kernel: Clone;

    /// Device memory in bytes.
    fn max_memory_bytes(&self) -> u64;

    /// Minimum parallel execution granularity. Always a power of two.
    fn wave_size(&self) -> usize;

    /// Work-group size to use for a dispatch over `global_size` elements.
    /// Divides `global_size` and is at least the wave size whenever
    /// `global_size` is.
    fn work_group_size(&self, global_size: usize) -> usize;

    /// Looks up a kernel in the cache, compiling its program on first use.
    fn kernel(&self, program: &str, entry_point: &str) -> Result<Self::Kernel, DeviceError>;

    fn allocate(&self, len: usize) -> Result<Self::Buffer, DeviceError>;

    fn write(&self, buffer: &mut Self::Buffer, offset: usize, data: &[f32]) -> Result<(), DeviceError>;

    fn read(&self, buffer: &Self::Buffer, offset: usize, out: &mut [f32]) -> Result<(), DeviceError>;

    /// Runs a reduction kernel over the first `global_size` elements of `buffer`
    /// in groups of `local_size`. Afterwards element `g` holds the sum of group `g`;
    /// the remaining elements are undefined.
    fn dispatch(
        &self,
        kernel: &Self::Kernel,
        buffer: &mut Self::Buffer,
        global_size: usize,
        local_size: usize,
    ) -> Result<(), DeviceError>;

    /// Blocks until every enqueued command has completed.
    fn finish(&self) -> Result<(), DeviceError>;
}

/// Largest power of two not above `n`, or zero.
pub(crate) fn prev_power_of_two(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}
