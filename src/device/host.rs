use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{prev_power_of_two, ComputeDevice, REDUCTION_PROGRAM, SIZEOF_FLOAT, SUM_FLOAT_KERNEL};
use crate::error::DeviceError;

#[derive(Debug, Clone)]
pub struct HostDeviceConfig {
    pub max_memory_bytes: u64,
    pub wave_size: usize,
    pub max_work_group_size: usize,
    /// Largest buffer the device really accepts, in elements. Lets a device
    /// advertise more memory than it can hand out in one allocation.
    pub max_alloc_elements: Option<usize>,
    /// Zero-based dispatch indices that fail with a compute error.
    pub failing_dispatches: Vec<usize>,
    /// When set, live buffers draw from one pool of `max_memory_bytes` instead of
    /// each being checked against it on its own.
    pub pooled_memory: bool,
    pub threads: Option<usize>,
}

impl Default for HostDeviceConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 1 << 20,
            wave_size: 64,
            max_work_group_size: 256,
            max_alloc_elements: None,
            failing_dispatches: Vec::new(),
            pooled_memory: false,
            threads: None,
        }
    }
}

impl HostDeviceConfig {
    pub fn max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn wave_size(mut self, wave_size: usize) -> Self {
        self.wave_size = wave_size;
        self
    }

    pub fn max_work_group_size(mut self, size: usize) -> Self {
        self.max_work_group_size = size;
        self
    }

    pub fn max_alloc_elements(mut self, elements: usize) -> Self {
        self.max_alloc_elements = Some(elements);
        self
    }

    pub fn fail_dispatch(mut self, index: usize) -> Self {
        self.failing_dispatches.push(index);
        self
    }

    pub fn pooled_memory(mut self) -> Self {
        self.pooled_memory = true;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKernel {
    SumFloat,
}

#[derive(Debug)]
pub struct HostBuffer {
    data: Vec<f32>,
    pool: Option<Arc<AtomicU64>>,
}

impl HostBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        if let Some(pool) = &self.pool {
            pool.fetch_sub((self.data.len() * SIZEOF_FLOAT) as u64, Ordering::AcqRel);
        }
    }
}

/// In-process accelerator. Work-groups are reduced in parallel on a rayon pool
/// with the same stride-halving tree the OpenCL kernel uses.
pub struct HostDevice {
    config: HostDeviceConfig,
    pool: Option<ThreadPool>,
    kernels: Mutex<HashMap<(String, String), HostKernel>>,
    allocated: Arc<AtomicU64>,
    compilations: AtomicUsize,
    dispatches: AtomicUsize,
}

impl HostDevice {
    pub fn new(mut config: HostDeviceConfig) -> Result<Self, DeviceError> {
        if config.wave_size == 0 || !config.wave_size.is_power_of_two() {
            return Err(DeviceError::Backend(format!(
                "wave size must be a power of two, got {}",
                config.wave_size
            )));
        }
        config.max_work_group_size = prev_power_of_two(config.max_work_group_size);
        // a work-group smaller than a wave never shrinks a padded round
        if config.max_work_group_size < config.wave_size {
            return Err(DeviceError::Backend(format!(
                "max work-group size {} is below the wave size {}",
                config.max_work_group_size, config.wave_size
            )));
        }

        let pool = match config.threads {
            Some(threads) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("host-device-{}", i))
                    .build()
                    .map_err(|e| DeviceError::Backend(e.to_string()))?,
            ),
            None => None,
        };

        log::debug!(
            "host device: {} bytes, wave size {}, max work-group size {}",
            config.max_memory_bytes,
            config.wave_size,
            config.max_work_group_size
        );

        Ok(Self {
            config,
            pool,
            kernels: Mutex::new(HashMap::new()),
            allocated: Arc::new(AtomicU64::new(0)),
            compilations: AtomicUsize::new(0),
            dispatches: AtomicUsize::new(0),
        })
    }

    /// Number of times a program was compiled, as opposed to served from the cache.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Bytes held by live buffers of a pooled device.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches.load(Ordering::Relaxed)
    }

    fn reduce_groups(&self, values: &[f32], local_size: usize) -> Vec<f32> {
        let reduce = || -> Vec<f32> { values.par_chunks(local_size).map(reduce_group).collect() };
        match &self.pool {
            Some(pool) => pool.install(reduce),
            None => reduce(),
        }
    }
}

impl ComputeDevice for HostDevice {
    type Buffer = HostBuffer;
    type Kernel = HostKernel;

    fn max_memory_bytes(&self) -> u64 {
        self.config.max_memory_bytes
    }

    fn wave_size(&self) -> usize {
        self.config.wave_size
    }

    fn work_group_size(&self, global_size: usize) -> usize {
        let mut local = global_size.min(self.config.max_work_group_size).max(1);
        while global_size % local != 0 {
            local /= 2;
        }
        local
    }

    fn kernel(&self, program: &str, entry_point: &str) -> Result<HostKernel, DeviceError> {
        let mut kernels = self
            .kernels
            .lock()
            .map_err(|_| DeviceError::Backend("kernel cache poisoned".to_string()))?;

        let key = (program.to_string(), entry_point.to_string());
        if let Some(kernel) = kernels.get(&key) {
            return Ok(*kernel);
        }

        let kernel = match (program, entry_point) {
            (REDUCTION_PROGRAM, SUM_FLOAT_KERNEL) => HostKernel::SumFloat,
            _ => {
                return Err(DeviceError::KernelNotFound {
                    program: program.to_string(),
                    entry_point: entry_point.to_string(),
                })
            }
        };
        self.compilations.fetch_add(1, Ordering::Relaxed);
        log::debug!("compiled kernel {}::{}", program, entry_point);
        kernels.insert(key, kernel);
        Ok(kernel)
    }

    fn allocate(&self, len: usize) -> Result<HostBuffer, DeviceError> {
        let memory_limit = (self.config.max_memory_bytes / SIZEOF_FLOAT as u64) as usize;
        let limit = match self.config.max_alloc_elements {
            Some(alloc_limit) => alloc_limit.min(memory_limit),
            None => memory_limit,
        };
        if len > limit {
            return Err(DeviceError::InvalidBufferSize { requested: len, limit });
        }

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| DeviceError::OutOfMemory { requested: len })?;

        let pool = if self.config.pooled_memory {
            let bytes = (len * SIZEOF_FLOAT) as u64;
            self.allocated
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                    used.checked_add(bytes)
                        .filter(|&total| total <= self.config.max_memory_bytes)
                })
                .map_err(|_| DeviceError::OutOfMemory { requested: len })?;
            Some(self.allocated.clone())
        } else {
            None
        };

        data.resize(len, 0.0);
        Ok(HostBuffer { data, pool })
    }

    fn write(&self, buffer: &mut HostBuffer, offset: usize, data: &[f32]) -> Result<(), DeviceError> {
        let end = offset + data.len();
        let target = buffer.data.get_mut(offset..end).ok_or_else(|| {
            DeviceError::Compute(format!("write of {}..{} out of bounds", offset, end))
        })?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read(&self, buffer: &HostBuffer, offset: usize, out: &mut [f32]) -> Result<(), DeviceError> {
        let end = offset + out.len();
        let source = buffer.data.get(offset..end).ok_or_else(|| {
            DeviceError::Compute(format!("read of {}..{} out of bounds", offset, end))
        })?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn dispatch(
        &self,
        kernel: &HostKernel,
        buffer: &mut HostBuffer,
        global_size: usize,
        local_size: usize,
    ) -> Result<(), DeviceError> {
        let index = self.dispatches.fetch_add(1, Ordering::Relaxed);
        if self.config.failing_dispatches.contains(&index) {
            return Err(DeviceError::Compute(format!("injected failure on dispatch {}", index)));
        }

        if local_size == 0 || global_size % local_size != 0 {
            return Err(DeviceError::Compute(format!(
                "global size {} is not a multiple of local size {}",
                global_size, local_size
            )));
        }
        if local_size > self.config.max_work_group_size {
            return Err(DeviceError::Compute(format!(
                "local size {} exceeds the work-group limit {}",
                local_size, self.config.max_work_group_size
            )));
        }
        if global_size > buffer.len() {
            return Err(DeviceError::Compute(format!(
                "global size {} exceeds buffer of {} elements",
                global_size,
                buffer.len()
            )));
        }

        match kernel {
            HostKernel::SumFloat => {
                let partials = self.reduce_groups(&buffer.data[..global_size], local_size);
                buffer.data[..partials.len()].copy_from_slice(&partials);
            }
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Stride-halving sum of one work-group's elements through a local scratch copy.
fn reduce_group(group: &[f32]) -> f32 {
    let mut scratch = group.to_vec();
    let mut len = scratch.len();
    while len > 1 {
        let half = (len + 1) / 2;
        for i in 0..len / 2 {
            scratch[i] += scratch[i + half];
        }
        len = half;
    }
    scratch.first().copied().unwrap_or(0.0)
}
