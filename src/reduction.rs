//! Streaming sum over a device.
//!
//! Values are staged on the host until the buffer is full, then uploaded and
//! reduced in rounds: every round sums each work-group down to one element,
//! the partials are zero-padded up to the next valid dispatch size and reduced
//! again until a single group remains.

use std::sync::Arc;

use crate::device::{prev_power_of_two, ComputeDevice, REDUCTION_PROGRAM, SIZEOF_FLOAT, SUM_FLOAT_KERNEL};
use crate::error::{DeviceError, KMeansError, Result};

pub struct ReductionEngine<D: ComputeDevice> {
    device: Arc<D>,
    /// Upper bound on the capacity. Only ever shrinks, after a failed allocation.
    max_capacity: usize,
    capacity: usize,
    staging: Vec<f32>,
    scratch: D::Buffer,
    count: usize,
    sum: f32,
    lost_batches: usize,
}

impl<D: ComputeDevice> ReductionEngine<D> {
    pub fn new(device: Arc<D>) -> Result<Self> {
        let wave_size = device.wave_size();
        let max_items = usize::try_from(device.max_memory_bytes() / SIZEOF_FLOAT as u64).unwrap_or(usize::MAX);
        let mut max_capacity = prev_power_of_two(max_items);
        if max_capacity < wave_size {
            return Err(KMeansError::AllocationFailure(format!(
                "device memory holds {} values, less than one wave of {}",
                max_items, wave_size
            )));
        }
        log::debug!(
            "reduction max capacity = {} values; {} MB",
            max_capacity,
            (max_capacity * SIZEOF_FLOAT) / 1024 / 1024
        );

        let initial = max_capacity / 4;
        let (capacity, staging, scratch) = Self::allocate(device.as_ref(), &mut max_capacity, initial)?;

        Ok(Self {
            device,
            max_capacity,
            capacity,
            staging,
            scratch,
            count: 0,
            sum: 0.0,
            lost_batches: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Values waiting in the staging buffer.
    pub fn pending(&self) -> usize {
        self.count
    }

    /// Batches whose reduction failed on the device and were dropped.
    pub fn lost_batches(&self) -> usize {
        self.lost_batches
    }

    pub fn put(&mut self, value: f32) {
        if self.count >= self.capacity {
            self.flush();
        }
        self.staging[self.count] = value;
        self.count += 1;
    }

    pub fn get_sum(&mut self) -> f32 {
        if self.count > 0 {
            self.flush();
        }
        self.sum
    }

    pub fn reset_result(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    /// Reallocates the host and device buffers for `requested` values and returns the
    /// capacity actually obtained. Pending values are reduced first.
    ///
    /// Every failed allocation halves the maximum capacity for good; the call fails once
    /// less than one wave would remain, leaving the previous buffers in place. The
    /// maximum never drops below the capacity of the buffers still in use.
    pub fn reset_buffer(&mut self, requested: usize) -> Result<usize> {
        if self.count > 0 {
            self.flush();
        }

        let mut max_capacity = self.max_capacity;
        match Self::allocate(self.device.as_ref(), &mut max_capacity, requested) {
            Ok((capacity, staging, scratch)) => {
                self.max_capacity = max_capacity;
                self.capacity = capacity;
                self.staging = staging;
                self.scratch = scratch;
                Ok(capacity)
            }
            Err(err) => {
                self.max_capacity = max_capacity.max(self.capacity);
                Err(err)
            }
        }
    }

    pub fn reset_buffer_to_max(&mut self) -> Result<usize> {
        self.reset_buffer(self.max_capacity)
    }

    fn allocate(device: &D, max_capacity: &mut usize, mut requested: usize) -> Result<(usize, Vec<f32>, D::Buffer)> {
        let wave_size = device.wave_size();
        loop {
            let capacity = optimal_item_count(wave_size, *max_capacity, requested);
            log::debug!(
                "reset buffer capacity = {} values; {} MB",
                capacity,
                (capacity * SIZEOF_FLOAT) / 1024 / 1024
            );

            match try_allocate(device, capacity) {
                Ok((staging, scratch)) => return Ok((capacity, staging, scratch)),
                Err(err) if err.is_allocation_failure() => {
                    log::error!("could not allocate {} values: {}; shrinking buffer", capacity, err);
                    let shrunk = capacity / 2;
                    if shrunk < wave_size {
                        return Err(KMeansError::AllocationFailure(format!(
                            "no capacity of at least {} values could be allocated: {}",
                            wave_size, err
                        )));
                    }
                    *max_capacity = shrunk;
                    requested /= 2;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Dispatch size for `items` staged values; never exceeds the allocated buffers.
    fn optimal_item_count(&self, items: usize) -> usize {
        optimal_item_count(self.device.wave_size(), self.capacity, items)
    }

    fn flush(&mut self) {
        let pending = self.count;
        match self.reduce(pending) {
            Ok(batch_sum) => self.sum += batch_sum,
            Err(err) => {
                self.lost_batches += 1;
                log::error!("device error while reducing {} values, batch dropped: {}", pending, err);
            }
        }
        // the staged values are consumed either way
        self.count = 0;
    }

    fn reduce(&mut self, items: usize) -> Result<f32, DeviceError> {
        let mut global_size = self.optimal_item_count(items);
        self.staging[items..global_size].fill(0.0);

        let kernel = self.device.kernel(REDUCTION_PROGRAM, SUM_FLOAT_KERNEL)?;
        self.device.write(&mut self.scratch, 0, &self.staging[..global_size])?;

        loop {
            let local_size = self.device.work_group_size(global_size);
            self.device.dispatch(&kernel, &mut self.scratch, global_size, local_size)?;
            if local_size >= global_size {
                break;
            }
            if local_size <= 1 {
                return Err(DeviceError::Compute(format!(
                    "work-group size {} cannot reduce {} values",
                    local_size, global_size
                )));
            }

            let size = global_size / local_size;
            let next_size = self.optimal_item_count(size);
            if next_size >= global_size {
                return Err(DeviceError::Compute(format!(
                    "work-group size {} does not shrink a round of {} values",
                    local_size, global_size
                )));
            }
            if size < next_size {
                let padding = next_size - size;
                self.staging[..padding].fill(0.0);
                self.device.write(&mut self.scratch, size, &self.staging[..padding])?;
            }
            global_size = next_size;
        }

        self.device.finish()?;
        let mut result = [0.0f32; 1];
        self.device.read(&self.scratch, 0, &mut result)?;
        Ok(result[0])
    }
}

/// Smallest power of two that holds `items`, starting at the wave size and capped at `max_capacity`.
pub fn optimal_item_count(wave_size: usize, max_capacity: usize, items: usize) -> usize {
    if items <= wave_size {
        return wave_size;
    }

    let mut dual = wave_size;
    while dual < items && dual < max_capacity {
        dual *= 2;
    }
    dual
}

fn try_allocate<D: ComputeDevice>(device: &D, capacity: usize) -> Result<(Vec<f32>, D::Buffer), DeviceError> {
    let mut staging = Vec::new();
    staging
        .try_reserve_exact(capacity)
        .map_err(|_| DeviceError::OutOfMemory { requested: capacity })?;
    staging.resize(capacity, 0.0);

    let scratch = device.allocate(capacity)?;
    Ok((staging, scratch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HostDevice, HostDeviceConfig};
    use approx::assert_relative_eq;

    const WAVE: usize = 16;

    fn config() -> HostDeviceConfig {
        HostDeviceConfig::default()
            .max_memory_bytes(4096)
            .wave_size(WAVE)
            .max_work_group_size(64)
    }

    fn engine(config: HostDeviceConfig) -> ReductionEngine<HostDevice> {
        ReductionEngine::new(Arc::new(HostDevice::new(config).unwrap())).unwrap()
    }

    fn sum_of(engine: &mut ReductionEngine<HostDevice>, values: &[f32]) -> f32 {
        for &v in values {
            engine.put(v);
        }
        engine.get_sum()
    }

    #[test]
    fn capacity_starts_at_a_quarter_of_device_memory() {
        let engine = engine(config());
        assert_eq!(engine.max_capacity(), 1024);
        assert_eq!(engine.capacity(), 256);
    }

    #[test]
    fn max_capacity_rounds_down_to_a_power_of_two() {
        let engine = engine(config().max_memory_bytes(5000));
        assert_eq!(engine.max_capacity(), 1024);
    }

    #[test]
    fn device_smaller_than_a_wave_is_fatal() {
        let device = Arc::new(HostDevice::new(config().max_memory_bytes(32)).unwrap());
        let result = ReductionEngine::new(device);
        assert!(matches!(result, Err(KMeansError::AllocationFailure(_))));
    }

    #[test]
    fn optimal_item_count_doubles_from_wave_size() {
        assert_eq!(optimal_item_count(16, 1024, 0), 16);
        assert_eq!(optimal_item_count(16, 1024, 16), 16);
        assert_eq!(optimal_item_count(16, 1024, 17), 32);
        assert_eq!(optimal_item_count(16, 1024, 1000), 1024);
        assert_eq!(optimal_item_count(16, 1024, 5000), 1024);
    }

    #[test]
    fn empty_stream_sums_to_zero() {
        let mut engine = engine(config());
        assert_eq!(engine.get_sum(), 0.0);
    }

    #[test]
    fn sums_match_around_wave_boundaries() {
        for n in [1, WAVE - 1, WAVE, WAVE + 1, WAVE * 3 - 1, WAVE * 3, WAVE * 3 + 1] {
            let mut engine = engine(config());
            let values: Vec<f32> = (0..n).map(|i| (i % 7) as f32).collect();
            let expected: f32 = values.iter().sum();
            assert_eq!(sum_of(&mut engine, &values), expected, "n = {}", n);
        }
    }

    #[test]
    fn streams_longer_than_the_buffer_flush_in_batches() {
        let mut engine = engine(config());
        let values: Vec<f32> = (0..1000).map(|i| (i % 10) as f32 * 0.5).collect();
        let expected: f32 = values.iter().sum();

        for &v in &values[..300] {
            engine.put(v);
        }
        // one full buffer went through the device
        assert_eq!(engine.pending(), 300 - 256);

        for &v in &values[300..] {
            engine.put(v);
        }
        assert_relative_eq!(engine.get_sum(), expected, epsilon = 1e-3);
    }

    #[test]
    fn get_sum_is_idempotent() {
        let mut engine = engine(config());
        let first = sum_of(&mut engine, &[1.0, 2.0, 3.0]);
        assert_eq!(first, 6.0);
        assert_eq!(engine.get_sum(), 6.0);
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn reset_result_clears_the_total() {
        let mut engine = engine(config());
        sum_of(&mut engine, &[4.0, 5.0]);
        engine.put(7.0);
        engine.reset_result();

        assert_eq!(engine.get_sum(), 0.0);
        assert_eq!(sum_of(&mut engine, &[2.5]), 2.5);
    }

    #[test]
    fn reset_buffer_rounds_to_valid_capacities() {
        let mut engine = engine(config());
        assert_eq!(engine.reset_buffer(1).unwrap(), WAVE);
        assert_eq!(engine.reset_buffer(100).unwrap(), 128);
        assert_eq!(engine.reset_buffer(1 << 20).unwrap(), 1024);
        assert_eq!(engine.reset_buffer_to_max().unwrap(), 1024);
    }

    #[test]
    fn reset_buffer_keeps_pending_values() {
        let mut engine = engine(config());
        for v in [1.0, 2.0, 3.0] {
            engine.put(v);
        }
        engine.reset_buffer(WAVE).unwrap();
        engine.put(4.0);
        assert_eq!(engine.get_sum(), 10.0);
    }

    #[test]
    fn failed_allocations_shrink_capacity_for_good() {
        let mut engine = engine(config().max_alloc_elements(100));
        assert_eq!(engine.capacity(), 64);
        assert_eq!(engine.max_capacity(), 64);

        assert_eq!(engine.reset_buffer(1024).unwrap(), 64);
        assert_eq!(engine.max_capacity(), 64);

        let values: Vec<f32> = (0..500).map(|i| i as f32).collect();
        let expected: f32 = values.iter().sum();
        assert_eq!(sum_of(&mut engine, &values), expected);
    }

    #[test]
    fn allocation_below_a_wave_is_fatal() {
        let device = Arc::new(HostDevice::new(config().max_alloc_elements(8)).unwrap());
        let result = ReductionEngine::new(device);
        assert!(matches!(result, Err(KMeansError::AllocationFailure(_))));
    }

    #[test]
    fn failed_dispatch_drops_only_the_inflight_batch() {
        // first flush is a single round, so the second flush is dispatch #1
        let mut engine = engine(config().fail_dispatch(1));
        assert_eq!(sum_of(&mut engine, &[1.0; 10]), 10.0);

        assert_eq!(sum_of(&mut engine, &[1.0; 10]), 10.0);
        assert_eq!(engine.lost_batches(), 1);

        assert_eq!(sum_of(&mut engine, &[2.0; 5]), 20.0);
        assert_eq!(engine.lost_batches(), 1);
    }

    #[test]
    fn failure_in_a_later_round_drops_the_whole_batch() {
        // 256 -> 64 -> 16 -> 4 -> 1, the second round fails
        let device = Arc::new(
            HostDevice::new(config().wave_size(4).max_work_group_size(4).fail_dispatch(1)).unwrap(),
        );
        let mut engine = ReductionEngine::new(device.clone()).unwrap();
        let values: Vec<f32> = (1..=200).map(|i| i as f32).collect();

        assert_eq!(sum_of(&mut engine, &values), 0.0);
        assert_eq!(engine.lost_batches(), 1);
        assert_eq!(device.dispatches(), 2);

        assert_eq!(sum_of(&mut engine, &values), 20100.0);
        assert_eq!(engine.lost_batches(), 1);
        assert_eq!(device.dispatches(), 6);
    }

    #[test]
    fn failed_reset_buffer_keeps_capacity_within_max() {
        // 4096 bytes shared by four engines of 256 values each
        let device = Arc::new(HostDevice::new(config().pooled_memory()).unwrap());
        let mut engine = ReductionEngine::new(device.clone()).unwrap();
        let mut others: Vec<_> = (0..3)
            .map(|_| ReductionEngine::new(device.clone()).unwrap())
            .collect();
        assert_eq!(device.allocated_bytes(), 4096);

        let result = engine.reset_buffer(1024);
        assert!(matches!(result, Err(KMeansError::AllocationFailure(_))));
        assert_eq!(engine.capacity(), 256);
        assert_eq!(engine.max_capacity(), 256);
        assert_eq!(sum_of(&mut engine, &[1.5; 300]), 450.0);

        others.pop();
        assert_eq!(engine.reset_buffer(1024).unwrap(), 256);
        assert_eq!(engine.max_capacity(), 256);
        assert_eq!(device.allocated_bytes(), 3072);
    }

    #[test]
    fn small_work_groups_need_several_rounds() {
        let device = Arc::new(
            HostDevice::new(config().wave_size(4).max_work_group_size(4)).unwrap(),
        );
        let mut engine = ReductionEngine::new(device.clone()).unwrap();

        let values: Vec<f32> = (1..=200).map(|i| i as f32).collect();
        assert_eq!(sum_of(&mut engine, &values), 20100.0);
        // 256 -> 64 -> 16 -> 4 -> 1
        assert_eq!(device.dispatches(), 4);
    }
}
