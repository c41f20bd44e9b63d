use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::Array2;

use crate::device::{ComputeDevice, REDUCTION_PROGRAM, SUM_FLOAT_KERNEL};
use crate::error::{KMeansError, Result};
use crate::reduction::ReductionEngine;

/// Per-cluster, per-dimension coordinate sums for the update step.
pub trait ClusteringStrategy {
    fn name(&self) -> &'static str;

    /// Allocates accumulators for `k` clusters of `dimension` coordinates.
    fn prepare(&mut self, dimension: usize, k: usize) -> Result<()>;

    fn accumulate(&mut self, cluster: usize, coords: &[f32]);

    /// Writes the coordinate sums of `cluster` into `sums`.
    fn sums(&mut self, cluster: usize, sums: &mut [f32]);

    /// Zeroes every accumulator, keeping its storage.
    fn reset(&mut self);

    /// Accelerator batches dropped after device errors.
    fn lost_batches(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    Accelerated,
}

impl FromStr for Strategy {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "sequential" => Ok(Strategy::Sequential),
            "ocl" | "accelerated" => Ok(Strategy::Accelerated),
            _ => Err(KMeansError::UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "cpu"),
            Strategy::Accelerated => write!(f, "ocl"),
        }
    }
}

/// Builds the selected strategy. `open_device` only runs for the accelerated one.
pub fn build_strategy<D, F>(strategy: Strategy, open_device: F) -> Result<Box<dyn ClusteringStrategy>>
where
    D: ComputeDevice + 'static,
    F: FnOnce() -> Result<Arc<D>>,
{
    Ok(match strategy {
        Strategy::Sequential => Box::new(SequentialStrategy::default()),
        Strategy::Accelerated => Box::new(AcceleratedStrategy::new(open_device()?)),
    })
}

/// Running sums on the host, one row per cluster.
#[derive(Debug, Default)]
pub struct SequentialStrategy {
    sums: Array2<f64>,
}

impl ClusteringStrategy for SequentialStrategy {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn prepare(&mut self, dimension: usize, k: usize) -> Result<()> {
        self.sums = Array2::zeros((k, dimension));
        Ok(())
    }

    fn accumulate(&mut self, cluster: usize, coords: &[f32]) {
        for (slot, &value) in self.sums.row_mut(cluster).iter_mut().zip(coords.iter()) {
            *slot += value as f64;
        }
    }

    fn sums(&mut self, cluster: usize, sums: &mut [f32]) {
        for (out, &sum) in sums.iter_mut().zip(self.sums.row(cluster).iter()) {
            *out = sum as f32;
        }
    }

    fn reset(&mut self) {
        self.sums.fill(0.0);
    }
}

/// One reduction engine per (cluster, dimension) slot, all sharing one device.
pub struct AcceleratedStrategy<D: ComputeDevice> {
    device: Arc<D>,
    dimension: usize,
    engines: Vec<ReductionEngine<D>>,
}

impl<D: ComputeDevice> AcceleratedStrategy<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            dimension: 0,
            engines: Vec::new(),
        }
    }

    pub fn engines(&self) -> &[ReductionEngine<D>] {
        &self.engines
    }

    fn engine(&mut self, cluster: usize, dim: usize) -> &mut ReductionEngine<D> {
        &mut self.engines[cluster * self.dimension + dim]
    }
}

impl<D: ComputeDevice> ClusteringStrategy for AcceleratedStrategy<D> {
    fn name(&self) -> &'static str {
        "accelerated"
    }

    fn prepare(&mut self, dimension: usize, k: usize) -> Result<()> {
        // compile up front; a missing kernel would otherwise drop every batch
        self.device.kernel(REDUCTION_PROGRAM, SUM_FLOAT_KERNEL)?;

        let engines = (0..k * dimension)
            .map(|_| ReductionEngine::new(self.device.clone()))
            .collect::<Result<Vec<_>>>()?;
        log::debug!(
            "created {} reduction engines with {} values each",
            engines.len(),
            engines.first().map_or(0, |e| e.capacity())
        );

        self.dimension = dimension;
        self.engines = engines;
        Ok(())
    }

    fn accumulate(&mut self, cluster: usize, coords: &[f32]) {
        for (dim, &value) in coords.iter().enumerate() {
            self.engine(cluster, dim).put(value);
        }
    }

    fn sums(&mut self, cluster: usize, sums: &mut [f32]) {
        for (dim, out) in sums.iter_mut().enumerate() {
            *out = self.engine(cluster, dim).get_sum();
        }
    }

    fn reset(&mut self) {
        for engine in self.engines.iter_mut() {
            engine.reset_result();
        }
    }

    fn lost_batches(&self) -> usize {
        self.engines.iter().map(|e| e.lost_batches()).sum()
    }
}
