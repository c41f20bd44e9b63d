//! k-means clustering with a sequential strategy and an accelerated strategy
//! whose centroid sums run through a streaming device reduction.

pub mod proto;
pub mod logger;
pub mod load;
pub mod error;
pub mod point;
pub mod centroid;
pub mod distance;
pub mod inertia;
pub mod device;
pub mod reduction;
pub mod strategy;
pub mod algorithm;

pub use algorithm::{validate_input, ClusteringEngine, EngineState, RunReport};
pub use centroid::Centroid;
pub use device::{ComputeDevice, HostDevice, HostDeviceConfig};
pub use error::{DeviceError, KMeansError, Result};
pub use point::Point;
pub use reduction::ReductionEngine;
pub use strategy::{build_strategy, AcceleratedStrategy, ClusteringStrategy, SequentialStrategy, Strategy};
