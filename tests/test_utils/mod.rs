#![allow(dead_code)]

use std::sync::Arc;

use kmeans_cl::{
    build_strategy, Centroid, ClusteringEngine, HostDevice, HostDeviceConfig, Point, Strategy,
};
use ndarray::Array2;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

/// Small device: 1024 values of memory, waves of 16, work-groups of up to 64.
pub fn small_device_config() -> HostDeviceConfig {
    HostDeviceConfig::default()
        .max_memory_bytes(4096)
        .wave_size(16)
        .max_work_group_size(64)
}

pub fn host_device(config: HostDeviceConfig) -> Arc<HostDevice> {
    Arc::new(HostDevice::new(config).expect("Failed to create host device"))
}

pub fn engine(strategy: Strategy, device: Arc<HostDevice>) -> ClusteringEngine {
    let strategy = build_strategy(strategy, || Ok(device)).expect("Failed to build strategy");
    ClusteringEngine::new(strategy)
}

pub fn points(coords: &[&[f32]]) -> Vec<Point> {
    coords.iter().map(|c| Point::new(c.to_vec())).collect()
}

pub fn centroids(coords: &[&[f32]]) -> Vec<Centroid> {
    coords.iter().map(|c| Centroid::new(c.to_vec())).collect()
}

/// `n` points spread uniformly over [-scale, scale) in every dimension.
pub fn random_points(n: usize, dim: usize, scale: f32, seed: u64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = Array2::random_using((n, dim), Uniform::new(-scale, scale), &mut rng);
    Point::from_rows(&data)
}

/// `per_cluster` points around each of `centers`, jittered by at most `spread`.
pub fn blobs(centers: &[&[f32]], per_cluster: usize, spread: f32, seed: u64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dim = centers[0].len();
    let mut points = Vec::with_capacity(centers.len() * per_cluster);
    for center in centers {
        let jitter = Array2::random_using((per_cluster, dim), Uniform::new(-spread, spread), &mut rng);
        for row in jitter.rows() {
            let coords = row.iter().zip(center.iter()).map(|(j, c)| j + c).collect();
            points.push(Point::new(coords));
        }
    }
    points
}

pub fn assert_centroids_close(left: &[Centroid], right: &[Centroid], epsilon: f32) {
    assert_eq!(left.len(), right.len());
    for (l, r) in left.iter().zip(right.iter()) {
        for (a, b) in l.coords().iter().zip(r.coords().iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = epsilon);
        }
    }
}
