use crate::centroid::Centroid;
use crate::distance::nearest_centroid;
use crate::error::{KMeansError, Result};
use crate::inertia::calculate_inertia;
use crate::point::Point;
use crate::strategy::ClusteringStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Iterating,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub iterations: usize,
    pub inertia: f64,
    /// Members per cluster in the last iteration.
    pub cluster_sizes: Vec<usize>,
    pub empty_clusters: usize,
    pub lost_batches: usize,
}

/// Checks that both inputs are non-empty and share one dimension, which is returned.
pub fn validate_input(points: &[Point], centroids: &[Centroid]) -> Result<usize> {
    let first = points.first().ok_or(KMeansError::EmptyInput("no points"))?;
    if centroids.is_empty() {
        return Err(KMeansError::EmptyInput("no centroids"));
    }

    let dimension = first.dim();
    check_dimensions(points, centroids, dimension)?;
    Ok(dimension)
}

fn check_dimensions(points: &[Point], centroids: &[Centroid], dimension: usize) -> Result<()> {
    if let Some((idx, point)) = points.iter().enumerate().find(|(_, p)| p.dim() != dimension) {
        return Err(KMeansError::DimensionMismatch {
            expected: dimension,
            found: point.dim(),
            context: format!("point #{}", idx),
        });
    }
    if let Some((idx, centroid)) = centroids.iter().enumerate().find(|(_, c)| c.dim() != dimension) {
        return Err(KMeansError::DimensionMismatch {
            expected: dimension,
            found: centroid.dim(),
            context: format!("centroid #{}", idx),
        });
    }
    Ok(())
}

/// Lloyd iterations with a fixed budget. The coordinate sums of the update
/// step come from the strategy.
pub struct ClusteringEngine {
    strategy: Box<dyn ClusteringStrategy>,
    state: EngineState,
    dimension: usize,
    k: usize,
    cluster_sizes: Vec<usize>,
}

impl ClusteringEngine {
    pub fn new(strategy: Box<dyn ClusteringStrategy>) -> Self {
        Self {
            strategy,
            state: EngineState::Uninitialized,
            dimension: 0,
            k: 0,
            cluster_sizes: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn initialize(&mut self, dimension: usize, k: usize) -> Result<()> {
        if dimension == 0 {
            return Err(KMeansError::EmptyInput("zero-dimensional points"));
        }
        if k == 0 {
            return Err(KMeansError::EmptyInput("no clusters"));
        }

        self.strategy.prepare(dimension, k)?;
        self.dimension = dimension;
        self.k = k;
        self.cluster_sizes = vec![0; k];
        self.state = EngineState::Initialized;
        log::info!(
            "initialized {} k-means: {} clusters of dimension {}",
            self.strategy.name(),
            k,
            dimension
        );
        Ok(())
    }

    /// Runs `max_iterations` rounds, updating point assignments and centroids in place.
    pub fn run(&mut self, points: &mut [Point], centroids: &mut [Centroid], max_iterations: usize) -> Result<RunReport> {
        if self.state == EngineState::Uninitialized {
            return Err(KMeansError::NotInitialized);
        }
        if points.is_empty() {
            return Err(KMeansError::EmptyInput("no points"));
        }
        if centroids.is_empty() {
            return Err(KMeansError::EmptyInput("no centroids"));
        }
        if centroids.len() != self.k {
            return Err(KMeansError::ClusterCountMismatch {
                expected: self.k,
                found: centroids.len(),
            });
        }
        check_dimensions(points, centroids, self.dimension)?;

        self.state = EngineState::Iterating;
        self.strategy.reset();

        let mut sums = vec![0.0f32; self.dimension];
        for iter in 0..max_iterations {
            if iter > 0 && iter % 10 == 0 {
                log::info!("Finished iteration {}", iter);
            }

            for point in points.iter_mut() {
                let cluster = nearest_centroid(point.coords(), centroids).ok_or(KMeansError::EmptyInput("no centroids"))?;
                point.assign(cluster);
            }

            self.cluster_sizes.iter_mut().for_each(|size| *size = 0);
            for point in points.iter() {
                if let Some(cluster) = point.cluster() {
                    self.strategy.accumulate(cluster, point.coords());
                    self.cluster_sizes[cluster] += 1;
                }
            }

            for (idx, centroid) in centroids.iter_mut().enumerate() {
                let size = self.cluster_sizes[idx];
                if size > 0 {
                    self.strategy.sums(idx, &mut sums);
                    centroid.finalize_centroid(&sums, size);
                }
            }
            self.strategy.reset();
        }

        self.state = EngineState::Done;

        let empty_clusters = if max_iterations > 0 {
            self.cluster_sizes.iter().filter(|&&size| size == 0).count()
        } else {
            0
        };
        if empty_clusters > 0 {
            log::warn!("{} clusters ended without members and kept their centroid", empty_clusters);
        }
        let lost_batches = self.strategy.lost_batches();
        if lost_batches > 0 {
            log::error!("{} accelerator batches were lost; centroid sums are incomplete", lost_batches);
        }

        Ok(RunReport {
            iterations: max_iterations,
            inertia: calculate_inertia(points, centroids),
            cluster_sizes: self.cluster_sizes.clone(),
            empty_clusters,
            lost_batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SequentialStrategy;

    fn engine() -> ClusteringEngine {
        ClusteringEngine::new(Box::new(SequentialStrategy::default()))
    }

    fn points(coords: &[[f32; 2]]) -> Vec<Point> {
        coords.iter().map(|c| Point::new(c.to_vec())).collect()
    }

    fn centroids(coords: &[[f32; 2]]) -> Vec<Centroid> {
        coords.iter().map(|c| Centroid::new(c.to_vec())).collect()
    }

    #[test]
    fn validate_input_rejects_empty_and_mismatched_input() {
        let ps = points(&[[0.0, 0.0]]);
        let cs = centroids(&[[0.0, 0.0]]);

        assert_eq!(validate_input(&ps, &cs).unwrap(), 2);
        assert!(matches!(validate_input(&[], &cs), Err(KMeansError::EmptyInput(_))));
        assert!(matches!(validate_input(&ps, &[]), Err(KMeansError::EmptyInput(_))));

        let wide = vec![Centroid::new(vec![0.0, 0.0, 0.0])];
        assert!(matches!(
            validate_input(&ps, &wide),
            Err(KMeansError::DimensionMismatch { expected: 2, found: 3, .. })
        ));
    }

    #[test]
    fn state_moves_from_uninitialized_to_done() {
        let mut engine = engine();
        assert_eq!(engine.state(), EngineState::Uninitialized);

        engine.initialize(2, 1).unwrap();
        assert_eq!(engine.state(), EngineState::Initialized);

        let mut ps = points(&[[1.0, 1.0], [3.0, 3.0]]);
        let mut cs = centroids(&[[0.0, 0.0]]);
        engine.run(&mut ps, &mut cs, 2).unwrap();
        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(cs[0].coords(), &[2.0, 2.0]);
    }

    #[test]
    fn run_before_initialize_fails() {
        let mut ps = points(&[[1.0, 1.0]]);
        let mut cs = centroids(&[[0.0, 0.0]]);
        assert!(matches!(engine().run(&mut ps, &mut cs, 1), Err(KMeansError::NotInitialized)));
    }

    #[test]
    fn pre_run_errors_leave_input_untouched() {
        let mut engine = engine();
        engine.initialize(2, 2).unwrap();

        let mut ps = points(&[[1.0, 1.0]]);
        let mut cs = centroids(&[[0.0, 0.0]]);
        let err = engine.run(&mut ps, &mut cs, 1).unwrap_err();
        assert!(matches!(err, KMeansError::ClusterCountMismatch { expected: 2, found: 1 }));
        assert_eq!(ps[0].cluster(), None);
        assert_eq!(engine.state(), EngineState::Initialized);
    }

    #[test]
    fn zero_iterations_change_nothing() {
        let mut engine = engine();
        engine.initialize(2, 1).unwrap();

        let mut ps = points(&[[1.0, 1.0]]);
        let mut cs = centroids(&[[0.0, 0.0]]);
        let report = engine.run(&mut ps, &mut cs, 0).unwrap();

        assert_eq!(report.iterations, 0);
        assert_eq!(cs[0].coords(), &[0.0, 0.0]);
        assert_eq!(ps[0].cluster(), None);
    }

    #[test]
    fn ties_go_to_the_lowest_cluster() {
        let mut engine = engine();
        engine.initialize(2, 2).unwrap();

        let mut ps = points(&[[0.0, 0.0]]);
        let mut cs = centroids(&[[-1.0, 0.0], [1.0, 0.0]]);
        let report = engine.run(&mut ps, &mut cs, 1).unwrap();

        assert_eq!(ps[0].cluster(), Some(0));
        assert_eq!(report.cluster_sizes, vec![1, 0]);
        assert_eq!(report.empty_clusters, 1);
    }
}
