use crate::centroid::Centroid;
use crate::distance::squared_euclidean_distance;
use crate::point::Point;

/// Sum of squared distances between each assigned point and its centroid.
pub fn calculate_inertia(points: &[Point], centroids: &[Centroid]) -> f64 {
    points
        .iter()
        .filter_map(|point| {
            let centroid = centroids.get(point.cluster()?)?;
            Some(squared_euclidean_distance(point.coords(), centroid.coords()) as f64)
        })
        .sum()
}
