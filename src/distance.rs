use num_traits::Float;

pub fn squared_euclidean_distance<T: Float>(us: &[T], them: &[T]) -> T {
    us.iter()
        .zip(them.iter())
        .map(|(&a, &b)| {
            let diff = a - b;
            diff * diff
        })
        .fold(T::zero(), |acc, d| acc + d)
}

/// Index of the centroid closest to `point`. Ties go to the lowest index.
pub fn nearest_centroid<T, C>(point: &[T], centroids: &[C]) -> Option<usize>
where
    T: Float,
    C: AsRef<[T]>,
{
    let mut best: Option<(usize, T)> = None;
    for (idx, centroid) in centroids.iter().enumerate() {
        let distance = squared_euclidean_distance(point, centroid.as_ref());
        match best {
            // strict comparison keeps the earlier index on ties
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((idx, distance)),
        }
    }

    best.map(|(idx, _)| idx)
}
