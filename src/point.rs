use ndarray::Array2;

/// A data point together with the index of the cluster it is currently assigned to.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    coords: Vec<f32>,
    cluster: Option<usize>,
}

impl Point {
    pub fn new(coords: Vec<f32>) -> Self {
        Self { coords, cluster: None }
    }

    pub fn coords(&self) -> &[f32] {
        &self.coords
    }

    pub fn dim(&self) -> usize {
        self.coords.len()
    }

    pub fn cluster(&self) -> Option<usize> {
        self.cluster
    }

    pub fn assign(&mut self, cluster: usize) {
        self.cluster = Some(cluster);
    }

    /// One unassigned point per row of `data`.
    pub fn from_rows(data: &Array2<f32>) -> Vec<Point> {
        data.rows()
            .into_iter()
            .map(|row| Point::new(row.to_vec()))
            .collect()
    }
}

impl From<Vec<f32>> for Point {
    fn from(coords: Vec<f32>) -> Self {
        Point::new(coords)
    }
}
