#[derive(Debug, Clone, PartialEq, Default)]
pub struct Centroid {
    coords: Vec<f32>,
}

impl Centroid {
    pub fn new(coords: Vec<f32>) -> Self {
        Self { coords }
    }

    pub fn coords(&self) -> &[f32] {
        &self.coords
    }

    pub fn dim(&self) -> usize {
        self.coords.len()
    }

    /// Moves the centroid to the mean of its members given their per-dimension sums.
    /// A centroid without members keeps its position.
    pub fn finalize_centroid(&mut self, sums: &[f32], count: usize) {
        if count == 0 {
            return;
        }

        for (c, sum) in self.coords.iter_mut().zip(sums.iter()) {
            *c = *sum / count as f32;
        }
    }
}

impl AsRef<[f32]> for Centroid {
    fn as_ref(&self) -> &[f32] {
        &self.coords
    }
}

impl From<Vec<f32>> for Centroid {
    fn from(coords: Vec<f32>) -> Self {
        Centroid::new(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_divides_by_member_count() {
        let mut centroid = Centroid::new(vec![0.0, 0.0]);
        centroid.finalize_centroid(&[3.0, 9.0], 3);
        assert_eq!(centroid.coords(), &[1.0, 3.0]);
    }

    #[test]
    fn finalize_without_members_is_a_no_op() {
        let mut centroid = Centroid::new(vec![4.0, 2.0]);
        centroid.finalize_centroid(&[0.0, 0.0], 0);
        assert_eq!(centroid.coords(), &[4.0, 2.0]);
    }
}
