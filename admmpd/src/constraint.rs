use crate::Error;

/// A set of hard linear pin constraints.
///
/// Each pinned vertex is driven towards its target position through a
/// per-axis constraint Jacobian folded into the global solve with a stiffness
/// derived from the system matrix scale.
#[derive(Clone, Debug, Default)]
pub struct PinConstraints {
    /// Pinned vertex indices.
    pub indices: Vec<usize>,
    /// Target position per pinned vertex.
    pub targets: Vec<[f64; 3]>,
}

impl PinConstraints {
    pub fn new(indices: Vec<usize>, targets: Vec<[f64; 3]>) -> Self {
        PinConstraints { indices, targets }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Checks pin indices against the number of simulated vertices.
    pub fn validate(&self, num_verts: usize) -> Result<(), Error> {
        if self.indices.len() != self.targets.len() {
            return Err(Error::SizeMismatch);
        }
        for &vertex in self.indices.iter() {
            if vertex >= num_verts {
                return Err(Error::ConstraintOutOfBounds { vertex });
            }
        }
        Ok(())
    }

    /// Builds the per-axis constraint Jacobian `K[axis]` (one row per pin)
    /// and the constraint right-hand side `l[axis]`.
    pub(crate) fn jacobian(&self, num_verts: usize) -> ([sprs::CsMat<f64>; 3], [Vec<f64>; 3]) {
        let k = std::array::from_fn(|_| {
            let mut trips = sprs::TriMat::new((self.indices.len(), num_verts));
            for (row, &vertex) in self.indices.iter().enumerate() {
                trips.add_triplet(row, vertex, 1.0);
            }
            trips.to_csr()
        });
        let l = std::array::from_fn(|axis| {
            self.targets.iter().map(|target| target[axis]).collect()
        });
        (k, l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_bounds_check() {
        let pins = PinConstraints::new(vec![0, 5], vec![[0.0; 3]; 2]);
        assert!(pins.validate(6).is_ok());
        assert!(matches!(
            pins.validate(5),
            Err(Error::ConstraintOutOfBounds { vertex: 5 })
        ));
    }

    #[test]
    fn jacobian_rows_select_pinned_vertices() {
        let pins = PinConstraints::new(vec![1, 3], vec![[0.5, 0.0, 0.0], [0.0, 0.0, 2.0]]);
        let (k, l) = pins.jacobian(4);
        for axis in 0..3 {
            assert_eq!(k[axis].rows(), 2);
            assert_eq!(k[axis].get(0, 1), Some(&1.0));
            assert_eq!(k[axis].get(1, 3), Some(&1.0));
            assert_eq!(k[axis].nnz(), 2);
        }
        assert_eq!(l[0], vec![0.5, 0.0]);
        assert_eq!(l[2], vec![0.0, 2.0]);
    }
}
