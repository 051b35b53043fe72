use crate::Error;

/// A tetrahedral simulation mesh at rest.
#[derive(Clone, Debug)]
pub struct TetMeshData {
    /// Vertex rest positions.
    pub x_rest: Vec<[f64; 3]>,
    /// Surface triangles.
    pub faces: Vec<[usize; 3]>,
    /// Internal tetrahedral elements.
    pub tets: Vec<[usize; 4]>,
}

impl TetMeshData {
    pub fn num_verts(&self) -> usize {
        self.x_rest.len()
    }

    /// Checks that all element indices are in bounds.
    pub fn validate(&self) -> Result<(), Error> {
        let n = self.x_rest.len();
        for (i, tet) in self.tets.iter().enumerate() {
            for &v in tet.iter() {
                if v >= n {
                    return Err(Error::ElementOutOfBounds {
                        element: i,
                        vertex: v,
                    });
                }
            }
        }
        for (i, face) in self.faces.iter().enumerate() {
            for &v in face.iter() {
                if v >= n {
                    return Err(Error::ElementOutOfBounds {
                        element: i,
                        vertex: v,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A render surface embedded in a coarser tetrahedral lattice.
///
/// Each embedded point is expressed as a barycentric combination of the four
/// vertices of its enclosing lattice tetrahedron. The solver simulates the
/// lattice; [`EmbeddedMeshData::deform`] maps lattice results back onto the
/// visible surface.
#[derive(Clone, Debug)]
pub struct EmbeddedMeshData {
    /// Embedded surface vertex rest positions.
    pub x_rest: Vec<[f64; 3]>,
    /// Embedded surface triangles.
    pub faces: Vec<[usize; 3]>,
    /// Lattice vertex rest positions.
    pub lattice_verts: Vec<[f64; 3]>,
    /// Lattice tetrahedral elements.
    pub tets: Vec<[usize; 4]>,
    /// Per embedded point, the enclosing lattice tetrahedron.
    pub vtx_to_tet: Vec<usize>,
    /// Per embedded point, barycentric weights within the enclosing tet.
    pub barys: Vec<[f64; 4]>,
}

/// Tolerance for validating barycentric embedding weights.
const BARY_EPS: f64 = 1e-8;

impl EmbeddedMeshData {
    /// Checks index bounds and the barycentric embedding invariants.
    pub fn validate(&self) -> Result<(), Error> {
        if self.vtx_to_tet.len() != self.x_rest.len() || self.barys.len() != self.x_rest.len() {
            return Err(Error::SizeMismatch);
        }
        let n = self.lattice_verts.len();
        for (i, tet) in self.tets.iter().enumerate() {
            for &v in tet.iter() {
                if v >= n {
                    return Err(Error::ElementOutOfBounds {
                        element: i,
                        vertex: v,
                    });
                }
            }
        }
        for (point, (&tet, bary)) in self.vtx_to_tet.iter().zip(self.barys.iter()).enumerate() {
            if tet >= self.tets.len() {
                return Err(Error::EmbeddingOutOfBounds { point, tet });
            }
            let sum: f64 = bary.iter().sum();
            if (sum - 1.0).abs() > BARY_EPS || bary.iter().any(|&w| w < -BARY_EPS) {
                return Err(Error::InvalidBarycentricWeights { point });
            }
        }
        Ok(())
    }

    /// Evaluates embedded surface positions against deformed lattice vertices.
    pub fn deform(&self, lattice_x: &[[f64; 3]]) -> Vec<[f64; 3]> {
        self.vtx_to_tet
            .iter()
            .zip(self.barys.iter())
            .map(|(&tet, bary)| {
                let tet = &self.tets[tet];
                let mut p = [0.0; 3];
                for (&v, &w) in tet.iter().zip(bary.iter()) {
                    for axis in 0..3 {
                        p[axis] += lattice_x[v][axis] * w;
                    }
                }
                p
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn tet_mesh_bounds_check() {
        let mut mesh = make_one_tet_mesh();
        assert!(mesh.validate().is_ok());
        mesh.tets[0][3] = 17;
        assert!(matches!(
            mesh.validate(),
            Err(Error::ElementOutOfBounds { element: 0, .. })
        ));
    }

    #[test]
    fn embedding_validation() {
        let lattice = make_one_tet_mesh();
        let mut emb = EmbeddedMeshData {
            x_rest: vec![[0.25, 0.25, 0.25]],
            faces: vec![],
            lattice_verts: lattice.x_rest.clone(),
            tets: lattice.tets.clone(),
            vtx_to_tet: vec![0],
            barys: vec![[0.25; 4]],
        };
        assert!(emb.validate().is_ok());

        emb.barys[0] = [0.5, 0.5, 0.5, 0.5];
        assert!(matches!(
            emb.validate(),
            Err(Error::InvalidBarycentricWeights { point: 0 })
        ));

        emb.barys[0] = [0.25; 4];
        emb.vtx_to_tet[0] = 3;
        assert!(matches!(
            emb.validate(),
            Err(Error::EmbeddingOutOfBounds { point: 0, tet: 3 })
        ));
    }

    #[test]
    fn embedding_at_lattice_vertex_is_exact() {
        let lattice = make_one_tet_mesh();
        let emb = EmbeddedMeshData {
            x_rest: vec![lattice.x_rest[2]],
            faces: vec![],
            lattice_verts: lattice.x_rest.clone(),
            tets: lattice.tets.clone(),
            vtx_to_tet: vec![0],
            barys: vec![[0.0, 0.0, 1.0, 0.0]],
        };
        emb.validate().unwrap();

        let mut deformed = lattice.x_rest.clone();
        deformed[2] = [3.0, -1.0, 2.0];
        let surface = emb.deform(&deformed);
        assert_eq!(surface[0], [3.0, -1.0, 2.0]);
    }
}
