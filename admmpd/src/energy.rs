use crate::{Error, Options};

/// Row range of one energy term within the reduction matrix `D`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EnergyIndex {
    /// First row of this energy's block.
    pub row: usize,
    /// Number of rows in the block.
    pub rows: usize,
}

/// Per-element energy bookkeeping for a tetrahedral topology.
///
/// Entries are kept in 1:1 correspondence across the vectors and with the
/// row blocks of `D`, so the local projection can address its slice of `z`
/// and `u` directly from the energy index.
#[derive(Debug)]
pub(crate) struct TetEnergies {
    pub tets: Vec<[usize; 4]>,
    /// Row range of each energy within `D`.
    pub indices: Vec<EnergyIndex>,
    pub rest_volumes: Vec<f64>,
    /// Contribution weight `w = sqrt(2µ vol)` of each energy.
    pub weights: Vec<f64>,
    /// Triplets of the reduction matrix `D`, `3t x n`.
    pub d_triplets: sprs::TriMat<f64>,
}

impl TetEnergies {
    pub fn len(&self) -> usize {
        self.tets.len()
    }
}

/// Converts Young's modulus and Poisson ratio to the Lamé parameters (µ, λ).
pub(crate) fn lame_parameters(youngs: f64, poisson: f64) -> (f64, f64) {
    let mu = youngs / (2.0 * (1.0 + poisson));
    let lambda = youngs * poisson / ((1.0 + poisson) * (1.0 - 2.0 * poisson));
    (mu, lambda)
}

/// Projects a deformation block `Dx + u` onto the rotation manifold.
///
/// The block stores the transposed deformation gradient. The projection is
/// the as-rigid-as-possible one: a signed SVD of the deformation gradient
/// with all singular values clamped to one. Returns `None` for non-finite or
/// rank-deficient blocks, in which case the caller keeps the previous local
/// variable instead of propagating garbage into the global solve.
pub(crate) fn project_block(block: &na::Matrix3<f64>) -> Option<na::Matrix3<f64>> {
    if !block.iter().all(|x| x.is_finite()) {
        return None;
    }
    let f = block.transpose();
    let svd = f.svd(true, true);
    let mut u = svd.u?;
    let v_t = svd.v_t?;

    // An inverted element shows up as a reflection. Flip the axis of least
    // stretch to recover the closest proper rotation.
    if (u * v_t).determinant() < 0.0 {
        let min = svd.singular_values.imin();
        let mut col = u.column_mut(min);
        col *= -1.0;
    }

    let r = u * v_t;
    Some(r.transpose())
}

/// Builds one energy term per tetrahedron and appends its rows to `D`.
///
/// Rest volumes must be positive; degenerate elements are collected and
/// reported as a fatal configuration error since they would make the global
/// operator singular.
pub(crate) fn append_tet_energies(
    verts: &[[f64; 3]],
    tets: &[[usize; 4]],
    options: &Options,
) -> Result<TetEnergies, Error> {
    let (mu, _lambda) = lame_parameters(options.youngs, options.poisson);

    let mut indices = Vec::with_capacity(tets.len());
    let mut rest_volumes = Vec::with_capacity(tets.len());
    let mut weights = Vec::with_capacity(tets.len());
    let mut d_triplets = sprs::TriMat::new((3 * tets.len(), verts.len()));
    let mut degens = Vec::new();

    for (i, tet) in tets.iter().enumerate() {
        let x0 = na::Vector3::from(verts[tet[0]]);
        let edges = na::Matrix3::from_columns(&[
            na::Vector3::from(verts[tet[1]]) - x0,
            na::Vector3::from(verts[tet[2]]) - x0,
            na::Vector3::from(verts[tet[3]]) - x0,
        ]);

        let volume = edges.determinant() / 6.0;
        let inv_rest_shape = match edges.try_inverse() {
            Some(inv) if volume > 0.0 => inv,
            _ => {
                degens.push(i);
                continue;
            }
        };

        let row = 3 * i;
        for r in 0..3 {
            let mut diag = 0.0;
            for j in 0..3 {
                let c = inv_rest_shape[(j, r)];
                d_triplets.add_triplet(row + r, tet[j + 1], c);
                diag -= c;
            }
            d_triplets.add_triplet(row + r, tet[0], diag);
        }

        indices.push(EnergyIndex { row, rows: 3 });
        rest_volumes.push(volume);
        weights.push((2.0 * mu * volume).sqrt());
    }

    if !degens.is_empty() {
        return Err(Error::DegenerateRestElement { degens });
    }

    Ok(TetEnergies {
        tets: tets.to_vec(),
        indices,
        rest_volumes,
        weights,
        d_triplets,
    })
}
