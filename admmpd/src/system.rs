use sprs_ldl::{Ldl, LdlNumeric};

use crate::constraint::PinConstraints;
use crate::energy::TetEnergies;
use crate::{Error, Options};

/// The constant operators of the global step.
///
/// Everything here depends only on topology, material constants and the
/// active constraint set; it is rebuilt on those changes and reused across
/// all ADMM iterations and timesteps.
pub(crate) struct GlobalSystem {
    /// Reduction matrix mapping vertex positions to per-element blocks,
    /// `3t x n`.
    pub d: sprs::CsMat<f64>,
    /// Weighted transpose `D'W²`, `n x 3t`.
    pub dtw2: sprs::CsMat<f64>,
    /// System matrix `A = M + D'W²D`, `n x n`.
    pub a: sprs::CsMat<f64>,
    /// Cholesky (LDLT) factorization of `A`, used for the global solve when
    /// no pins are active.
    ldlt: LdlNumeric<f64, usize>,
    /// Pin stiffness, derived from the diagonal scale of `A`.
    pub spring_k: f64,
    /// Per-axis augmented operators `A + spring_k KᵗK`, present only while
    /// pins are active.
    pub a_aug: Option<[sprs::CsMat<f64>; 3]>,
    /// Constraint right-hand-side term `spring_k Kᵗl`, zero without pins.
    pub ktl: Vec<[f64; 3]>,
}

/// Lumped vertex masses from rest volumes and density.
pub(crate) fn lumped_masses(
    num_verts: usize,
    energies: &TetEnergies,
    density: f64,
) -> Vec<f64> {
    let mut m = vec![0.0; num_verts];
    for (tet, &vol) in energies.tets.iter().zip(energies.rest_volumes.iter()) {
        let share = vol * density / 4.0;
        for &v in tet.iter() {
            m[v] += share;
        }
    }
    m
}

impl GlobalSystem {
    /// Assembles `D`, `D'W²`, `A = M + D'W²D` and factorizes `A`.
    ///
    /// A factorization failure means the mass/stiffness input is inconsistent
    /// and is reported as a fatal configuration error.
    pub fn build(
        options: &Options,
        num_verts: usize,
        assembly: &TetEnergies,
        masses: &[f64],
    ) -> Result<GlobalSystem, Error> {
        let d = assembly.d_triplets.to_csr();

        let mut trips = sprs::TriMat::new((num_verts, d.rows()));
        for (row, vec) in d.outer_iterator().enumerate() {
            let w = assembly.weights[row / 3];
            let w2 = w * w;
            for (col, &val) in vec.iter() {
                trips.add_triplet(col, row, val * w2);
            }
        }
        let dtw2: sprs::CsMat<f64> = trips.to_csr();

        let mut mtrips = sprs::TriMat::new((num_verts, num_verts));
        for (i, &m) in masses.iter().enumerate() {
            if !(m > 0.0) {
                return Err(Error::ZeroMassVertex { vertex: i });
            }
            mtrips.add_triplet(i, i, m);
        }
        let mass: sprs::CsMat<f64> = mtrips.to_csr();

        let a = &mass + &(&dtw2 * &d);

        let mut diag_max = 0.0f64;
        for i in 0..num_verts {
            if let Some(&aii) = a.get(i, i) {
                diag_max = diag_max.max(aii);
            }
        }
        let spring_k = options.mult_k * diag_max;

        let ldlt = Ldl::new()
            .check_symmetry(sprs::SymmetryCheck::DontCheckSymmetry)
            .fill_in_reduction(sprs::FillInReduction::ReverseCuthillMcKee)
            .numeric(a.view())
            .map_err(|_| Error::FactorizationFailed)?;

        Ok(GlobalSystem {
            d,
            dtw2,
            a,
            ldlt,
            spring_k,
            a_aug: None,
            ktl: vec![[0.0; 3]; num_verts],
        })
    }

    /// Rebuilds the constraint-dependent caches for a new pin set.
    pub fn set_pins(&mut self, pins: &PinConstraints) {
        let n = self.a.rows();
        self.ktl = vec![[0.0; 3]; n];
        if pins.is_empty() {
            self.a_aug = None;
            return;
        }

        let (k, l) = pins.jacobian(n);
        let spring_k = self.spring_k;
        self.a_aug = Some(std::array::from_fn(|axis| {
            let kt = k[axis].transpose_view().to_csr();
            let ktk = (&kt * &k[axis]).map(|v| v * spring_k);
            &self.a + &ktk
        }));
        for axis in 0..3 {
            for (row, &vertex) in pins.indices.iter().enumerate() {
                self.ktl[vertex][axis] += spring_k * l[axis][row];
            }
        }
    }

    /// The global operator along one spatial axis: augmented when pins are
    /// active, plain `A` otherwise.
    pub fn axis_operator(&self, axis: usize) -> &sprs::CsMat<f64> {
        self.a_aug.as_ref().map(|aug| &aug[axis]).unwrap_or(&self.a)
    }

    /// Solves `A x = b` along one axis with the cached factorization.
    pub fn solve_direct(&self, b: &Vec<f64>) -> Vec<f64> {
        self.ldlt.solve(b)
    }
}

/// `out = mat * rhs` for a 3-column dense right-hand side.
pub(crate) fn mul_dense3(mat: &sprs::CsMat<f64>, rhs: &[[f64; 3]], out: &mut [[f64; 3]]) {
    debug_assert_eq!(mat.cols(), rhs.len());
    debug_assert_eq!(mat.rows(), out.len());
    for (row, vec) in mat.outer_iterator().enumerate() {
        let mut acc = [0.0; 3];
        for (col, &val) in vec.iter() {
            for axis in 0..3 {
                acc[axis] += val * rhs[col][axis];
            }
        }
        out[row] = acc;
    }
}

/// `out += mat * (pos - neg)` for 3-column dense operands.
pub(crate) fn add_mul_dense3_diff(
    mat: &sprs::CsMat<f64>,
    pos: &[[f64; 3]],
    neg: &[[f64; 3]],
    out: &mut [[f64; 3]],
) {
    debug_assert_eq!(mat.cols(), pos.len());
    debug_assert_eq!(pos.len(), neg.len());
    for (row, vec) in mat.outer_iterator().enumerate() {
        for (col, &val) in vec.iter() {
            for axis in 0..3 {
                out[row][axis] += val * (pos[col][axis] - neg[col][axis]);
            }
        }
    }
}

/// `out = mat * rhs` for a single-axis dense vector.
pub(crate) fn mul_axis(mat: &sprs::CsMat<f64>, rhs: &[f64], out: &mut [f64]) {
    for (row, vec) in mat.outer_iterator().enumerate() {
        let mut acc = 0.0;
        for (col, &val) in vec.iter() {
            acc += val * rhs[col];
        }
        out[row] = acc;
    }
}
