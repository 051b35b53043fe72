use rayon::prelude::*;

use super::{LinearSolve, SolveResult, Status};
use crate::system::GlobalSystem;
use crate::Options;

/// Partitions the rows of a symmetric sparse operator into colors such that
/// no two rows of the same color are coupled by an off-diagonal nonzero.
///
/// Greedy first-fit coloring over the row adjacency. All rows sharing a color
/// can then be updated independently within one Gauss-Seidel sweep.
pub(crate) fn color_rows(mat: &sprs::CsMat<f64>) -> Vec<Vec<usize>> {
    let n = mat.rows();
    let mut color = vec![usize::MAX; n];
    let mut num_colors = 0;
    let mut used = Vec::new();

    for i in 0..n {
        used.clear();
        used.resize(num_colors, false);
        if let Some(row) = mat.outer_view(i) {
            for (j, _) in row.iter() {
                if j != i && color[j] != usize::MAX {
                    used[color[j]] = true;
                }
            }
        }
        let c = used.iter().position(|&taken| !taken).unwrap_or_else(|| {
            num_colors += 1;
            num_colors - 1
        });
        color[i] = c;
    }

    let mut groups = vec![Vec::new(); num_colors];
    for (i, &c) in color.iter().enumerate() {
        groups[c].push(i);
    }
    groups
}

/// Colored Gauss-Seidel sweeps over the global operator.
///
/// Colors are visited in a fixed order; rows within a color update in
/// parallel against the values written by earlier colors of the same sweep
/// (Gauss-Seidel semantics). The coloring is sparsity metadata derived from
/// the current operator and is recomputed only when the pattern changes.
pub struct GaussSeidel {
    pub max_sweeps: u32,
    pub tol: f64,
    colors: Vec<Vec<usize>>,
    xcol: Vec<f64>,
    bcol: Vec<f64>,
}

impl GaussSeidel {
    pub fn new(max_sweeps: u32, tol: f64) -> Self {
        GaussSeidel {
            max_sweeps: max_sweeps.max(1),
            tol: f64::EPSILON.max(tol),
            colors: Vec::new(),
            xcol: Vec::new(),
            bcol: Vec::new(),
        }
    }

    pub(crate) fn from_options(options: &Options) -> Self {
        Self::new(options.max_gs_iters, options.min_res)
    }

    /// Runs colored sweeps on one axis. Returns the number of sweeps and the
    /// magnitude of the last sweep's position change.
    fn sweep_axis(&mut self, op: &sprs::CsMat<f64>) -> (u32, f64) {
        let GaussSeidel {
            max_sweeps,
            tol,
            ref colors,
            ref mut xcol,
            ref bcol,
            ..
        } = *self;

        let mut last_dx = f64::INFINITY;
        let mut sweeps = 0;
        while sweeps < max_sweeps {
            last_dx = 0.0;
            for color in colors.iter() {
                // Rows of one color are mutually uncoupled, so their updates
                // read a consistent x and can run in parallel before being
                // written back.
                let updates: Vec<(usize, f64)> = color
                    .par_iter()
                    .filter_map(|&i| {
                        let row = op.outer_view(i)?;
                        let mut diag = 0.0;
                        let mut off = 0.0;
                        for (j, &val) in row.iter() {
                            if j == i {
                                diag = val;
                            } else {
                                off += val * xcol[j];
                            }
                        }
                        if diag == 0.0 {
                            return None;
                        }
                        Some((i, (bcol[i] - off) / diag))
                    })
                    .collect();
                for (i, new_x) in updates {
                    last_dx = last_dx.max((new_x - xcol[i]).abs());
                    xcol[i] = new_x;
                }
            }
            sweeps += 1;
            log::trace!("gs sweep {}: last_dx = {:.3e}", sweeps, last_dx);
            if last_dx <= tol {
                break;
            }
        }
        (sweeps, last_dx)
    }
}

impl LinearSolve for GaussSeidel {
    fn reset(&mut self, sys: &GlobalSystem) {
        let n = sys.a.rows();
        self.xcol.resize(n, 0.0);
        self.bcol.resize(n, 0.0);
        // Pin constraint rows only touch the diagonal, so the pattern of the
        // augmented operator is the same for every axis.
        self.colors = color_rows(sys.axis_operator(0));
    }

    fn solve(&mut self, sys: &GlobalSystem, b: &[[f64; 3]], x: &mut [[f64; 3]]) -> SolveResult {
        let mut result = SolveResult::default();
        for axis in 0..3 {
            for i in 0..b.len() {
                self.bcol[i] = b[i][axis] + sys.ktl[i][axis];
                self.xcol[i] = x[i][axis];
            }
            let (sweeps, last_dx) = self.sweep_axis(sys.axis_operator(axis));
            for (xi, &s) in x.iter_mut().zip(self.xcol.iter()) {
                xi[axis] = s;
            }
            let status = if !last_dx.is_finite() {
                Status::NanDetected
            } else if last_dx <= self.tol {
                Status::Success
            } else {
                Status::MaximumIterationsExceeded
            };
            result = result.merge(SolveResult {
                iterations: sweeps,
                residual: last_dx,
                error: last_dx,
                status,
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coloring_is_valid(mat: &sprs::CsMat<f64>, colors: &[Vec<usize>]) -> bool {
        let n = mat.rows();
        let mut color_of = vec![usize::MAX; n];
        for (c, group) in colors.iter().enumerate() {
            for &i in group.iter() {
                color_of[i] = c;
            }
        }
        // Every row must be colored and no off-diagonal nonzero may couple
        // two rows of the same color.
        color_of.iter().all(|&c| c != usize::MAX)
            && mat.outer_iterator().enumerate().all(|(i, row)| {
                row.iter().all(|(j, _)| i == j || color_of[i] != color_of[j])
            })
    }

    #[test]
    fn coloring_tridiagonal() {
        let mut trips = sprs::TriMat::new((5, 5));
        for i in 0..5 {
            trips.add_triplet(i, i, 2.0);
            if i + 1 < 5 {
                trips.add_triplet(i, i + 1, -1.0);
                trips.add_triplet(i + 1, i, -1.0);
            }
        }
        let mat: sprs::CsMat<f64> = trips.to_csr();
        let colors = color_rows(&mat);
        assert!(coloring_is_valid(&mat, &colors));
        // A path graph is 2-colorable.
        assert_eq!(colors.len(), 2);
    }

    #[test]
    fn coloring_valid_for_assembled_topology() {
        use crate::constraint::PinConstraints;
        use crate::energy::append_tet_energies;
        use crate::system::{lumped_masses, GlobalSystem};
        use crate::test_utils::*;

        let opts = zero_gravity_options();
        let mesh = make_three_tet_mesh();
        let asm = append_tet_energies(&mesh.x_rest, &mesh.tets, &opts).unwrap();
        let masses = lumped_masses(mesh.num_verts(), &asm, opts.density);
        let mut sys = GlobalSystem::build(&opts, mesh.num_verts(), &asm, &masses).unwrap();

        let colors = color_rows(&sys.a);
        assert!(coloring_is_valid(&sys.a, &colors));

        // The constraint-augmented pattern must be recolored and stay valid.
        sys.set_pins(&PinConstraints::new(vec![4, 5], vec![[0.0; 3]; 2]));
        let aug = sys.axis_operator(0);
        let colors = color_rows(aug);
        assert!(coloring_is_valid(aug, &colors));
    }

    #[test]
    fn coloring_diagonal_is_single_color() {
        let mut trips = sprs::TriMat::new((4, 4));
        for i in 0..4 {
            trips.add_triplet(i, i, 1.0);
        }
        let mat: sprs::CsMat<f64> = trips.to_csr();
        let colors = color_rows(&mat);
        assert!(coloring_is_valid(&mat, &colors));
        assert_eq!(colors.len(), 1);
    }
}
