mod cg;
mod gauss_seidel;

pub use cg::*;
pub use gauss_seidel::*;

use thiserror::Error;

use crate::system::GlobalSystem;

#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum Status {
    #[error("Success")]
    Success,
    #[error("Maximum number of linear solver iterations exceeded")]
    MaximumIterationsExceeded,
    #[error("NaN detected")]
    NanDetected,
    #[error("Singular matrix detected")]
    SingularMatrix,
}

impl Default for Status {
    fn default() -> Self {
        Status::Success
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct SolveResult {
    /// Number of iterations of an iterative solver.
    pub iterations: u32,
    /// Absolute residual 2-norm.
    pub residual: f64,
    /// Relative residual 2-norm.
    ///
    /// Residual divided by the norm of the right-hand-side.
    pub error: f64,
    /// Final status of the linear solve.
    pub status: Status,
}

impl SolveResult {
    /// Combines per-axis results into a per-step summary, keeping the worst
    /// status and the largest residuals.
    pub(crate) fn merge(self, other: SolveResult) -> SolveResult {
        SolveResult {
            iterations: self.iterations.max(other.iterations),
            residual: self.residual.max(other.residual),
            error: self.error.max(other.error),
            status: if other.status == Status::Success {
                self.status
            } else {
                other.status
            },
        }
    }
}

/// The inner solver of the ADMM global step.
///
/// Solves `A x = b` column-by-column over the three spatial axes, where `A`
/// is the (possibly constraint-augmented) global operator held by the
/// [`GlobalSystem`]. Implementations own their scratch buffers and any
/// pattern-derived caches; [`LinearSolve::reset`] is invoked whenever the
/// sparsity pattern changes.
pub(crate) trait LinearSolve: Send {
    /// Rebuilds pattern-dependent caches (colorings, scratch sizes).
    fn reset(&mut self, sys: &GlobalSystem);

    /// Solves for all three axes, using `x` as warm start and solution.
    fn solve(&mut self, sys: &GlobalSystem, b: &[[f64; 3]], x: &mut [[f64; 3]]) -> SolveResult;
}

/// Global solve through the cached LDLT factorization of `A`.
///
/// Only valid while no pins are active; with an active constraint set the
/// driver switches to one of the iterative strategies instead.
#[derive(Default)]
pub(crate) struct DirectSolver {
    bcol: Vec<f64>,
}

impl LinearSolve for DirectSolver {
    fn reset(&mut self, sys: &GlobalSystem) {
        self.bcol.resize(sys.a.rows(), 0.0);
    }

    fn solve(&mut self, sys: &GlobalSystem, b: &[[f64; 3]], x: &mut [[f64; 3]]) -> SolveResult {
        let mut result = SolveResult {
            iterations: 1,
            ..Default::default()
        };
        for axis in 0..3 {
            for (bc, bi) in self.bcol.iter_mut().zip(b.iter()) {
                *bc = bi[axis];
            }
            let sol = sys.solve_direct(&self.bcol);
            if sol.iter().any(|v| !v.is_finite()) {
                result.status = Status::NanDetected;
                return result;
            }
            for (xi, s) in x.iter_mut().zip(sol.iter()) {
                xi[axis] = *s;
            }
        }
        result
    }
}
