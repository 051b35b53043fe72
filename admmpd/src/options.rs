use serde::{Deserialize, Serialize};

use crate::Error;

/// Inner linear solver used for the global step when pin constraints are
/// active.
///
/// Without constraints the global system matrix is constant and the cached
/// direct factorization is always used instead.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolverKind {
    ConjugateGradient,
    GaussSeidel,
}

impl Default for LinearSolverKind {
    fn default() -> Self {
        LinearSolverKind::ConjugateGradient
    }
}

/// Simulation parameters, immutable for the duration of a step.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Timestep in seconds.
    pub timestep: f64,
    /// Maximum number of outer ADMM iterations per step.
    pub max_admm_iters: u32,
    /// Maximum number of conjugate gradient iterations per global solve.
    pub max_cg_iters: u32,
    /// Maximum number of Gauss-Seidel sweeps per global solve.
    pub max_gs_iters: u32,
    /// Stiffness multiplier for pin constraints.
    pub mult_k: f64,
    /// Relative residual tolerance for the iterative inner solvers.
    pub min_res: f64,
    /// Young's modulus.
    pub youngs: f64,
    /// Poisson ratio.
    pub poisson: f64,
    /// Material density in kg/m³ used for lumped vertex masses.
    pub density: f64,
    /// Gravity vector.
    pub grav: [f64; 3],
    /// Inner solver used when pin constraints are active.
    pub linsolver: LinearSolverKind,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            timestep: 1.0 / 24.0,
            max_admm_iters: 50,
            max_cg_iters: 10,
            max_gs_iters: 30,
            mult_k: 1.0,
            min_res: 1e-6,
            youngs: 1e6,
            poisson: 0.299,
            density: 1100.0,
            grav: [0.0, 0.0, -9.8],
            linsolver: LinearSolverKind::default(),
        }
    }
}

impl Options {
    /// Checks that the parameters describe a solvable configuration.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |name: &str| Error::InvalidParameter { name: name.into() };
        if !(self.timestep > 0.0) {
            return Err(invalid("timestep"));
        }
        if self.max_admm_iters < 1 {
            return Err(invalid("max_admm_iters"));
        }
        if self.max_cg_iters < 1 {
            return Err(invalid("max_cg_iters"));
        }
        if self.max_gs_iters < 1 {
            return Err(invalid("max_gs_iters"));
        }
        if !(self.mult_k > 0.0) {
            return Err(invalid("mult_k"));
        }
        if !(self.min_res > 0.0) {
            return Err(invalid("min_res"));
        }
        if !(self.youngs > 0.0) {
            return Err(invalid("youngs"));
        }
        if !(self.poisson >= 0.0 && self.poisson < 0.5) {
            return Err(invalid("poisson"));
        }
        if !(self.density > 0.0) {
            return Err(invalid("density"));
        }
        if !self.grav.iter().all(|g| g.is_finite()) {
            return Err(invalid("grav"));
        }
        Ok(())
    }
}
