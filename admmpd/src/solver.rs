use rayon::prelude::*;

use crate::constraint::PinConstraints;
use crate::energy::{self, TetEnergies};
use crate::linsolve::{
    ConjugateGradient, DirectSolver, GaussSeidel, LinearSolve, SolveResult, Status,
};
use crate::mesh::{EmbeddedMeshData, TetMeshData};
use crate::state::SolverState;
use crate::system::{self, GlobalSystem};
use crate::{inf_norm, Error, LinearSolverKind, Options};

/// Convergence tolerance on the per-iteration position change of the outer
/// ADMM loop. The iteration cap remains the primary bound.
const ADMM_DX_TOL: f64 = 1e-10;

/// Outcome of one [`Solver::step`].
#[derive(Copy, Clone, Debug, Default)]
pub struct StepResult {
    /// Number of ADMM iterations taken.
    pub iterations: u32,
    /// Infinity norm of the last iteration's position change.
    pub last_dx: f64,
    /// Result of the last inner linear solve.
    pub inner: SolveResult,
}

impl std::fmt::Display for StepResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} ADMM iterations, |dx| = {:.3e}",
            self.iterations, self.last_dx
        )
    }
}

/// ADMM projective dynamics engine for one soft body.
///
/// Owns the simulation state exclusively; a step either completes or the
/// caller abandons the simulation. Topology is fixed for the lifetime of a
/// solver; changing the pin set or the options rebuilds the affected cached
/// operators.
pub struct Solver {
    options: Options,
    /// Rest positions, kept for rebuilding operators on parameter changes.
    x_rest: Vec<[f64; 3]>,
    state: SolverState,
    energies: TetEnergies,
    system: GlobalSystem,
    pins: PinConstraints,
    inner: Box<dyn LinearSolve>,
    /// Previous iterate of the outer loop, for the convergence check.
    x_prev: Vec<[f64; 3]>,
}

impl Solver {
    /// Creates a solver for a tetrahedral mesh.
    ///
    /// Fails on invalid options, out-of-bounds element indices, degenerate
    /// rest elements, massless vertices, or a system matrix that cannot be
    /// factorized.
    pub fn new(options: Options, mesh: &TetMeshData) -> Result<Solver, Error> {
        options.validate()?;
        mesh.validate()?;
        Self::with_rest_state(options, &mesh.x_rest, &mesh.tets)
    }

    /// Creates a solver simulating the lattice of an embedded mesh.
    ///
    /// The host maps lattice positions back onto the visible surface with
    /// [`EmbeddedMeshData::deform`].
    pub fn from_embedded(options: Options, mesh: &EmbeddedMeshData) -> Result<Solver, Error> {
        options.validate()?;
        mesh.validate()?;
        Self::with_rest_state(options, &mesh.lattice_verts, &mesh.tets)
    }

    fn with_rest_state(
        options: Options,
        x_rest: &[[f64; 3]],
        tets: &[[usize; 4]],
    ) -> Result<Solver, Error> {
        let energies = energy::append_tet_energies(x_rest, tets, &options)?;
        let masses = system::lumped_masses(x_rest.len(), &energies, options.density);
        let system = GlobalSystem::build(&options, x_rest.len(), &energies, &masses)?;
        let state = SolverState::new(x_rest, tets, masses, system.d.rows());

        let mut inner: Box<dyn LinearSolve> = Box::new(DirectSolver::default());
        inner.reset(&system);

        Ok(Solver {
            options,
            x_rest: x_rest.to_vec(),
            x_prev: state.x.clone(),
            state,
            energies,
            system,
            pins: PinConstraints::default(),
            inner,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Replaces the simulation parameters and rebuilds the cached operators.
    ///
    /// Positions, velocities and the pin set are preserved.
    pub fn set_options(&mut self, options: Options) -> Result<(), Error> {
        options.validate()?;
        self.options = options;

        let energies =
            energy::append_tet_energies(&self.x_rest, &self.state.tets, &self.options)?;
        let masses =
            system::lumped_masses(self.x_rest.len(), &energies, self.options.density);
        self.system =
            GlobalSystem::build(&self.options, self.x_rest.len(), &energies, &masses)?;
        self.energies = energies;
        self.state.m = masses;

        let pins = std::mem::take(&mut self.pins);
        self.set_pins(pins)
    }

    /// Replaces the active pin constraint set.
    ///
    /// Rebuilds the per-axis augmented operators and switches the inner
    /// solver strategy: the cached factorization when no pins are active, the
    /// configured iterative solver otherwise.
    pub fn set_pins(&mut self, pins: PinConstraints) -> Result<(), Error> {
        pins.validate(self.state.num_verts())?;
        self.system.set_pins(&pins);
        self.inner = if pins.is_empty() {
            Box::new(DirectSolver::default())
        } else {
            match self.options.linsolver {
                LinearSolverKind::ConjugateGradient => Box::new(ConjugateGradient::from_options(
                    self.state.num_verts(),
                    &self.options,
                )),
                LinearSolverKind::GaussSeidel => Box::new(GaussSeidel::from_options(&self.options)),
            }
        };
        self.inner.reset(&self.system);
        self.pins = pins;
        Ok(())
    }

    pub fn state(&self) -> &SolverState {
        &self.state
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.state.x
    }

    pub fn velocities(&self) -> &[[f64; 3]] {
        &self.state.v
    }

    /// Overwrites vertex positions, e.g. after a host-side transform.
    pub fn set_positions(&mut self, x: &[[f64; 3]]) -> Result<(), Error> {
        if x.len() != self.state.x.len() {
            return Err(Error::SizeMismatch);
        }
        self.state.x.copy_from_slice(x);
        Ok(())
    }

    pub fn set_velocities(&mut self, v: &[[f64; 3]]) -> Result<(), Error> {
        if v.len() != self.state.v.len() {
            return Err(Error::SizeMismatch);
        }
        self.state.v.copy_from_slice(v);
        Ok(())
    }

    /// Advances the simulation by one timestep.
    ///
    /// Alternates the per-element local projection with the global linear
    /// solve until the ADMM iteration cap or the convergence tolerance is
    /// reached, then derives velocities from the position change. Inner
    /// solver stagnation is absorbed and logged; only configuration
    /// inconsistencies would have been reported earlier, so this cannot fail
    /// once the solver is built.
    pub fn step(&mut self) -> Result<StepResult, Error> {
        let dt = self.options.timestep;
        let grav = self.options.grav;

        debug_assert!(self
            .energies
            .indices
            .iter()
            .enumerate()
            .all(|(i, e)| e.row == 3 * i && e.rows == 3));

        // Init: snapshot the step start and form the inertial target
        // M (x + dt v) + dt² M g.
        let state = &mut self.state;
        state.x_start.copy_from_slice(&state.x);
        for i in 0..state.x.len() {
            let m = state.m[i];
            for axis in 0..3 {
                state.m_xbar[i][axis] =
                    m * (state.x[i][axis] + dt * state.v[i][axis] + dt * dt * grav[axis]);
            }
        }

        // A fresh ADMM sequence starts from the current positions with a
        // zeroed dual variable.
        system::mul_dense3(&self.system.d, &state.x, &mut state.dx);
        state.z.copy_from_slice(&state.dx);
        state.u.iter_mut().for_each(|u| *u = [0.0; 3]);

        let mut result = StepResult::default();
        for _ in 0..self.options.max_admm_iters {
            self.local_step();

            let state = &mut self.state;

            // Global step: A x = M x̄ + D'W²(z - u).
            state.b.copy_from_slice(&state.m_xbar);
            system::add_mul_dense3_diff(&self.system.dtw2, &state.z, &state.u, &mut state.b);
            self.x_prev.copy_from_slice(&state.x);
            result.inner = self.inner.solve(&self.system, &state.b, &mut state.x);

            // Dual update: u += Dx - z.
            system::mul_dense3(&self.system.d, &state.x, &mut state.dx);
            for ((u, dx), z) in state.u.iter_mut().zip(state.dx.iter()).zip(state.z.iter()) {
                for axis in 0..3 {
                    u[axis] += dx[axis] - z[axis];
                }
            }

            result.iterations += 1;
            result.last_dx = inf_norm(
                state
                    .x
                    .iter()
                    .zip(self.x_prev.iter())
                    .flat_map(|(a, b)| (0..3).map(move |axis| a[axis] - b[axis])),
            );
            if result.last_dx < ADMM_DX_TOL {
                break;
            }
        }

        if result.inner.status == Status::MaximumIterationsExceeded {
            log::warn!(
                "inner solve stagnated at relative error {:.3e}; continuing with best iterate",
                result.inner.error
            );
        }

        // Finalize: v = (x - x_start) / dt.
        let state = &mut self.state;
        for (v, (x, x0)) in state
            .v
            .iter_mut()
            .zip(state.x.iter().zip(state.x_start.iter()))
        {
            for axis in 0..3 {
                v[axis] = (x[axis] - x0[axis]) / dt;
            }
        }

        log::debug!("admm step: {}", result);
        Ok(result)
    }

    /// Local step: project every energy's current `Dx + u` block onto its
    /// elastic manifold. Data-parallel across energies; blocks that fail to
    /// project keep their previous local variable.
    fn local_step(&mut self) {
        let state = &mut self.state;
        debug_assert_eq!(3 * self.energies.len(), state.z.len());
        state
            .z
            .par_chunks_mut(3)
            .zip(state.dx.par_chunks(3).zip(state.u.par_chunks(3)))
            .for_each(|(z, (dx, u))| {
                let block = na::Matrix3::new(
                    dx[0][0] + u[0][0],
                    dx[0][1] + u[0][1],
                    dx[0][2] + u[0][2],
                    dx[1][0] + u[1][0],
                    dx[1][1] + u[1][1],
                    dx[1][2] + u[1][2],
                    dx[2][0] + u[2][0],
                    dx[2][1] + u[2][1],
                    dx[2][2] + u[2][2],
                );
                if let Some(p) = energy::project_block(&block) {
                    for r in 0..3 {
                        z[r] = [p[(r, 0)], p[(r, 1)], p[(r, 2)]];
                    }
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use approx::assert_relative_eq;

    /// CG and the direct factorization must agree on the same system.
    #[test]
    fn cg_matches_direct() {
        let opts = zero_gravity_options();
        let mesh = make_three_tet_mesh();
        let solver = Solver::new(opts, &mesh).unwrap();

        let n = solver.state.num_verts();
        let b: Vec<[f64; 3]> = (0..n)
            .map(|i| {
                let s = i as f64 + 1.0;
                [0.3 * s, -0.7 * s, 1.1 * s]
            })
            .collect();

        let mut x_direct = vec![[0.0; 3]; n];
        let mut direct = DirectSolver::default();
        direct.reset(&solver.system);
        let res = direct.solve(&solver.system, &b, &mut x_direct);
        assert_eq!(res.status, Status::Success);

        let mut x_cg = vec![[0.0; 3]; n];
        let mut cg = ConjugateGradient::new(n, 500, opts.min_res);
        cg.reset(&solver.system);
        let res = cg.solve(&solver.system, &b, &mut x_cg);
        assert_eq!(res.status, Status::Success);

        for (a, b) in x_direct.iter().zip(x_cg.iter()) {
            for axis in 0..3 {
                assert_relative_eq!(a[axis], b[axis], epsilon = 1e-5, max_relative = 1e-5);
            }
        }
    }

    /// Colored Gauss-Seidel also converges to the direct solution on a small
    /// well-conditioned system.
    #[test]
    fn gauss_seidel_matches_direct() {
        let opts = zero_gravity_options();
        let mesh = make_three_tet_mesh();
        let solver = Solver::new(opts, &mesh).unwrap();

        let n = solver.state.num_verts();
        let b: Vec<[f64; 3]> = (0..n).map(|i| [i as f64, 1.0, -2.0]).collect();

        let mut x_direct = vec![[0.0; 3]; n];
        let mut direct = DirectSolver::default();
        direct.reset(&solver.system);
        direct.solve(&solver.system, &b, &mut x_direct);

        let mut x_gs = vec![[0.0; 3]; n];
        let mut gs = GaussSeidel::new(2000, 1e-12);
        gs.reset(&solver.system);
        gs.solve(&solver.system, &b, &mut x_gs);

        for (a, b) in x_direct.iter().zip(x_gs.iter()) {
            for axis in 0..3 {
                assert_relative_eq!(a[axis], b[axis], epsilon = 1e-6, max_relative = 1e-6);
            }
        }
    }

    /// At full convergence z == Dx, so the dual variable stops changing.
    #[test]
    fn dual_variable_fixed_point() {
        let opts = zero_gravity_options();
        let mesh = make_one_tet_mesh();
        let mut solver = Solver::new(opts, &mesh).unwrap();
        solver.step().unwrap();

        let state = solver.state();
        for (z, dx) in state.z.iter().zip(state.dx.iter()) {
            for axis in 0..3 {
                assert_relative_eq!(z[axis], dx[axis], epsilon = 1e-9);
            }
        }
        assert!(inf_norm(state.u.iter().flat_map(|u| u.iter().copied())) < 1e-9);
    }

    /// The coloring must stay valid for the constraint-augmented pattern.
    #[test]
    fn pinned_solver_switches_strategy() {
        let opts = Options {
            linsolver: LinearSolverKind::GaussSeidel,
            ..zero_gravity_options()
        };
        let mesh = make_three_tet_mesh();
        let mut solver = Solver::new(opts, &mesh).unwrap();
        let targets = vec![mesh.x_rest[2], mesh.x_rest[3]];
        solver
            .set_pins(PinConstraints::new(vec![2, 3], targets))
            .unwrap();
        assert!(solver.system.a_aug.is_some());
        assert!(solver.step().is_ok());

        // Dropping the pins falls back to the direct path.
        solver.set_pins(PinConstraints::default()).unwrap();
        assert!(solver.system.a_aug.is_none());
        assert!(solver.step().is_ok());
    }

    #[test]
    fn pin_out_of_bounds_is_rejected() {
        let mesh = make_one_tet_mesh();
        let mut solver = Solver::new(zero_gravity_options(), &mesh).unwrap();
        let err = solver
            .set_pins(PinConstraints::new(vec![9], vec![[0.0; 3]]))
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintOutOfBounds { vertex: 9 }));
    }
}
