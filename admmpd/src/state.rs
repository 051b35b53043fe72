/// Persistent per-body simulation state.
///
/// One instance per soft body, owned exclusively by its [`Solver`] for the
/// duration of a step. Scratch buffers of the inner linear solvers live with
/// the active solver strategy instead, so this struct only carries state that
/// survives between steps.
///
/// [`Solver`]: crate::Solver
#[derive(Clone, Debug)]
pub struct SolverState {
    /// Tetrahedral elements, copied once from the input mesh.
    pub tets: Vec<[usize; 4]>,
    /// Vertex positions.
    pub x: Vec<[f64; 3]>,
    /// Vertex velocities.
    pub v: Vec<[f64; 3]>,
    /// Positions at the beginning of the current timestep.
    pub x_start: Vec<[f64; 3]>,
    /// Lumped vertex masses.
    pub m: Vec<f64>,
    /// ADMM local variable, one 3-row block per energy.
    pub z: Vec<[f64; 3]>,
    /// ADMM scaled dual variable. Accumulates the running residual `Dx - z`
    /// and is reset only at the start of a timestep's ADMM sequence.
    pub u: Vec<[f64; 3]>,
    /// Inertial target `M (x + dt v) + dt² M g`.
    pub(crate) m_xbar: Vec<[f64; 3]>,
    /// Current `D x`.
    pub(crate) dx: Vec<[f64; 3]>,
    /// Global-step right-hand side `M x̄ + D'W²(z - u)`.
    pub(crate) b: Vec<[f64; 3]>,
}

impl SolverState {
    /// Allocates state for `x_rest` and a reduction operator with `rows` rows.
    pub(crate) fn new(x_rest: &[[f64; 3]], tets: &[[usize; 4]], m: Vec<f64>, rows: usize) -> Self {
        let n = x_rest.len();
        SolverState {
            tets: tets.to_vec(),
            x: x_rest.to_vec(),
            v: vec![[0.0; 3]; n],
            x_start: x_rest.to_vec(),
            m,
            z: vec![[0.0; 3]; rows],
            u: vec![[0.0; 3]; rows],
            m_xbar: vec![[0.0; 3]; n],
            dx: vec![[0.0; 3]; rows],
            b: vec![[0.0; 3]; n],
        }
    }

    pub fn num_verts(&self) -> usize {
        self.x.len()
    }
}
