use super::{LinearSolve, SolveResult, Status};
use crate::system::{self, GlobalSystem};
use crate::Options;

/// Implementation of the preconditioned Conjugate Gradient algorithm for
/// symmetric positive (semi-)definite systems.
///
/// Solves `Ax = b` with a diagonal (Jacobi) preconditioner. On failure to
/// converge within the iteration cap the best iterate found is returned; the
/// outer ADMM loop compensates for residual inner-solve error.
#[allow(non_snake_case)]
pub struct ConjugateGradient {
    pub max_iter: u32,
    pub tol: f64,
    r: na::DVector<f64>,
    z: na::DVector<f64>,
    p: na::DVector<f64>,
    Ap: na::DVector<f64>,
    xcol: Vec<f64>,
    bcol: Vec<f64>,
    diag: Vec<f64>,
}

impl ConjugateGradient {
    #[inline]
    pub fn new(size: usize, max_iter: u32, tol: f64) -> Self {
        ConjugateGradient {
            max_iter: u32::MAX.min(max_iter),
            tol: f64::EPSILON.max(tol),
            r: na::DVector::zeros(size),
            z: na::DVector::zeros(size),
            p: na::DVector::zeros(size),
            Ap: na::DVector::zeros(size),
            xcol: vec![0.0; size],
            bcol: vec![0.0; size],
            diag: vec![0.0; size],
        }
    }

    pub(crate) fn from_options(size: usize, options: &Options) -> Self {
        Self::new(size, options.max_cg_iters, options.min_res)
    }

    fn resize(&mut self, size: usize) {
        self.r = na::DVector::zeros(size);
        self.z = na::DVector::zeros(size);
        self.p = na::DVector::zeros(size);
        self.Ap = na::DVector::zeros(size);
        self.xcol.resize(size, 0.0);
        self.bcol.resize(size, 0.0);
        self.diag.resize(size, 0.0);
    }

    /// Solves `Ax = b` where the product `Ax` is provided by the function
    /// `matvec` and `precond` holds the inverse diagonal preconditioner.
    #[allow(non_snake_case)]
    pub fn solve_kernel<F>(
        &mut self,
        mut matvec: F,
        x: &mut [f64],
        b: &[f64],
        precond: &[f64],
    ) -> SolveResult
    where
        F: FnMut(&[f64], &mut [f64]),
    {
        let ConjugateGradient {
            max_iter,
            tol,
            ref mut r,
            ref mut z,
            ref mut p,
            ref mut Ap,
            ..
        } = *self;

        debug_assert_eq!(b.len(), x.len());
        debug_assert_eq!(p.len(), x.len());

        let b_norm_sq: f64 = b.iter().map(|v| v * v).sum();

        // Return if b is zero --- the solution is trivial.
        if b_norm_sq == 0.0 {
            x.iter_mut().for_each(|v| *v = 0.0);
            return SolveResult {
                iterations: 0,
                residual: 0.0,
                error: 0.0,
                status: Status::Success,
            };
        }

        let tol_sq = b_norm_sq * tol * tol;

        // r = b - A*x0
        matvec(x, r.as_mut_slice());
        for (ri, bi) in r.iter_mut().zip(b.iter()) {
            *ri = bi - *ri;
        }

        // z = M⁻¹ r; p = z
        for ((zi, ri), mi) in z.iter_mut().zip(r.iter()).zip(precond.iter()) {
            *zi = ri * mi;
        }
        p.copy_from(z);

        let mut rz = r.dot(z);

        let mut iterations = 0;
        loop {
            let r_norm_sq = r.norm_squared();
            log::trace!("r norm sq ratio: {:?}", r_norm_sq / b_norm_sq);
            if !r_norm_sq.is_finite() {
                break SolveResult {
                    iterations,
                    residual: f64::NAN,
                    error: f64::NAN,
                    status: Status::NanDetected,
                };
            }
            if r_norm_sq <= tol_sq {
                let residual = r_norm_sq.sqrt();
                break SolveResult {
                    iterations,
                    residual,
                    error: residual / b_norm_sq.sqrt(),
                    status: Status::Success,
                };
            } else if iterations >= max_iter {
                let residual = r_norm_sq.sqrt();
                break SolveResult {
                    iterations,
                    residual,
                    error: residual / b_norm_sq.sqrt(),
                    status: Status::MaximumIterationsExceeded,
                };
            }

            matvec(p.as_slice(), Ap.as_mut_slice());

            let pAp = p.dot(Ap);
            log::trace!("pAp = {:?}", pAp);
            if pAp <= 0.0 {
                // The operator is singular along the search direction; keep
                // the best iterate found so far.
                let residual = r_norm_sq.sqrt();
                break SolveResult {
                    iterations,
                    residual,
                    error: residual / b_norm_sq.sqrt(),
                    status: Status::SingularMatrix,
                };
            }

            // α = r'z / p'Ap
            let alpha = rz / pAp;

            // x = x + αp; r = r - αAp
            for (xi, pi) in x.iter_mut().zip(p.iter()) {
                *xi += alpha * pi;
            }
            r.axpy(-alpha, Ap, 1.0);

            // z = M⁻¹ r
            for ((zi, ri), mi) in z.iter_mut().zip(r.iter()).zip(precond.iter()) {
                *zi = ri * mi;
            }

            // β = r'z_new / r'z
            let rz_new = r.dot(z);
            let beta = rz_new / rz;
            rz = rz_new;
            log::trace!("alpha = {:?}, beta = {:?}", alpha, beta);

            // p = z + βp
            p.axpy(1.0, z, beta);

            iterations += 1;
        }
    }
}

impl LinearSolve for ConjugateGradient {
    fn reset(&mut self, sys: &GlobalSystem) {
        self.resize(sys.a.rows());
    }

    fn solve(&mut self, sys: &GlobalSystem, b: &[[f64; 3]], x: &mut [[f64; 3]]) -> SolveResult {
        let mut result = SolveResult::default();
        for axis in 0..3 {
            let op = sys.axis_operator(axis);

            for (i, d) in self.diag.iter_mut().enumerate() {
                let aii = op.get(i, i).copied().unwrap_or(0.0);
                *d = if aii > 0.0 { 1.0 / aii } else { 1.0 };
            }
            for i in 0..b.len() {
                self.bcol[i] = b[i][axis] + sys.ktl[i][axis];
                self.xcol[i] = x[i][axis];
            }

            let mut xcol = std::mem::take(&mut self.xcol);
            let bcol = std::mem::take(&mut self.bcol);
            let diag = std::mem::take(&mut self.diag);
            let axis_result = self.solve_kernel(
                |v, out| system::mul_axis(op, v, out),
                &mut xcol,
                &bcol,
                &diag,
            );
            for (xi, &s) in x.iter_mut().zip(xcol.iter()) {
                xi[axis] = s;
            }
            self.xcol = xcol;
            self.bcol = bcol;
            self.diag = diag;

            result = result.merge(axis_result);
        }
        result
    }
}
