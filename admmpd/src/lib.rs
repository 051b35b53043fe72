//! A soft-body solver based on ADMM projective dynamics.
//!
//! One timestep alternates a local, per-element elastic projection with a
//! shared global linear solve over a constant system matrix, coupled through
//! scaled dual variables. Hard pin constraints are folded into the global
//! solve through per-axis augmented operators handled by an iterative inner
//! solver.

mod constraint;
mod energy;
pub mod linsolve;
mod mesh;
mod options;
pub mod sampling;
mod solver;
mod state;
mod system;

// TODO: This should be feature gated. Unfortunately this makes it tedious to
// run tests without passing the feature explicitly via the `--features` flag.
pub mod test_utils;

pub use self::constraint::*;
pub use self::mesh::*;
pub use self::options::*;
pub use self::solver::*;
pub use self::state::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Size mismatch error")]
    SizeMismatch,
    #[error("Invalid parameter: {name:?}")]
    InvalidParameter { name: String },
    #[error("Degenerate rest element detected: {:?}", .degens[0])]
    DegenerateRestElement { degens: Vec<usize> },
    #[error("Element {element} references vertex {vertex} out of bounds")]
    ElementOutOfBounds { element: usize, vertex: usize },
    #[error("Embedded point {point} references tetrahedron {tet} out of bounds")]
    EmbeddingOutOfBounds { point: usize, tet: usize },
    #[error("Embedded point {point} has invalid barycentric weights")]
    InvalidBarycentricWeights { point: usize },
    #[error("Pin constraint references vertex {vertex} out of bounds")]
    ConstraintOutOfBounds { vertex: usize },
    #[error("Vertex {vertex} belongs to no element and carries no mass")]
    ZeroMassVertex { vertex: usize },
    #[error("Global system factorization failed: the system matrix is not positive definite")]
    FactorizationFailed,
}

pub(crate) fn inf_norm<I>(iter: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    iter.into_iter()
        .map(|x| x.abs())
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Less))
        .unwrap_or(0.0)
}
