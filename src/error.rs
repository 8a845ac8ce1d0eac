use crate::coupling::CouplingError;
use crate::coupling::controls::ConfigError;
use crate::discretization::mesh::MeshError;
use crate::numerics::matrix::AssemblyError;
use crate::numerics::solver::SolverError;
use crate::parallel::CommError;
use crate::physics::bc::BoundaryError;
use thiserror::Error;

/// Any fatal failure of a run.
#[derive(Debug, Error)]
pub enum FvError {
    #[error("mesh: {0}")]
    Mesh(#[from] MeshError),
    #[error("boundary condition: {0}")]
    Boundary(#[from] BoundaryError),
    #[error("assembly: {0}")]
    Assembly(#[from] AssemblyError),
    #[error("linear solve: {0}")]
    Solver(#[from] SolverError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("communication: {0}")]
    Comm(#[from] CommError),
    #[error("pressure-velocity coupling: {0}")]
    Coupling(#[from] CouplingError),
}
