use crate::discretization::field::{FieldValue, VolField};
use crate::discretization::mesh::Mesh;
use crate::numerics::Tolerance;
use crate::numerics::matrix::FvMatrix;
use crate::numerics::sparse::{CsrMatrix, KrylovControl, KrylovResult, KrylovStatus, bicgstab, pcg};
use crate::numerics::timing::record_linear_solve;
use crate::parallel::{Communicator, ReduceOp};
use crate::physics::bc::BoundaryError;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Guards the residual normalisation against an all-zero system.
const SMALL: f64 = 1e-20;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solution for '{field}' contains non-finite values")]
    NonFinite { field: String },
    #[error("equation for '{field}' has {rows} rows but the field has {cells} cells")]
    SizeMismatch {
        field: String,
        rows: usize,
        cells: usize,
    },
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    /// Conjugate gradients when the matrix is symmetric, BiCGStab otherwise.
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "PCG")]
    Pcg,
    #[serde(rename = "PBiCGStab")]
    PBiCGStab,
}

fn default_solver() -> SolverKind {
    SolverKind::Auto
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_max_iter() -> usize {
    1000
}

fn default_relaxation() -> f64 {
    1.0
}

/// Linear solver controls for one field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSolverSettings {
    #[serde(default = "default_solver")]
    pub solver: SolverKind,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default, rename = "relTol")]
    pub rel_tol: f64,
    #[serde(default = "default_max_iter", rename = "maxIter")]
    pub max_iter: usize,
    /// Under-relaxation factor, 1 for none.
    #[serde(default = "default_relaxation")]
    pub relaxation: f64,
}

impl Default for FieldSolverSettings {
    fn default() -> Self {
        Self {
            solver: default_solver(),
            tolerance: default_tolerance(),
            rel_tol: 0.0,
            max_iter: default_max_iter(),
            relaxation: default_relaxation(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SolverPerformance {
    pub solver: SolverKind,
    pub field: String,
    /// Largest component residual before the solve.
    pub initial_residual: f64,
    pub final_residual: f64,
    pub iterations: usize,
    pub converged: bool,
}

const COMPONENT_NAMES: [&str; 3] = ["x", "y", "z"];

impl<T: FieldValue> FvMatrix<T> {
    /// Solve for `psi` component by component, then correct its boundaries.
    ///
    /// Not reaching the tolerance is reported, not fatal.
    pub fn solve(
        &self,
        mesh: &Mesh,
        psi: &mut VolField<T>,
        settings: &FieldSolverSettings,
        comm: &dyn Communicator,
    ) -> Result<SolverPerformance, SolverError> {
        let n = self.n_rows();
        if psi.n_cells() != n {
            return Err(SolverError::SizeMismatch {
                field: self.field().to_string(),
                rows: n,
                cells: psi.n_cells(),
            });
        }

        let kind = match settings.solver {
            SolverKind::Auto if self.is_symmetric() => SolverKind::Pcg,
            SolverKind::Auto => SolverKind::PBiCGStab,
            SolverKind::Pcg if !self.is_symmetric() => {
                log::warn!("PCG requested for asymmetric '{}'; using PBiCGStab", self.field());
                SolverKind::PBiCGStab
            }
            kind => kind,
        };

        let a = CsrMatrix::from_ldu(mesh, &self.full_diag(mesh), &self.lower, &self.upper);
        let source = self.full_source(mesh);
        let row_sums = a.row_sums();

        let mut perf = SolverPerformance {
            solver: kind,
            field: self.field().to_string(),
            initial_residual: 0.0,
            final_residual: 0.0,
            iterations: 0,
            converged: true,
        };

        for cmpt in 0..T::N_COMPONENTS {
            let b = DVector::from_iterator(n, source.iter().map(|s| s.component(cmpt)));
            let mut x = DVector::from_iterator(n, psi.internal.iter().map(|v| v.component(cmpt)));

            let norm_factor = normalisation(&a, &row_sums, &b, &x, comm);
            let initial = global_residual(&a, &b, &x, norm_factor, comm);

            // Both branches are decided on globally reduced values, so every
            // rank takes the same one.
            let solve_needed = initial >= settings.tolerance && settings.max_iter > 0;
            let mut result = if !solve_needed {
                KrylovResult {
                    status: KrylovStatus::Converged,
                    iterations: 0,
                    initial_residual: initial,
                    final_residual: initial,
                }
            } else {
                let control = KrylovControl {
                    tolerance: Tolerance::Combined(settings.tolerance, settings.rel_tol),
                    max_iter: settings.max_iter,
                    norm_factor: local_norm_factor(norm_factor, comm),
                };
                record_linear_solve(self.field(), || match kind {
                    SolverKind::Pcg => pcg(&a, &b, &mut x, &control),
                    _ => bicgstab(&a, &b, &mut x, &control),
                })
            };

            if x.iter().any(|v| !v.is_finite()) {
                return Err(SolverError::NonFinite {
                    field: self.field().to_string(),
                });
            }
            // A partition whose block already meets its share of the tolerance
            // returns without iterating; the reductions still run on every rank.
            let mut all_converged = result.status == KrylovStatus::Converged;
            let final_residual = if solve_needed {
                result.iterations = comm.reduce(result.iterations as f64, ReduceOp::Max) as usize;
                let flag = if all_converged { 1.0 } else { 0.0 };
                all_converged = comm.reduce(flag, ReduceOp::Min) > 0.5;
                global_residual(&a, &b, &x, norm_factor, comm)
            } else {
                initial
            };
            let converged = final_residual < settings.tolerance
                || (settings.rel_tol > 0.0 && final_residual < settings.rel_tol * initial)
                || all_converged;

            let label = if T::N_COMPONENTS > 1 {
                format!("{}{}", self.field(), COMPONENT_NAMES[cmpt])
            } else {
                self.field().to_string()
            };
            if comm.is_master() {
                log::info!(
                    "{kind:?}:  Solving for {label}, Initial residual = {initial:.6e}, Final residual = {final_residual:.6e}, No Iterations {}",
                    result.iterations
                );
            }
            if !converged {
                log::warn!(
                    "{label}: linear solver stopped ({:?}) at residual {final_residual:.3e} after {} iterations",
                    result.status,
                    result.iterations
                );
            }

            for (v, &xi) in psi.internal.iter_mut().zip(x.iter()) {
                v.set_component(cmpt, xi);
            }

            perf.initial_residual = perf.initial_residual.max(initial);
            perf.final_residual = perf.final_residual.max(final_residual);
            perf.iterations = perf.iterations.max(result.iterations);
            perf.converged &= converged;
        }

        psi.correct_boundary_conditions(mesh, comm)?;
        Ok(perf)
    }
}

/// `sum(|A x - A x̄| + |b - A x̄|)` over all partitions, with `x̄` the global mean.
fn normalisation(
    a: &CsrMatrix,
    row_sums: &DVector<f64>,
    b: &DVector<f64>,
    x: &DVector<f64>,
    comm: &dyn Communicator,
) -> f64 {
    let count = comm.reduce(x.len() as f64, ReduceOp::Sum);
    let x_ref = comm.reduce(x.sum(), ReduceOp::Sum) / count.max(1.0);

    let mut ax = DVector::zeros(x.len());
    a.mul_vec(x, &mut ax);
    let local: f64 = (0..x.len())
        .map(|i| {
            let pa = row_sums[i] * x_ref;
            (ax[i] - pa).abs() + (b[i] - pa).abs()
        })
        .sum();
    comm.reduce(local, ReduceOp::Sum) + SMALL
}

fn global_residual(
    a: &CsrMatrix,
    b: &DVector<f64>,
    x: &DVector<f64>,
    norm_factor: f64,
    comm: &dyn Communicator,
) -> f64 {
    let mut ax = DVector::zeros(x.len());
    a.mul_vec(x, &mut ax);
    let local = (b - ax).lp_norm(1);
    comm.reduce(local, ReduceOp::Sum) / norm_factor
}

/// Each partition iterates on its own block; scale the global factor to it.
fn local_norm_factor(norm_factor: f64, comm: &dyn Communicator) -> f64 {
    norm_factor / comm.size() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{BoxSpec, create_box_mesh};
    use crate::parallel::NoComm;

    #[test]
    fn settings_parse_with_defaults() {
        let s: FieldSolverSettings = serde_json::from_str(r#"{ "solver": "PCG", "relTol": 0.05 }"#).unwrap();
        assert_eq!(s.solver, SolverKind::Pcg);
        assert_eq!(s.tolerance, 1e-6);
        assert_eq!(s.rel_tol, 0.05);
        assert_eq!(s.relaxation, 1.0);
    }

    #[test]
    fn diagonal_system_solves_exactly() {
        let mesh = create_box_mesh(&BoxSpec::line(3, 3.0)).unwrap();
        let mut m = FvMatrix::<f64>::new("T", &mesh);
        m.diag = vec![2.0, 4.0, 8.0];
        m.source = vec![2.0, 4.0, 8.0];
        let mut psi = VolField::calculated("T", &mesh, vec![0.0; 3], &NoComm).unwrap();

        let perf = m.solve(&mesh, &mut psi, &FieldSolverSettings::default(), &NoComm).unwrap();
        assert!(perf.converged);
        assert_eq!(perf.solver, SolverKind::Pcg);
        for v in &psi.internal {
            assert!((v - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn non_finite_solution_is_an_error() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        let mut m = FvMatrix::<f64>::new("T", &mesh);
        m.diag = vec![1.0, 1.0];
        m.source = vec![f64::NAN, 0.0];
        let mut psi = VolField::calculated("T", &mesh, vec![0.0; 2], &NoComm).unwrap();
        let err = m
            .solve(&mesh, &mut psi, &FieldSolverSettings::default(), &NoComm)
            .unwrap_err();
        assert!(matches!(err, SolverError::NonFinite { .. }));
    }
}
