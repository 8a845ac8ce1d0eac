use super::controls::PimpleSettings;
use crate::parallel::{Communicator, ReduceOp};
use std::collections::HashMap;

/// Where the coupling loop currently is within an outer iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CouplingState {
    AssemblingMomentum,
    PredictingVelocity,
    NonOrthogonalCorrection { pass: usize },
    FinalCorrection,
    Converged,
}

/// Outer (PIMPLE), pressure-corrector (PISO) and non-orthogonal loop counters.
///
/// Typical use:
/// `while control.loop_outer(comm) { ... while control.correct() { ... while control.correct_non_orthogonal() { ... } } }`
#[derive(Clone, Debug)]
pub struct PimpleControl {
    settings: PimpleSettings,
    corr: usize,
    corr_piso: usize,
    corr_non_ortho: usize,
    final_iter: bool,
    converged: bool,
    /// First initial residual of each field in the current outer iteration.
    first_residuals: HashMap<String, f64>,
    state: CouplingState,
}

impl PimpleControl {
    pub fn new(settings: PimpleSettings) -> Self {
        Self {
            settings,
            corr: 0,
            corr_piso: 0,
            corr_non_ortho: 0,
            final_iter: false,
            converged: false,
            first_residuals: HashMap::new(),
            state: CouplingState::Converged,
        }
    }

    pub fn settings(&self) -> &PimpleSettings {
        &self.settings
    }

    /// Advance to the next outer iteration. Returns false after the final
    /// one and resets for the next time step.
    pub fn loop_outer(&mut self, comm: &dyn Communicator) -> bool {
        if self.final_iter {
            self.corr = 0;
            self.final_iter = false;
            self.converged = false;
            self.first_residuals.clear();
            self.state = CouplingState::Converged;
            return false;
        }

        if self.corr > 0 && self.criteria_satisfied(comm) {
            log::info!("PIMPLE: converged in {} iterations", self.corr);
            self.converged = true;
        }

        self.corr += 1;
        self.final_iter = self.converged || self.corr >= self.settings.n_outer_correctors;
        self.first_residuals.clear();
        self.state = CouplingState::AssemblingMomentum;
        if self.settings.n_outer_correctors > 1 {
            log::info!("PIMPLE: iteration {}{}", self.corr, if self.final_iter { " (final)" } else { "" });
        }
        true
    }

    /// Every controlled field that was solved is below its tolerance on all ranks.
    fn criteria_satisfied(&self, comm: &dyn Communicator) -> bool {
        let control = &self.settings.residual_control;
        let mut checked = false;
        let mut satisfied = true;
        for (field, &tol) in control {
            if let Some(&r) = self.first_residuals.get(field) {
                checked = true;
                satisfied &= r < tol;
            }
        }
        let local = if checked && satisfied { 1.0 } else { 0.0 };
        comm.reduce(local, ReduceOp::Min) > 0.5
    }

    /// Advance the pressure-corrector counter.
    pub fn correct(&mut self) -> bool {
        self.corr_piso += 1;
        if self.corr_piso <= self.settings.n_correctors {
            true
        } else {
            self.corr_piso = 0;
            false
        }
    }

    /// Advance the non-orthogonal pass counter; `n_non_orthogonal_correctors + 1` passes.
    pub fn correct_non_orthogonal(&mut self) -> bool {
        self.corr_non_ortho += 1;
        if self.corr_non_ortho <= self.settings.n_non_orthogonal_correctors + 1 {
            self.state = if self.final_non_orthogonal_iter() {
                CouplingState::FinalCorrection
            } else {
                CouplingState::NonOrthogonalCorrection {
                    pass: self.corr_non_ortho,
                }
            };
            true
        } else {
            self.corr_non_ortho = 0;
            false
        }
    }

    pub fn corr(&self) -> usize {
        self.corr
    }

    pub fn final_iter(&self) -> bool {
        self.final_iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn final_non_orthogonal_iter(&self) -> bool {
        self.corr_non_ortho == self.settings.n_non_orthogonal_correctors + 1
    }

    /// Last non-orthogonal pass of the last corrector of the final outer iteration.
    pub fn final_inner_iter(&self) -> bool {
        self.final_iter && self.corr_piso == self.settings.n_correctors && self.final_non_orthogonal_iter()
    }

    pub fn state(&self) -> CouplingState {
        self.state
    }

    pub fn enter(&mut self, state: CouplingState) {
        self.state = state;
    }

    /// Keep the first initial residual reported for `field` this iteration.
    pub fn record_residual(&mut self, field: &str, initial: f64) {
        self.first_residuals.entry(field.to_string()).or_insert(initial);
    }

    /// Relaxation factor to apply; unrelaxed on the final iteration.
    pub fn relaxation(&self, factor: f64) -> f64 {
        if self.final_iter { 1.0 } else { factor }
    }
}
