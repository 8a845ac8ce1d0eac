use crate::FvError;
use crate::coupling::{IncompressibleSolver, StepReport};
use crate::discretization::mesh::Mesh;
use crate::parallel::Communicator;
use crate::physics::fvc;

const SMALL: f64 = 1e-15;

pub struct TimeLoop {
    pub t_start: f64,
    pub t_end: f64,
    pub dt: f64,
    /// Adjust `dt` to keep the maximum cell Courant number below this.
    pub max_courant: Option<f64>,
    pub max_dt: f64,
}

impl Default for TimeLoop {
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_end: 1.0,
            dt: 1e-3,
            max_courant: None,
            max_dt: f64::MAX,
        }
    }
}

impl TimeLoop {
    /// Next step size from the current maximum Courant number. Growth is
    /// damped and capped at 20% per step; reduction is immediate.
    pub fn adjusted_dt(&self, dt: f64, courant: f64) -> f64 {
        match self.max_courant {
            Some(max_co) => {
                let max_delta_fact = max_co / (courant + SMALL);
                let fact = max_delta_fact.min(1.0 + 0.1 * max_delta_fact).min(1.2);
                (fact * dt).min(self.max_dt)
            }
            None => dt,
        }
    }

    /// Step `solver` from `t_start` to `t_end`. The last step is shortened to
    /// land on `t_end`. Collective.
    pub fn run(
        &self,
        solver: &mut IncompressibleSolver,
        mesh: &Mesh,
        comm: &dyn Communicator,
        mut callback: impl FnMut(usize, &IncompressibleSolver, &StepReport),
    ) -> Result<Vec<StepReport>, FvError> {
        solver.time = self.t_start;
        let mut dt = self.dt.min(self.max_dt);
        let mut reports = Vec::new();

        if comm.is_master() {
            log::info!("Starting Transient Simulation: T={:.2} -> {:.2}", self.t_start, self.t_end);
        }

        let mut step = 0;
        while solver.time < self.t_end - SMALL * self.t_end.abs().max(1.0) {
            step += 1;
            if self.max_courant.is_some() {
                let (_, co_max) = fvc::courant_number(mesh, &solver.phi.current, dt, comm);
                dt = self.adjusted_dt(dt, co_max);
            }
            let dt_step = dt.min(self.t_end - solver.time);

            let report = match solver.step(mesh, comm, dt_step) {
                Ok(report) => report,
                Err(e) => {
                    if comm.is_master() {
                        log::error!(
                            "Step {:>4} | t = {:.4e} | dt = {:.3e} | FAILED: {}",
                            step,
                            solver.time,
                            dt_step,
                            e
                        );
                    }
                    return Err(e);
                }
            };

            let (co_mean, co_max) = fvc::courant_number(mesh, &solver.phi.current, dt_step, comm);
            if comm.is_master() {
                log::info!(
                    "Step {:>4} | t = {:.4e} | dt = {:.3e} | Co = {:.3}/{:.3} | outer = {} | continuity = {:.3e}",
                    step,
                    report.time,
                    dt_step,
                    co_mean,
                    co_max,
                    report.outer_iterations,
                    report.continuity.last().map(|c| c.local).unwrap_or(0.0)
                );
            }

            callback(step, solver, &report);
            reports.push(report);
        }
        Ok(reports)
    }
}
