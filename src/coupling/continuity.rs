use crate::discretization::field::SurfaceField;
use crate::discretization::mesh::Mesh;
use crate::parallel::Communicator;
use crate::physics::fvc;

/// Time-step continuity errors of a corrected flux.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContinuityErrors {
    /// `dt <|div phi|>`
    pub local: f64,
    /// `dt <div phi>`
    pub global: f64,
    /// Running sum of `global` over the run.
    pub cumulative: f64,
}

impl ContinuityErrors {
    /// Evaluate for `phi` and add to the cumulative error. Collective.
    pub fn update(&mut self, mesh: &Mesh, phi: &SurfaceField<f64>, dt: f64, comm: &dyn Communicator) -> Self {
        let div = fvc::div_flux(mesh, phi);
        let mag: Vec<f64> = div.iter().map(|d| d.abs()).collect();

        self.local = dt * fvc::weighted_average(mesh, &mag, comm);
        self.global = dt * fvc::weighted_average(mesh, &div, comm);
        self.cumulative += self.global;

        if comm.is_master() {
            log::info!(
                "time step continuity errors : sum local = {:.6e}, global = {:.6e}, cumulative = {:.6e}",
                self.local,
                self.global,
                self.cumulative
            );
        }
        *self
    }
}
