use crate::discretization::mesh::Mesh;
use crate::physics::TransportModel;

/// Constant kinematic viscosity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Newtonian {
    pub nu: f64,
}

impl Newtonian {
    pub fn new(nu: f64) -> Self {
        Self { nu }
    }
}

impl TransportModel for Newtonian {
    fn nu_eff(&self, mesh: &Mesh) -> Vec<f64> {
        vec![self.nu; mesh.n_cells()]
    }
}
