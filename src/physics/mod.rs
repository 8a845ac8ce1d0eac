pub mod bc;
pub mod fvc;
pub mod fvm;
pub mod schemes;

use crate::discretization::field::{SurfaceField, VolField};
use crate::discretization::mesh::Mesh;
use glam::DVec3;

/// Momentum diffusivity supplied by a viscosity or turbulence closure.
pub trait TransportModel {
    /// Effective kinematic viscosity per cell.
    fn nu_eff(&self, mesh: &Mesh) -> Vec<f64>;

    /// Update internal state after each outer iteration.
    fn correct(&mut self, _mesh: &Mesh, _u: &VolField<DVec3>, _phi: &SurfaceField<f64>) {}
}

/// Equation of state and caloric relations for the energy equation.
pub trait ThermoModel {
    /// Density from pressure and temperature.
    fn rho(&self, p: f64, t: f64) -> f64;
    /// Compressibility `d rho / d p`.
    fn psi(&self, p: f64, t: f64) -> f64;
    /// Compressibility factor.
    fn z(&self, _p: f64, _t: f64) -> f64 {
        1.0
    }
    fn cp(&self) -> f64;
    fn cp_m_cv(&self) -> f64;
    /// Kinematic thermal diffusivity `kappa / (rho cp)`.
    fn alpha_eff(&self) -> f64;
    /// Temperature from specific sensible enthalpy.
    fn temperature(&self, h: f64) -> f64 {
        h / self.cp()
    }
    fn enthalpy(&self, t: f64) -> f64 {
        t * self.cp()
    }
}

/// A rigidly rotating reference frame.
pub trait FrameModel {
    /// Angular velocity vector.
    fn omega(&self) -> DVec3;
    fn axis(&self) -> DVec3 {
        self.omega().normalize_or_zero()
    }
    /// Velocity of the frame itself at position `x`.
    fn velocity(&self, x: DVec3) -> DVec3;
}
