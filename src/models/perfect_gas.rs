use crate::physics::ThermoModel;

/// Ideal gas with constant heat capacity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerfectGas {
    pub r: f64,     // Specific gas constant [J/(kg K)]
    pub cp: f64,    // Heat capacity at constant pressure [J/(kg K)]
    pub alpha: f64, // Thermal diffusivity [m^2/s]
}

impl PerfectGas {
    /// Dry air near room temperature.
    pub fn air() -> Self {
        Self {
            r: 287.0,
            cp: 1005.0,
            alpha: 2.2e-5,
        }
    }
}

impl ThermoModel for PerfectGas {
    fn rho(&self, p: f64, t: f64) -> f64 {
        p * self.psi(p, t)
    }

    fn psi(&self, _p: f64, t: f64) -> f64 {
        1.0 / (self.r * t)
    }

    fn cp(&self) -> f64 {
        self.cp
    }

    fn cp_m_cv(&self) -> f64 {
        self.r
    }

    fn alpha_eff(&self) -> f64 {
        self.alpha
    }
}
