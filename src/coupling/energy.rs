//! Sensible enthalpy transport with the kinetic-energy correction.

use super::controls::SolutionControls;
use super::pimple::PimpleControl;
use crate::FvError;
use crate::discretization::field::{SurfaceField, TimeLevels, VolField};
use crate::discretization::mesh::Mesh;
use crate::numerics::solver::SolverPerformance;
use crate::parallel::Communicator;
use crate::physics::schemes::DdtScheme;
use crate::physics::{ThermoModel, fvc, fvm};
use glam::DVec3;

pub struct EnergyEquation {
    pub h: TimeLevels<VolField<f64>>,
    pub rho: TimeLevels<Vec<f64>>,
    pub temperature: Vec<f64>,
    /// Thermodynamic pressure for the equation of state.
    pub p0: f64,
    thermo: Box<dyn ThermoModel>,
}

impl EnergyEquation {
    pub fn new(h: VolField<f64>, thermo: Box<dyn ThermoModel>, p0: f64) -> Self {
        let temperature: Vec<f64> = h.internal.iter().map(|&v| thermo.temperature(v)).collect();
        let rho = temperature.iter().map(|&t| thermo.rho(p0, t)).collect();
        Self {
            h: TimeLevels::new(h),
            rho: TimeLevels::new(rho),
            temperature,
            p0,
            thermo,
        }
    }

    pub fn store_old(&mut self) {
        self.h.store_old();
        self.rho.store_old();
    }

    /// `ddt(rho, h) + div(rhoPhi, h) - laplacian(rho alpha, h) == -(ddt(rho, K) + div(rhoPhi, K))`,
    /// then temperature and density from the thermo model.
    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &mut self,
        mesh: &Mesh,
        phi: &SurfaceField<f64>,
        u: &TimeLevels<VolField<DVec3>>,
        controls: &SolutionControls,
        pimple: &PimpleControl,
        time: f64,
        dt: f64,
        comm: &dyn Communicator,
    ) -> Result<SolverPerformance, FvError> {
        let schemes = &controls.schemes;
        let rho_f = fvc::interpolate_cells(mesh, "rho", self.rho.current.clone(), comm)?;
        let rho_phi = SurfaceField {
            name: "rhoPhi".to_string(),
            values: rho_f.values.iter().zip(&phi.values).map(|(r, f)| r * f).collect(),
        };
        let alpha = self.thermo.alpha_eff();
        let gamma = SurfaceField {
            name: "alphaEff".to_string(),
            values: rho_f.values.iter().map(|r| r * alpha).collect(),
        };

        self.h.current.update_coeffs(mesh, Some(phi), time, None)?;

        let ke_div = fvc::kinetic_energy_div(mesh, &rho_phi, &u.current);
        let mut su: Vec<f64> = ke_div.iter().map(|d| -d).collect();
        if schemes.ddt == DdtScheme::Euler {
            for (c, s) in su.iter_mut().enumerate() {
                let k = 0.5 * u.current.internal[c].length_squared();
                let k_old = 0.5 * u.old.internal[c].length_squared();
                *s -= (self.rho.current[c] * k - self.rho.old[c] * k_old) / dt;
            }
        }

        let settings = controls.solver_settings("h", pimple.final_iter())?;
        let mut eqn = fvm::ddt_weighted(mesh, &self.rho, &self.h, dt, schemes.ddt)
            .add(&fvm::div(mesh, &rho_phi, &self.h.current, schemes.div_h))?
            .subtract(&fvm::laplacian(mesh, &gamma, &self.h.current, schemes.non_orthogonal_correction))?
            .equate(mesh, &su)?;
        eqn.relax(mesh, &self.h.current, pimple.relaxation(settings.relaxation));
        let perf = eqn.solve(mesh, &mut self.h.current, &settings, comm)?;

        for ((t, rho), &h) in self
            .temperature
            .iter_mut()
            .zip(self.rho.current.iter_mut())
            .zip(&self.h.current.internal)
        {
            *t = self.thermo.temperature(h);
            *rho = self.thermo.rho(self.p0, *t);
        }
        log::debug!(
            "T min/max = {:.4e}/{:.4e}",
            self.temperature.iter().copied().fold(f64::INFINITY, f64::min),
            self.temperature.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        );
        Ok(perf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{BoxSpec, create_box_mesh};
    use crate::models::perfect_gas::PerfectGas;
    use crate::numerics::solver::FieldSolverSettings;
    use crate::parallel::NoComm;
    use crate::physics::bc::BoundarySpec;
    use std::collections::HashMap;

    #[test]
    fn steady_conduction_gives_linear_enthalpy() {
        let mesh = create_box_mesh(&BoxSpec::line(4, 1.0)).unwrap();
        let gas = PerfectGas::air();
        let (h_left, h_right) = (gas.cp * 300.0, gas.cp * 400.0);
        let specs = HashMap::from([
            ("left".to_string(), BoundarySpec::FixedValue(h_left)),
            ("right".to_string(), BoundarySpec::FixedValue(h_right)),
            ("sides".to_string(), BoundarySpec::ZeroGradient),
        ]);
        let h = VolField::new("h", &mesh, h_left, &specs).unwrap();
        let mut energy = EnergyEquation::new(h, Box::new(gas), 1e5);

        let mut controls = SolutionControls::default();
        controls.schemes.ddt = DdtScheme::SteadyState;
        controls.solvers.insert(
            "h".to_string(),
            FieldSolverSettings {
                tolerance: 1e-12,
                ..FieldSolverSettings::default()
            },
        );
        let mut pimple = PimpleControl::new(controls.pimple.clone());
        assert!(pimple.loop_outer(&NoComm));

        let phi = SurfaceField::new("phi", &mesh, 0.0);
        let u = TimeLevels::new(VolField::calculated("U", &mesh, vec![DVec3::ZERO; 4], &NoComm).unwrap());
        energy.solve(&mesh, &phi, &u, &controls, &pimple, 0.0, 1.0, &NoComm).unwrap();

        for (cell, &t) in mesh.cells.iter().zip(&energy.temperature) {
            assert!((t - (300.0 + 100.0 * cell.centroid.x)).abs() < 1e-6);
        }
        assert!(energy.rho.current[0] > energy.rho.current[3]);
    }
}
