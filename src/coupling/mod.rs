//! Segregated pressure-velocity coupling.
//!
//! One call to [`IncompressibleSolver::step`] advances the flow by one time
//! step: an outer PIMPLE loop reassembles momentum, each pressure corrector
//! solves the continuity equation and corrects fluxes and velocities.

pub mod continuity;
pub mod controls;
pub mod energy;
pub mod pimple;
pub mod pressure;

use crate::FvError;
use crate::discretization::field::{SurfaceField, TimeLevels, VolField};
use crate::discretization::mesh::Mesh;
use crate::numerics::matrix::FvMatrix;
use crate::numerics::solver::SolverPerformance;
use crate::parallel::Communicator;
use crate::physics::bc::BoundaryError;
use crate::physics::schemes::DdtScheme;
use crate::physics::{FrameModel, TransportModel, fvc, fvm};
use continuity::ContinuityErrors;
use controls::SolutionControls;
use energy::EnergyEquation;
use glam::DVec3;
use pimple::{CouplingState, PimpleControl};
use pressure::{PressureReference, adjust_phi, constrain_hbya};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CouplingError {
    #[error("pressure reference cell {cell} is out of range for a mesh of {n_cells} cells")]
    ReferenceCellOutOfRange { cell: usize, n_cells: usize },
    #[error("unable to set the pressure reference: {count} partitions hold a reference cell")]
    ReferenceCellNotUnique { count: usize },
    #[error(
        "continuity error cannot be removed by adjusting the outflow: inflow {mass_in:.6e}, fixed outflow {fixed_mass_out:.6e}, total flux {total_flux:.6e}"
    )]
    ContinuityImbalance {
        mass_in: f64,
        fixed_mass_out: f64,
        total_flux: f64,
    },
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
}

/// What happened during one time step.
#[derive(Clone, Debug, Default)]
pub struct StepReport {
    pub time: f64,
    pub outer_iterations: usize,
    pub converged: bool,
    pub performance: Vec<SolverPerformance>,
    pub continuity: Vec<ContinuityErrors>,
}

impl StepReport {
    /// Initial residual of the first solve of `field` in the step.
    pub fn first_residual(&self, field: &str) -> Option<f64> {
        self.performance
            .iter()
            .find(|p| p.field == field)
            .map(|p| p.initial_residual)
    }
}

pub struct IncompressibleSolver {
    pub controls: SolutionControls,
    pub u: TimeLevels<VolField<DVec3>>,
    pub p: VolField<f64>,
    pub phi: TimeLevels<SurfaceField<f64>>,
    /// `p + g·C`, kept when gravity is configured.
    pub p_abs: Option<Vec<f64>>,
    pub time: f64,
    gravity: Option<DVec3>,
    transport: Box<dyn TransportModel>,
    frame: Option<Box<dyn FrameModel>>,
    energy: Option<EnergyEquation>,
    reference: PressureReference,
    continuity: ContinuityErrors,
    pimple: PimpleControl,
}

impl IncompressibleSolver {
    /// Collective: resolves the pressure reference on every rank.
    pub fn new(
        mesh: &Mesh,
        controls: SolutionControls,
        u: VolField<DVec3>,
        p: VolField<f64>,
        transport: Box<dyn TransportModel>,
        comm: &dyn Communicator,
    ) -> Result<Self, FvError> {
        controls.validate()?;
        let reference = PressureReference::resolve(mesh, &p, &controls.pimple, comm)?;
        let phi = fvc::flux(mesh, &u);
        Ok(Self {
            pimple: PimpleControl::new(controls.pimple.clone()),
            controls,
            u: TimeLevels::new(u),
            p,
            phi: TimeLevels::new(SurfaceField {
                name: "phi".to_string(),
                values: phi.values,
            }),
            p_abs: None,
            time: 0.0,
            gravity: None,
            transport,
            frame: None,
            energy: None,
            reference,
            continuity: ContinuityErrors::default(),
        })
    }

    pub fn with_frame(mut self, frame: Box<dyn FrameModel>) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_energy(mut self, energy: EnergyEquation) -> Self {
        self.energy = Some(energy);
        self
    }

    pub fn with_gravity(mut self, g: DVec3) -> Self {
        self.gravity = Some(g);
        self
    }

    pub fn reference(&self) -> &PressureReference {
        &self.reference
    }

    pub fn energy(&self) -> Option<&EnergyEquation> {
        self.energy.as_ref()
    }

    pub fn continuity_errors(&self) -> ContinuityErrors {
        self.continuity
    }

    pub fn state(&self) -> CouplingState {
        self.pimple.state()
    }

    /// Advance all fields by `dt`. Collective.
    pub fn step(&mut self, mesh: &Mesh, comm: &dyn Communicator, dt: f64) -> Result<StepReport, FvError> {
        self.time += dt;
        self.u.store_old();
        self.phi.store_old();
        if let Some(energy) = self.energy.as_mut() {
            energy.store_old();
        }

        let mut report = StepReport {
            time: self.time,
            ..StepReport::default()
        };

        while self.pimple.loop_outer(comm) {
            report.outer_iterations = self.pimple.corr();
            self.p.store_prev_iter();
            let u_eqn = self.momentum_predictor(mesh, comm, dt, &mut report)?;

            while self.pimple.correct() {
                self.pressure_corrector(mesh, comm, dt, &u_eqn, &mut report)?;
            }

            self.transport.correct(mesh, &self.u.current, &self.phi.current);

            if let Some(energy) = self.energy.as_mut() {
                let perf = energy.solve(
                    mesh,
                    &self.phi.current,
                    &self.u,
                    &self.controls,
                    &self.pimple,
                    self.time,
                    dt,
                    comm,
                )?;
                self.pimple.record_residual(&perf.field, perf.initial_residual);
                report.performance.push(perf);
            }
            report.converged = self.pimple.converged();
        }
        Ok(report)
    }

    fn momentum_predictor(
        &mut self,
        mesh: &Mesh,
        comm: &dyn Communicator,
        dt: f64,
        report: &mut StepReport,
    ) -> Result<FvMatrix<DVec3>, FvError> {
        self.pimple.enter(CouplingState::AssemblingMomentum);
        let schemes = &self.controls.schemes;
        let final_iter = self.pimple.final_iter();

        let nu_f = fvc::interpolate_cells(mesh, "nuEff", self.transport.nu_eff(mesh), comm)?;
        self.u
            .current
            .update_coeffs(mesh, Some(&self.phi.current), self.time, self.frame.as_deref())?;

        let mut u_eqn = fvm::ddt(mesh, &self.u, dt, schemes.ddt)
            .add(&fvm::div(mesh, &self.phi.current, &self.u.current, schemes.div_u))?
            .subtract(&fvm::laplacian(mesh, &nu_f, &self.u.current, schemes.non_orthogonal_correction))?;

        if let Some(frame) = self.frame.as_deref() {
            // Coriolis and centrifugal accelerations of the rotating frame.
            let omega = frame.omega();
            let su: Vec<DVec3> = mesh
                .cells
                .iter()
                .zip(&self.u.current.internal)
                .map(|(cell, &u)| -(2.0 * omega.cross(u) + omega.cross(frame.velocity(cell.centroid))))
                .collect();
            u_eqn = u_eqn.equate(mesh, &su)?;
        }

        let settings = self.controls.solver_settings("U", final_iter)?;
        u_eqn.relax(mesh, &self.u.current, self.pimple.relaxation(settings.relaxation));

        if self.controls.pimple.momentum_predictor {
            self.pimple.enter(CouplingState::PredictingVelocity);
            let minus_grad_p: Vec<DVec3> = fvc::grad(mesh, &self.p).into_iter().map(|g| -g).collect();
            let perf = u_eqn
                .clone()
                .equate(mesh, &minus_grad_p)?
                .solve(mesh, &mut self.u.current, &settings, comm)?;
            self.pimple.record_residual(&perf.field, perf.initial_residual);
            report.performance.push(perf);
        }
        Ok(u_eqn)
    }

    fn pressure_corrector(
        &mut self,
        mesh: &Mesh,
        comm: &dyn Communicator,
        dt: f64,
        u_eqn: &FvMatrix<DVec3>,
        report: &mut StepReport,
    ) -> Result<(), FvError> {
        let schemes = self.controls.schemes.clone();

        let r_au: Vec<f64> = u_eqn.a(mesh).into_iter().map(|a| 1.0 / a).collect();
        let r_au_f = fvc::interpolate_cells(mesh, "rAUf", r_au.clone(), comm)?;
        let hbya: Vec<DVec3> = u_eqn
            .h(mesh, &self.u.current)
            .into_iter()
            .zip(&r_au)
            .map(|(h, &r)| h * r)
            .collect();
        let hbya = constrain_hbya(mesh, hbya, &self.u.current, comm)?;

        let mut phi_hbya = fvc::flux(mesh, &hbya);
        if schemes.ddt == DdtScheme::Euler {
            let corr = fvc::ddt_phi_corr(mesh, &self.u.old, &self.phi.old, dt);
            for ((phi, &r), c) in phi_hbya.values.iter_mut().zip(&r_au_f.values).zip(&corr.values) {
                *phi += r * c;
            }
        }
        adjust_phi(mesh, &mut phi_hbya, &self.u.current, &self.p, comm)?;

        self.p.update_coeffs(mesh, Some(&phi_hbya), self.time, None)?;
        while self.pimple.correct_non_orthogonal() {
            let div_phi = fvc::div_flux(mesh, &phi_hbya);
            let mut p_eqn = fvm::laplacian(mesh, &r_au_f, &self.p, schemes.non_orthogonal_correction)
                .equate(mesh, &div_phi)?;
            self.reference.pin(&mut p_eqn);

            let settings = self.controls.solver_settings("p", self.pimple.final_inner_iter())?;
            let perf = p_eqn.solve(mesh, &mut self.p, &settings, comm)?;
            self.pimple.record_residual(&perf.field, perf.initial_residual);
            report.performance.push(perf);

            if self.pimple.final_non_orthogonal_iter() {
                let flux = p_eqn.flux(mesh, &self.p);
                for ((phi, &h), &f) in self.phi.current.values.iter_mut().zip(&phi_hbya.values).zip(&flux.values) {
                    *phi = h - f;
                }
            }
        }

        report
            .continuity
            .push(self.continuity.update(mesh, &self.phi.current, dt, comm));

        let alpha = self
            .pimple
            .relaxation(self.controls.solver_settings("p", self.pimple.final_iter())?.relaxation);
        self.p.relax(mesh, alpha, comm)?;

        if let Some(g) = self.gravity {
            let mut p_abs: Vec<f64> = self
                .p
                .internal
                .iter()
                .zip(&mesh.cells)
                .map(|(p, cell)| p + g.dot(cell.centroid))
                .collect();
            self.reference.shift_to_reference(&mut p_abs, comm);
            self.p_abs = Some(p_abs);
        }

        let grad_p = fvc::grad(mesh, &self.p);
        for (((u, &h), g), &r) in self
            .u
            .current
            .internal
            .iter_mut()
            .zip(&hbya.internal)
            .zip(&grad_p)
            .zip(&r_au)
        {
            *u = h - *g * r;
        }
        self.u.current.correct_boundary_conditions(mesh, comm)?;
        Ok(())
    }
}
