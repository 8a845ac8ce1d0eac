use crate::FvError;
use crate::coupling::IncompressibleSolver;
use crate::coupling::controls::SolutionControls;
use crate::discretization::field::VolField;
use crate::discretization::generator::{BoxSpec, Side, create_box_mesh};
use crate::discretization::mesh::{Mesh, PatchKind};
use crate::models::transport::Newtonian;
use crate::parallel::Communicator;
use crate::physics::bc::BoundarySpec;
use glam::DVec3;
use std::collections::HashMap;

/// Solver setup of the lid-driven cavity.
pub const CAVITY_CONTROLS: &str = r#"{
    "solvers": {
        "p": { "solver": "PCG", "tolerance": 1e-6, "relTol": 0.05 },
        "pFinal": { "solver": "PCG", "tolerance": 1e-6, "relTol": 0 },
        "U": { "solver": "PBiCGStab", "tolerance": 1e-5, "relTol": 0 }
    },
    "PIMPLE": {
        "nOuterCorrectors": 1,
        "nCorrectors": 2,
        "nNonOrthogonalCorrectors": 0,
        "momentumPredictor": true,
        "pRefCell": 0,
        "pRefValue": 0
    },
    "schemes": { "ddt": "euler", "divU": "linear" }
}"#;

#[derive(Debug, Clone)]
pub struct CavityParams {
    pub n: usize,       // Cells per side
    pub size: f64,      // Edge length [m]
    pub lid_speed: f64, // Lid velocity [m/s]
    pub nu: f64,        // Kinematic viscosity [m^2/s]
    pub dt: f64,        // Time step [s]
    pub end_time: f64,  // [s]
}

impl Default for CavityParams {
    fn default() -> Self {
        Self {
            n: 20,
            size: 0.1,
            lid_speed: 1.0,
            nu: 0.01,
            dt: 0.005,
            end_time: 0.5,
        }
    }
}

impl CavityParams {
    pub fn reynolds(&self) -> f64 {
        self.lid_speed * self.size / self.nu
    }

    pub fn courant(&self) -> f64 {
        self.lid_speed * self.dt * self.n as f64 / self.size
    }
}

/// Square cavity, one cell thick; the lid is the `y = size` side.
pub fn cavity_spec(params: &CavityParams) -> BoxSpec {
    BoxSpec::new(
        DVec3::ZERO,
        DVec3::new(params.size, params.size, params.size / params.n as f64),
        [params.n, params.n, 1],
    )
    .with_side(Side::XMin, "fixedWalls", PatchKind::Wall)
    .with_side(Side::XMax, "fixedWalls", PatchKind::Wall)
    .with_side(Side::YMin, "fixedWalls", PatchKind::Wall)
    .with_side(Side::YMax, "movingWall", PatchKind::Wall)
    .with_side(Side::ZMin, "frontAndBack", PatchKind::Symmetry)
    .with_side(Side::ZMax, "frontAndBack", PatchKind::Symmetry)
}

/// Fields and solver on `mesh`, which may be one partition of the cavity.
pub fn cavity_solver(
    mesh: &Mesh,
    params: &CavityParams,
    comm: &dyn Communicator,
) -> Result<IncompressibleSolver, FvError> {
    let u_specs = HashMap::from([
        (
            "movingWall".to_string(),
            BoundarySpec::FixedValue(DVec3::new(params.lid_speed, 0.0, 0.0)),
        ),
        ("fixedWalls".to_string(), BoundarySpec::FixedValue(DVec3::ZERO)),
        ("frontAndBack".to_string(), BoundarySpec::ZeroGradient),
    ]);
    let p_specs = HashMap::from([
        ("movingWall".to_string(), BoundarySpec::ZeroGradient),
        ("fixedWalls".to_string(), BoundarySpec::ZeroGradient),
        ("frontAndBack".to_string(), BoundarySpec::ZeroGradient),
    ]);

    let mut u = VolField::new("U", mesh, DVec3::ZERO, &u_specs)?;
    u.correct_boundary_conditions(mesh, comm)?;
    let mut p = VolField::new("p", mesh, 0.0, &p_specs)?;
    p.correct_boundary_conditions(mesh, comm)?;

    let controls = SolutionControls::from_json_str(CAVITY_CONTROLS)?;
    IncompressibleSolver::new(mesh, controls, u, p, Box::new(Newtonian::new(params.nu)), comm)
}

/// Serial cavity: mesh and ready-to-step solver.
pub fn cavity_problem_def(
    params: &CavityParams,
    comm: &dyn Communicator,
    logging: bool,
) -> Result<(Mesh, IncompressibleSolver), FvError> {
    if logging {
        log::info!("--- Cavity ---");
        log::info!("Cells: {} x {}", params.n, params.n);
        log::info!("Reynolds number: {:.1}", params.reynolds());
        log::info!("Courant number: {:.2}", params.courant());
        log::info!("--------------");
    }
    let mesh = create_box_mesh(&cavity_spec(params))?;
    let solver = cavity_solver(&mesh, params, comm)?;
    Ok((mesh, solver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::NoComm;

    #[test]
    fn default_case_matches_classic_setup() {
        let params = CavityParams::default();
        assert!((params.reynolds() - 10.0).abs() < 1e-12);
        assert!((params.courant() - 1.0).abs() < 1e-12);

        let (mesh, solver) = cavity_problem_def(&params, &NoComm, false).unwrap();
        assert_eq!(mesh.n_cells(), 400);
        assert_eq!(mesh.patches.len(), 3);
        assert!(solver.reference().active);
        assert_eq!(solver.reference().cell, Some(0));
    }
}
