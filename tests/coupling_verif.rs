use glam::DVec3;
use std::collections::HashMap;

use sfvm_rs::coupling::IncompressibleSolver;
use sfvm_rs::coupling::controls::SolutionControls;
use sfvm_rs::discretization::field::VolField;
use sfvm_rs::discretization::generator::{BoxSpec, Side, create_box_mesh};
use sfvm_rs::discretization::mesh::{Mesh, PatchKind};
use sfvm_rs::models::cavity::{CavityParams, cavity_problem_def};
use sfvm_rs::models::transport::Newtonian;
use sfvm_rs::numerics::transient::TimeLoop;
use sfvm_rs::parallel::NoComm;
use sfvm_rs::physics::bc::BoundarySpec;
use sfvm_rs::physics::fvc;

const CHANNEL_CONTROLS: &str = r#"{
    "solvers": {
        "p": { "solver": "PCG", "tolerance": 1e-10, "relTol": 0 },
        "U": { "solver": "PBiCGStab", "tolerance": 1e-10, "relTol": 0 }
    },
    "PIMPLE": { "nOuterCorrectors": 1, "nCorrectors": 2 },
    "schemes": { "divU": "upwind" }
}"#;

fn channel(n: usize) -> (Mesh, IncompressibleSolver) {
    let spec = BoxSpec::new(DVec3::ZERO, DVec3::new(n as f64, 1.0, 1.0), [n, 1, 1])
        .with_side(Side::XMin, "inlet", PatchKind::Open)
        .with_side(Side::XMax, "outlet", PatchKind::Open);
    let mesh = create_box_mesh(&spec).unwrap();

    let u_specs = HashMap::from([
        ("inlet".to_string(), BoundarySpec::FixedValue(DVec3::X)),
        ("outlet".to_string(), BoundarySpec::ZeroGradient),
        ("walls".to_string(), BoundarySpec::ZeroGradient),
    ]);
    let p_specs = HashMap::from([
        ("inlet".to_string(), BoundarySpec::ZeroGradient),
        ("outlet".to_string(), BoundarySpec::FixedValue(0.0)),
        ("walls".to_string(), BoundarySpec::ZeroGradient),
    ]);
    let u = VolField::new("U", &mesh, DVec3::ZERO, &u_specs).unwrap();
    let p = VolField::new("p", &mesh, 0.0, &p_specs).unwrap();
    let controls = SolutionControls::from_json_str(CHANNEL_CONTROLS).unwrap();
    let solver = IncompressibleSolver::new(&mesh, controls, u, p, Box::new(Newtonian::new(0.01)), &NoComm).unwrap();
    (mesh, solver)
}

#[test]
fn single_cell_step_conserves_mass() {
    let (mesh, mut solver) = channel(1);
    assert!(!solver.reference().active);

    let report = solver.step(&mesh, &NoComm, 0.1).unwrap();
    assert_eq!(report.outer_iterations, 1);
    assert_eq!(report.continuity.len(), 2);

    let errors = solver.continuity_errors();
    assert!(errors.local < 1e-9, "{errors:?}");

    let outlet = mesh.patch_index("outlet").unwrap();
    let inlet = mesh.patch_index("inlet").unwrap();
    assert!((solver.phi.current.patch(&mesh, inlet)[0] + 1.0).abs() < 1e-12);
    assert!((solver.phi.current.patch(&mesh, outlet)[0] - 1.0).abs() < 1e-8);
}

#[test]
fn channel_carries_inlet_flux_through_every_face() {
    let (mesh, mut solver) = channel(6);
    for _ in 0..3 {
        solver.step(&mesh, &NoComm, 0.5).unwrap();
    }
    for f in mesh.internal_faces() {
        let normal = mesh.geometry(f).normal;
        if normal.x.abs() > 0.5 {
            let phi = solver.phi.current.values[f] * normal.x.signum();
            assert!((phi - 1.0).abs() < 1e-7, "face {f}: {phi}");
        } else {
            assert!(solver.phi.current.values[f].abs() < 1e-7);
        }
    }
    assert!(solver.continuity_errors().cumulative.abs() < 1e-8);
}

#[test]
fn closed_cavity_keeps_flux_divergence_free() {
    let params = CavityParams {
        n: 8,
        ..CavityParams::default()
    };
    let (mesh, mut solver) = cavity_problem_def(&params, &NoComm, false).unwrap();
    let time_loop = TimeLoop {
        t_end: 20.0 * params.dt,
        dt: params.dt,
        ..TimeLoop::default()
    };
    let reports = time_loop.run(&mut solver, &mesh, &NoComm, |_, _, _| {}).unwrap();
    assert_eq!(reports.len(), 20);

    // Every corrected flux balances within the pressure tolerance.
    let div = fvc::div_flux(&mesh, &solver.phi.current);
    let scale = params.lid_speed / params.size;
    for (c, d) in div.iter().enumerate() {
        assert!(d.abs() < 1e-2 * scale, "cell {c}: {d}");
    }

    // Net flux through the vertical mid-plane vanishes; the lid drags the
    // top forward and the return flow runs back underneath.
    let mid = 0.5 * params.size;
    let crossing: Vec<f64> = mesh
        .internal_faces()
        .filter(|&f| {
            let face = &mesh.faces[f];
            face.area.x.abs() > 0.0 && (face.centroid.x - mid).abs() < 1e-9
        })
        .map(|f| solver.phi.current.values[f] * mesh.faces[f].area.x.signum())
        .collect();
    let net: f64 = crossing.iter().sum();
    let total: f64 = crossing.iter().map(|phi| phi.abs()).sum();
    assert_eq!(crossing.len(), params.n);
    assert!(net.abs() < 1e-2 * total, "net {net}, total {total}");
    assert!(crossing.iter().any(|&phi| phi < 0.0));

    let top = solver
        .u
        .current
        .internal
        .iter()
        .zip(&mesh.cells)
        .filter(|(_, c)| c.centroid.y > 0.9 * params.size)
        .map(|(v, _)| v.x)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(top > 0.1);

    for report in &reports {
        assert!(report.first_residual("p").is_some());
        assert!(report.first_residual("U").is_some());
    }
}

#[test]
fn outer_iterations_stop_on_residual_control() {
    let params = CavityParams {
        n: 6,
        ..CavityParams::default()
    };
    let (mesh, base) = cavity_problem_def(&params, &NoComm, false).unwrap();
    let mut controls = base.controls.clone();
    controls.pimple.n_outer_correctors = 50;
    controls.pimple.residual_control = HashMap::from([("p".to_string(), 1e-2), ("U".to_string(), 1e-2)]);
    let mut solver = IncompressibleSolver::new(
        &mesh,
        controls,
        base.u.current.clone(),
        base.p.clone(),
        Box::new(Newtonian::new(params.nu)),
        &NoComm,
    )
    .unwrap();

    let report = solver.step(&mesh, &NoComm, params.dt).unwrap();
    assert!(report.converged);
    assert!(report.outer_iterations < 50);
}

#[test]
fn relaxed_pressure_correctors_conserve_mass() {
    let (mesh, base) = channel(4);
    let mut controls = base.controls.clone();
    controls.pimple.n_outer_correctors = 3;
    if let Some(p) = controls.solvers.get_mut("p") {
        p.relaxation = 0.3;
    }
    let mut solver = IncompressibleSolver::new(
        &mesh,
        controls,
        base.u.current.clone(),
        base.p.clone(),
        Box::new(Newtonian::new(0.01)),
        &NoComm,
    )
    .unwrap();

    let report = solver.step(&mesh, &NoComm, 0.5).unwrap();
    assert_eq!(report.outer_iterations, 3);
    // Two correctors per outer iteration.
    assert_eq!(report.continuity.len(), 6);
    // The final outer iteration is unrelaxed, so its fluxes balance.
    assert!(solver.continuity_errors().local < 1e-8);
    assert_eq!(solver.p.prev_iter.as_ref().map(Vec::len), Some(mesh.n_cells()));
}
