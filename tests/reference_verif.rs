use approx::assert_relative_eq;
use glam::DVec3;
use std::collections::HashMap;

use sfvm_rs::FvError;
use sfvm_rs::coupling::controls::{PimpleSettings, SolutionControls};
use sfvm_rs::coupling::pressure::PressureReference;
use sfvm_rs::coupling::{CouplingError, IncompressibleSolver};
use sfvm_rs::discretization::field::VolField;
use sfvm_rs::discretization::generator::{BoxSpec, create_box_mesh};
use sfvm_rs::discretization::mesh::Mesh;
use sfvm_rs::models::transport::Newtonian;
use sfvm_rs::numerics::solver::{FieldSolverSettings, SolverKind};
use sfvm_rs::parallel::NoComm;
use sfvm_rs::physics::bc::BoundarySpec;
use sfvm_rs::physics::{fvc, fvm};

fn closed_box() -> Mesh {
    create_box_mesh(&BoxSpec::new(DVec3::ZERO, DVec3::new(1.0, 0.8, 0.2), [5, 4, 1])).unwrap()
}

// laplacian(p) == x - 1/2 with zero-gradient walls: compatible but singular.
fn solve_pinned(mesh: &Mesh, cell: usize, value: f64) -> VolField<f64> {
    let specs = HashMap::from([("walls".to_string(), BoundarySpec::ZeroGradient)]);
    let mut p = VolField::new("p", mesh, 0.0, &specs).unwrap();
    let settings = PimpleSettings {
        p_ref_cell: Some(cell),
        p_ref_value: value,
        ..PimpleSettings::default()
    };
    let reference = PressureReference::resolve(mesh, &p, &settings, &NoComm).unwrap();
    assert!(reference.active);

    let su: Vec<f64> = mesh.cells.iter().map(|c| c.centroid.x - 0.5).collect();
    let mut eqn = fvm::laplacian_uniform(mesh, 1.0, &p, false).equate(mesh, &su).unwrap();
    reference.pin(&mut eqn);

    let solver = FieldSolverSettings {
        solver: SolverKind::Pcg,
        tolerance: 1e-13,
        max_iter: 5000,
        ..FieldSolverSettings::default()
    };
    eqn.solve(mesh, &mut p, &solver, &NoComm).unwrap();
    p
}

#[test]
fn pinned_cell_takes_reference_value() {
    let mesh = closed_box();
    let p = solve_pinned(&mesh, 7, 3.0);
    assert_relative_eq!(p.internal[7], 3.0, epsilon = 1e-8);
}

#[test]
fn gradient_is_independent_of_reference_cell() {
    let mesh = closed_box();
    let a = solve_pinned(&mesh, 0, 0.0);
    let b = solve_pinned(&mesh, 13, -20.0);

    // Only the level differs.
    let offset = b.internal[0] - a.internal[0];
    for (x, y) in a.internal.iter().zip(&b.internal) {
        assert_relative_eq!(y - x, offset, epsilon = 1e-7);
    }
    for (ga, gb) in fvc::grad(&mesh, &a).iter().zip(&fvc::grad(&mesh, &b)) {
        assert!((*ga - *gb).length() < 1e-7, "{ga:?} vs {gb:?}");
    }
}

#[test]
fn fixed_level_needs_no_reference() {
    let mesh = create_box_mesh(&BoxSpec::line(3, 1.0)).unwrap();
    let specs = HashMap::from([
        ("left".to_string(), BoundarySpec::ZeroGradient),
        ("right".to_string(), BoundarySpec::FixedValue(1.0)),
        ("sides".to_string(), BoundarySpec::ZeroGradient),
    ]);
    let p = VolField::new("p", &mesh, 0.0, &specs).unwrap();
    // An out-of-range cell is never looked at when no reference is needed.
    let settings = PimpleSettings {
        p_ref_cell: Some(100),
        ..PimpleSettings::default()
    };
    let reference = PressureReference::resolve(&mesh, &p, &settings, &NoComm).unwrap();
    assert!(!reference.active);

    let mut eqn = fvm::laplacian_uniform(&mesh, 1.0, &p, false);
    let before = eqn.diag.clone();
    reference.pin(&mut eqn);
    assert_eq!(eqn.diag, before);
}

#[test]
fn reference_out_of_range_aborts_setup() {
    let mesh = closed_box();
    let u_specs = HashMap::from([("walls".to_string(), BoundarySpec::FixedValue(DVec3::ZERO))]);
    let p_specs = HashMap::from([("walls".to_string(), BoundarySpec::ZeroGradient)]);
    let u = VolField::new("U", &mesh, DVec3::ZERO, &u_specs).unwrap();
    let p = VolField::new("p", &mesh, 0.0, &p_specs).unwrap();

    let controls = SolutionControls::from_json_str(
        r#"{
            "solvers": { "p": {}, "U": {} },
            "PIMPLE": { "pRefCell": 20 }
        }"#,
    )
    .unwrap();
    let result = IncompressibleSolver::new(&mesh, controls, u, p, Box::new(Newtonian::new(1e-3)), &NoComm);
    assert!(matches!(
        result,
        Err(FvError::Coupling(CouplingError::ReferenceCellOutOfRange { cell: 20, n_cells: 20 }))
    ));
}
