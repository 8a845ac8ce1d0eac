//! Developing laminar flow between two plates.
//!
//! A uniform inlet profile relaxes towards the parabolic Poiseuille profile.
//! The time step follows the Courant limit.
//!
//! Run with `cargo run --release --example channel`.

use glam::DVec3;
use sfvm_rs::coupling::IncompressibleSolver;
use sfvm_rs::coupling::controls::SolutionControls;
use sfvm_rs::discretization::field::VolField;
use sfvm_rs::discretization::generator::{BoxSpec, Side, create_box_mesh};
use sfvm_rs::discretization::mesh::PatchKind;
use sfvm_rs::models::transport::Newtonian;
use sfvm_rs::numerics::transient::TimeLoop;
use sfvm_rs::parallel::NoComm;
use sfvm_rs::physics::bc::BoundarySpec;
use sfvm_rs::processing::csv_writer;
use sfvm_rs::processing::summary::RunSummary;
use std::collections::HashMap;
use std::error::Error;
use std::fs;

const OUTPUT_DIR: &str = "output/channel";

const CONTROLS: &str = r#"{
    "solvers": {
        "p": { "solver": "PCG", "tolerance": 1e-8, "relTol": 0.01 },
        "pFinal": { "solver": "PCG", "tolerance": 1e-8, "relTol": 0 },
        "U": { "solver": "PBiCGStab", "tolerance": 1e-7, "relTol": 0 }
    },
    "PIMPLE": { "nOuterCorrectors": 1, "nCorrectors": 2 },
    "schemes": { "divU": "linear" }
}"#;

const U_BOUNDARY: &str = r#"{
    "outlet": "zeroGradient",
    "walls": { "fixedValue": [0, 0, 0] },
    "frontAndBack": "zeroGradient"
}"#;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    fs::create_dir_all(OUTPUT_DIR)?;

    let (length, height) = (1.0, 0.1);
    let (nx, ny) = (50, 10);
    let u_in = 0.5;
    let nu = 1e-3;

    let spec = BoxSpec::new(DVec3::ZERO, DVec3::new(length, height, height / ny as f64), [nx, ny, 1])
        .with_side(Side::XMin, "inlet", PatchKind::Open)
        .with_side(Side::XMax, "outlet", PatchKind::Open)
        .with_side(Side::ZMin, "frontAndBack", PatchKind::Symmetry)
        .with_side(Side::ZMax, "frontAndBack", PatchKind::Symmetry);
    let mesh = create_box_mesh(&spec)?;
    log::info!("Channel: {} x {} cells, Re = {:.0}", nx, ny, u_in * height / nu);

    let mut u_specs: HashMap<String, BoundarySpec<DVec3>> = serde_json::from_str(U_BOUNDARY)?;
    u_specs.insert("inlet".to_string(), BoundarySpec::FixedValue(DVec3::new(u_in, 0.0, 0.0)));
    let p_specs = HashMap::from([
        ("inlet".to_string(), BoundarySpec::ZeroGradient),
        ("outlet".to_string(), BoundarySpec::FixedValue(0.0)),
        ("walls".to_string(), BoundarySpec::ZeroGradient),
        ("frontAndBack".to_string(), BoundarySpec::ZeroGradient),
    ]);
    let mut u = VolField::new("U", &mesh, DVec3::ZERO, &u_specs)?;
    u.correct_boundary_conditions(&mesh, &NoComm)?;
    let p = VolField::new("p", &mesh, 0.0, &p_specs)?;

    let controls = SolutionControls::from_json_str(CONTROLS)?;
    let mut solver = IncompressibleSolver::new(&mesh, controls, u, p, Box::new(Newtonian::new(nu)), &NoComm)?;

    let time_loop = TimeLoop {
        t_end: 2.0 * length / u_in,
        dt: 1e-3,
        max_courant: Some(0.8),
        max_dt: 0.05,
        ..TimeLoop::default()
    };
    let reports = time_loop.run(&mut solver, &mesh, &NoComm, |_, _, _| {})?;

    // Outlet profile against the fully developed parabola.
    let outlet_x = mesh
        .cells
        .iter()
        .map(|c| c.centroid.x)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut profile: Vec<(f64, f64)> = mesh
        .cells
        .iter()
        .zip(&solver.u.current.internal)
        .filter(|(c, _)| (c.centroid.x - outlet_x).abs() < 1e-9)
        .map(|(c, v)| (c.centroid.y, v.x))
        .collect();
    profile.sort_by(|a, b| a.0.total_cmp(&b.0));
    let exact: Vec<f64> = profile
        .iter()
        .map(|&(y, _)| 6.0 * u_in * y * (height - y) / (height * height))
        .collect();
    csv_writer::write_csv(
        format!("{}/outlet_profile.csv", OUTPUT_DIR),
        &["y", "Ux", "Ux_exact"],
        &[
            profile.iter().map(|p| p.0).collect(),
            profile.iter().map(|p| p.1).collect(),
            exact.clone(),
        ],
    )?;
    let max_err = profile
        .iter()
        .zip(&exact)
        .map(|(p, e)| (p.1 - e).abs())
        .fold(0.0, f64::max);
    log::info!("Outlet profile deviation from Poiseuille: {:.3e} m/s", max_err);

    let u_cells = &solver.u.current.internal;
    csv_writer::write_cell_data(
        format!("{}/fields_final.csv", OUTPUT_DIR),
        &mesh,
        &[
            ("Ux", u_cells.iter().map(|v| v.x).collect()),
            ("Uy", u_cells.iter().map(|v| v.y).collect()),
            ("p", solver.p.internal.clone()),
        ],
    )?;
    csv_writer::write_residual_history(format!("{}/residuals.csv", OUTPUT_DIR), &["U", "p"], &reports)?;

    let summary = RunSummary::from_run(&mesh, &reports);
    summary.write_to_file(format!("{}/simulation_summary.txt", OUTPUT_DIR))?;
    summary.print_to_console();
    Ok(())
}
