use sfvm_rs::coupling::IncompressibleSolver;
use sfvm_rs::discretization::mesh::Mesh;
use sfvm_rs::models::cavity::{CavityParams, cavity_problem_def};
use sfvm_rs::numerics::timing;
use sfvm_rs::numerics::transient::TimeLoop;
use sfvm_rs::parallel::NoComm;
use sfvm_rs::processing::csv_writer;
use sfvm_rs::processing::summary::RunSummary;
use std::error::Error;
use std::fs;
use std::process::ExitCode;
use std::time::Instant;

const OUTPUT_DIR: &str = "output/cavity";

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(OUTPUT_DIR)?;
    let start = Instant::now();

    let params = CavityParams::default();
    let comm = NoComm;
    let (mesh, mut solver) = cavity_problem_def(&params, &comm, true)?;

    let time_loop = TimeLoop {
        t_end: params.end_time,
        dt: params.dt,
        ..TimeLoop::default()
    };

    let write_interval = 20;
    let mut write_error: Option<std::io::Error> = None;
    let reports = time_loop.run(&mut solver, &mesh, &comm, |step, solver, _| {
        if step % write_interval == 0 && write_error.is_none() {
            let path = format!("{}/fields_{:04}.csv", OUTPUT_DIR, step);
            if let Err(e) = save_fields(&path, &mesh, solver) {
                write_error = Some(e);
            }
        }
    })?;
    if let Some(e) = write_error {
        return Err(e.into());
    }

    save_fields(&format!("{}/fields_final.csv", OUTPUT_DIR), &mesh, &solver)?;
    csv_writer::write_residual_history(format!("{}/residuals.csv", OUTPUT_DIR), &["U", "p"], &reports)?;
    println!("Fields saved to {}/", OUTPUT_DIR);

    let summary = RunSummary::from_run(&mesh, &reports);
    summary.write_to_file(format!("{}/simulation_summary.txt", OUTPUT_DIR))?;
    summary.print_to_console();
    println!("Summary saved to {}/simulation_summary.txt", OUTPUT_DIR);

    timing::finalize_and_print(start.elapsed());
    Ok(())
}

fn save_fields(
    path: &str,
    mesh: &Mesh,
    solver: &IncompressibleSolver,
) -> Result<(), std::io::Error> {
    let u = &solver.u.current.internal;
    csv_writer::write_cell_data(
        path,
        mesh,
        &[
            ("Ux", u.iter().map(|v| v.x).collect()),
            ("Uy", u.iter().map(|v| v.y).collect()),
            ("Uz", u.iter().map(|v| v.z).collect()),
            ("p", solver.p.internal.clone()),
        ],
    )
}

