use crate::coupling::StepReport;
use crate::coupling::continuity::ContinuityErrors;
use crate::discretization::mesh::Mesh;
use glam::DVec3;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

pub struct RunSummary {
    // Mesh info
    pub num_cells: usize,
    pub num_faces: usize,
    pub num_internal_faces: usize,
    pub num_patches: usize,
    pub bounding_box: (DVec3, DVec3),
    pub min_cell_spacing: f64,
    pub max_cell_spacing: f64,
    pub avg_cell_volume: f64,

    // Run info
    pub steps: usize,
    pub final_time: f64,
    pub outer_iterations: usize,
    pub unconverged_steps: usize,
    pub linear_iterations: usize,

    // Last step
    pub last_residuals: Vec<(String, f64)>,
    pub continuity: Option<ContinuityErrors>,
}

impl RunSummary {
    pub fn from_run(mesh: &Mesh, reports: &[StepReport]) -> Self {
        let (min, max) = mesh.points.iter().fold(
            (DVec3::splat(f64::INFINITY), DVec3::splat(f64::NEG_INFINITY)),
            |(lo, hi), &p| (lo.min(p), hi.max(p)),
        );

        let min_spacing = mesh.cell_spacings().fold(f64::INFINITY, f64::min);
        let max_spacing = mesh.cell_spacings().fold(f64::NEG_INFINITY, f64::max);
        let avg_volume = mesh.total_volume() / mesh.n_cells().max(1) as f64;

        let mut last_residuals: Vec<(String, f64)> = Vec::new();
        if let Some(last) = reports.last() {
            for perf in &last.performance {
                if !last_residuals.iter().any(|(f, _)| f == &perf.field) {
                    last_residuals.push((perf.field.clone(), perf.initial_residual));
                }
            }
        }

        Self {
            num_cells: mesh.n_cells(),
            num_faces: mesh.n_faces(),
            num_internal_faces: mesh.n_internal_faces(),
            num_patches: mesh.patches.len(),
            bounding_box: (min, max),
            min_cell_spacing: min_spacing,
            max_cell_spacing: max_spacing,
            avg_cell_volume: avg_volume,
            steps: reports.len(),
            final_time: reports.last().map(|r| r.time).unwrap_or(0.0),
            outer_iterations: reports.iter().map(|r| r.outer_iterations).sum(),
            unconverged_steps: reports.iter().filter(|r| !r.converged).count(),
            linear_iterations: reports
                .iter()
                .flat_map(|r| r.performance.iter())
                .map(|p| p.iterations)
                .sum(),
            last_residuals,
            continuity: reports.last().and_then(|r| r.continuity.last().copied()),
        }
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;

        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file, "FLOW SIMULATION SUMMARY")?;
        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file)?;

        writeln!(file, "MESH STATISTICS")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "Number of cells:     {}", self.num_cells)?;
        writeln!(file, "Number of faces:     {}", self.num_faces)?;
        writeln!(file, "Internal faces:      {}", self.num_internal_faces)?;
        writeln!(file, "Number of patches:   {}", self.num_patches)?;
        let (lo, hi) = self.bounding_box;
        writeln!(
            file,
            "Bounding box:        ({:.4e}, {:.4e}, {:.4e}) to ({:.4e}, {:.4e}, {:.4e}) m",
            lo.x, lo.y, lo.z, hi.x, hi.y, hi.z
        )?;
        writeln!(file, "Min cell spacing:    {:.6e} m", self.min_cell_spacing)?;
        writeln!(file, "Max cell spacing:    {:.6e} m", self.max_cell_spacing)?;
        writeln!(file, "Avg cell volume:     {:.6e} m^3", self.avg_cell_volume)?;
        writeln!(file)?;

        writeln!(file, "TIME STEPPING")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "Steps:               {}", self.steps)?;
        writeln!(file, "Final time:          {:.6e} s", self.final_time)?;
        writeln!(file, "Outer iterations:    {}", self.outer_iterations)?;
        writeln!(file, "Unconverged steps:   {}", self.unconverged_steps)?;
        writeln!(file, "Linear iterations:   {}", self.linear_iterations)?;
        writeln!(file)?;

        if !self.last_residuals.is_empty() {
            writeln!(file, "LAST STEP INITIAL RESIDUALS")?;
            writeln!(file, "{}", "-".repeat(60))?;
            for (field, res) in &self.last_residuals {
                writeln!(file, "  {:<18} {:.6e}", field, res)?;
            }
            writeln!(file)?;
        }

        if let Some(c) = self.continuity {
            writeln!(file, "CONTINUITY ERRORS")?;
            writeln!(file, "{}", "-".repeat(60))?;
            writeln!(file, "Sum local:           {:.6e}", c.local)?;
            writeln!(file, "Global:              {:.6e}", c.global)?;
            writeln!(file, "Cumulative:          {:.6e}", c.cumulative)?;
            writeln!(file)?;
        }

        writeln!(file, "{}", "=".repeat(60))?;

        Ok(())
    }

    pub fn print_to_console(&self) {
        println!("\n{}", "=".repeat(60));
        println!("SIMULATION SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Mesh:          {} cells, {} faces",
            self.num_cells, self.num_faces
        );
        println!(
            "Steps:         {} (t = {:.4e} s, {} outer iterations)",
            self.steps, self.final_time, self.outer_iterations
        );
        for (field, res) in &self.last_residuals {
            println!("Residual {:<5} {:.3e}", field, res);
        }
        if let Some(c) = self.continuity {
            println!("Continuity:    {:.3e} (cumulative {:.3e})", c.local, c.cumulative);
        }
        println!("{}\n", "=".repeat(60));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{BoxSpec, create_box_mesh};
    use crate::numerics::solver::{SolverKind, SolverPerformance};

    fn perf(field: &str, residual: f64, iterations: usize) -> SolverPerformance {
        SolverPerformance {
            solver: SolverKind::Pcg,
            field: field.to_string(),
            initial_residual: residual,
            final_residual: residual * 1e-3,
            iterations,
            converged: true,
        }
    }

    #[test]
    fn summary_collects_run_statistics() {
        let mesh = create_box_mesh(&BoxSpec::line(4, 2.0)).unwrap();
        let reports = vec![
            StepReport {
                time: 0.1,
                outer_iterations: 2,
                converged: true,
                performance: vec![perf("p", 1.0, 5)],
                continuity: vec![],
            },
            StepReport {
                time: 0.2,
                outer_iterations: 1,
                converged: false,
                performance: vec![perf("Ux", 0.1, 3), perf("p", 0.01, 4), perf("p", 0.001, 2)],
                continuity: vec![ContinuityErrors::default()],
            },
        ];
        let summary = RunSummary::from_run(&mesh, &reports);
        assert_eq!(summary.num_cells, 4);
        assert_eq!(summary.num_internal_faces, 3);
        assert_eq!(summary.steps, 2);
        assert_eq!(summary.outer_iterations, 3);
        assert_eq!(summary.unconverged_steps, 1);
        assert_eq!(summary.linear_iterations, 14);
        assert_eq!(summary.last_residuals, vec![("Ux".to_string(), 0.1), ("p".to_string(), 0.01)]);
        assert!((summary.min_cell_spacing - 0.5).abs() < 1e-12);
        assert!((summary.bounding_box.1.x - 2.0).abs() < 1e-12);
        assert!(summary.continuity.is_some());
    }
}
