use crate::coupling::StepReport;
use crate::discretization::mesh::Mesh;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Write columns to a CSV file with headers
pub fn write_csv<P: AsRef<Path>>(path: P, headers: &[&str], data: &[Vec<f64>]) -> io::Result<()> {
    if !headers.is_empty() && !data.is_empty() && headers.len() != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Headers count ({}) doesn't match data columns ({})",
                headers.len(),
                data.len()
            ),
        ));
    }

    let mut file = File::create(path)?;

    writeln!(file, "{}", headers.join(","))?;

    let n_rows = data.iter().map(|col| col.len()).max().unwrap_or(0);

    for i in 0..n_rows {
        let row: Vec<String> = data
            .iter()
            .map(|col| col.get(i).map(|v| format!("{:.15e}", v)).unwrap_or_default())
            .collect();
        writeln!(file, "{}", row.join(","))?;
    }

    Ok(())
}

/// Cell centres followed by one column per named cell field
pub fn write_cell_data<P: AsRef<Path>>(path: P, mesh: &Mesh, fields: &[(&str, Vec<f64>)]) -> io::Result<()> {
    if let Some((name, values)) = fields.iter().find(|(_, v)| v.len() != mesh.n_cells()) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Field {} has {} values for {} cells",
                name,
                values.len(),
                mesh.n_cells()
            ),
        ));
    }

    let mut headers = vec!["x", "y", "z"];
    headers.extend(fields.iter().map(|(name, _)| *name));

    let mut data = vec![
        mesh.cells.iter().map(|c| c.centroid.x).collect(),
        mesh.cells.iter().map(|c| c.centroid.y).collect(),
        mesh.cells.iter().map(|c| c.centroid.z).collect(),
    ];
    data.extend(fields.iter().map(|(_, values)| values.clone()));
    write_csv(path, &headers, &data)
}

/// Per-step time, first initial residual of each field in `fields`, and the
/// local continuity error
pub fn write_residual_history<P: AsRef<Path>>(path: P, fields: &[&str], reports: &[StepReport]) -> io::Result<()> {
    let mut headers = vec!["time"];
    headers.extend_from_slice(fields);
    headers.push("continuity");

    let mut data = vec![reports.iter().map(|r| r.time).collect::<Vec<_>>()];
    for field in fields {
        data.push(
            reports
                .iter()
                .map(|r| r.first_residual(field).unwrap_or(f64::NAN))
                .collect(),
        );
    }
    data.push(
        reports
            .iter()
            .map(|r| r.continuity.last().map(|c| c.local).unwrap_or(f64::NAN))
            .collect(),
    );
    write_csv(path, &headers, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{BoxSpec, create_box_mesh};
    use std::fs;

    #[test]
    fn test_write_csv() {
        let path = std::env::temp_dir().join("sfvm_test_output.csv");
        let headers = &["x", "y", "z"];
        let data = vec![
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ];

        write_csv(&path, headers, &data).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("x,y,z\n"));
        assert_eq!(content.lines().count(), 4);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn cell_data_rejects_wrong_length() {
        let mesh = create_box_mesh(&BoxSpec::line(3, 1.0)).unwrap();
        let path = std::env::temp_dir().join("sfvm_test_cells.csv");

        let err = write_cell_data(&path, &mesh, &[("p", vec![0.0; 2])]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        write_cell_data(&path, &mesh, &[("p", vec![1.0, 2.0, 3.0])]).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("x,y,z,p\n"));
        assert_eq!(content.lines().count(), 4);

        fs::remove_file(&path).ok();
    }
}
