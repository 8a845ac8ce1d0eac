use crate::discretization::field::{FieldValue, SurfaceField, VolField};
use crate::discretization::mesh::Mesh;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AssemblyError {
    #[error("cannot combine the equation for '{left}' with the equation for '{right}'")]
    FieldMismatch { left: String, right: String },
    #[error("equation for '{field}' has {expected} rows but {found} values were supplied")]
    SizeMismatch {
        field: String,
        expected: usize,
        found: usize,
    },
}

/// Finite-volume system `A x = b` in owner/neighbour (LDU) addressing.
///
/// The matrix stands for the operator value `A x - b`: `upper[f]` couples
/// the owner row to the neighbour, `lower[f]` the neighbour row to the
/// owner. Boundary terms stay per patch until solve time: `internal_coeffs`
/// add to the diagonal and `boundary_coeffs` to the source.
#[derive(Clone, Debug)]
pub struct FvMatrix<T: FieldValue> {
    field: String,
    pub diag: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub source: Vec<T>,
    pub internal_coeffs: Vec<Vec<f64>>,
    pub boundary_coeffs: Vec<Vec<T>>,
    /// Deferred explicit face fluxes (non-orthogonal correction), per face.
    pub face_flux_correction: Option<Vec<T>>,
}

impl<T: FieldValue> FvMatrix<T> {
    pub fn new(field: &str, mesh: &Mesh) -> Self {
        Self {
            field: field.to_string(),
            diag: vec![0.0; mesh.n_cells()],
            upper: vec![0.0; mesh.n_internal_faces()],
            lower: vec![0.0; mesh.n_internal_faces()],
            source: vec![T::zero(); mesh.n_cells()],
            internal_coeffs: mesh.patches.iter().map(|p| vec![0.0; p.size]).collect(),
            boundary_coeffs: mesh.patches.iter().map(|p| vec![T::zero(); p.size]).collect(),
            face_flux_correction: None,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn n_rows(&self) -> usize {
        self.diag.len()
    }

    /// Set each diagonal to minus the sum of its row's off-diagonals.
    pub fn neg_sum_diag(&mut self, mesh: &Mesh) {
        for f in mesh.internal_faces() {
            let face = &mesh.faces[f];
            let Some(n) = face.neighbour else { continue };
            self.diag[face.owner] -= self.lower[f];
            self.diag[n] -= self.upper[f];
        }
    }

    fn check_compatible(&self, other: &Self) -> Result<(), AssemblyError> {
        if self.field != other.field {
            return Err(AssemblyError::FieldMismatch {
                left: self.field.clone(),
                right: other.field.clone(),
            });
        }
        if self.diag.len() != other.diag.len() || self.upper.len() != other.upper.len() {
            return Err(AssemblyError::SizeMismatch {
                field: self.field.clone(),
                expected: self.diag.len(),
                found: other.diag.len(),
            });
        }
        Ok(())
    }

    fn combine(mut self, other: &Self, sign: f64) -> Self {
        let axpy = |a: &mut [f64], b: &[f64]| a.iter_mut().zip(b).for_each(|(x, y)| *x += sign * y);
        axpy(&mut self.diag, &other.diag);
        axpy(&mut self.upper, &other.upper);
        axpy(&mut self.lower, &other.lower);
        for (x, &y) in self.source.iter_mut().zip(&other.source) {
            *x += y * sign;
        }
        for (a, b) in self.internal_coeffs.iter_mut().zip(&other.internal_coeffs) {
            axpy(a, b);
        }
        for (a, b) in self.boundary_coeffs.iter_mut().zip(&other.boundary_coeffs) {
            for (x, &y) in a.iter_mut().zip(b) {
                *x += y * sign;
            }
        }
        self.face_flux_correction = match (self.face_flux_correction.take(), &other.face_flux_correction) {
            (Some(mut a), Some(b)) => {
                for (x, &y) in a.iter_mut().zip(b) {
                    *x += y * sign;
                }
                Some(a)
            }
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b.iter().map(|&y| y * sign).collect()),
            (None, None) => None,
        };
        self
    }

    pub fn add(self, other: &Self) -> Result<Self, AssemblyError> {
        self.check_compatible(other)?;
        Ok(self.combine(other, 1.0))
    }

    pub fn subtract(self, other: &Self) -> Result<Self, AssemblyError> {
        self.check_compatible(other)?;
        Ok(self.combine(other, -1.0))
    }

    /// `self == su`: moves the explicit per-volume field `su` to the right-hand side.
    pub fn equate(mut self, mesh: &Mesh, su: &[T]) -> Result<Self, AssemblyError> {
        if su.len() != self.source.len() {
            return Err(AssemblyError::SizeMismatch {
                field: self.field.clone(),
                expected: self.source.len(),
                found: su.len(),
            });
        }
        for ((b, &s), cell) in self.source.iter_mut().zip(su).zip(&mesh.cells) {
            *b += s * cell.volume;
        }
        Ok(self)
    }

    /// Diagonal including the boundary contributions.
    pub fn full_diag(&self, mesh: &Mesh) -> Vec<f64> {
        let mut d = self.diag.clone();
        for (p, coeffs) in self.internal_coeffs.iter().enumerate() {
            for (cell, &c) in mesh.patch_face_cells(p).zip(coeffs) {
                d[cell] += c;
            }
        }
        d
    }

    /// Source including the boundary contributions.
    pub fn full_source(&self, mesh: &Mesh) -> Vec<T> {
        let mut b = self.source.clone();
        for (p, coeffs) in self.boundary_coeffs.iter().enumerate() {
            for (cell, &c) in mesh.patch_face_cells(p).zip(coeffs) {
                b[cell] += c;
            }
        }
        b
    }

    /// Implicit under-relaxation with diagonal dominance enforced.
    pub fn relax(&mut self, mesh: &Mesh, psi: &VolField<T>, alpha: f64) {
        if alpha <= 0.0 || alpha >= 1.0 {
            return;
        }
        let d0 = self.full_diag(mesh);
        let mut sum_off = vec![0.0; d0.len()];
        for f in mesh.internal_faces() {
            let face = &mesh.faces[f];
            let Some(n) = face.neighbour else { continue };
            sum_off[face.owner] += self.upper[f].abs();
            sum_off[n] += self.lower[f].abs();
        }
        for c in 0..d0.len() {
            let d = d0[c].abs().max(sum_off[c]) / alpha;
            let delta = d - d0[c];
            self.diag[c] += delta;
            self.source[c] += psi.internal[c] * delta;
        }
    }

    /// Pin `cell` to `value`: `b += D v`, `D *= 2`.
    pub fn set_reference(&mut self, cell: usize, value: T) {
        self.source[cell] += value * self.diag[cell];
        self.diag[cell] += self.diag[cell];
    }

    /// Central coefficient per unit volume.
    pub fn a(&self, mesh: &Mesh) -> Vec<f64> {
        self.full_diag(mesh)
            .into_iter()
            .zip(&mesh.cells)
            .map(|(d, cell)| d / cell.volume)
            .collect()
    }

    /// `(b - sum_N a_N x_N) / V`, the off-diagonal residual.
    pub fn h(&self, mesh: &Mesh, psi: &VolField<T>) -> Vec<T> {
        let mut h = self.full_source(mesh);
        for f in mesh.internal_faces() {
            let face = &mesh.faces[f];
            let Some(n) = face.neighbour else { continue };
            h[face.owner] -= psi.internal[n] * self.upper[f];
            h[n] -= psi.internal[face.owner] * self.lower[f];
        }
        for (v, cell) in h.iter_mut().zip(&mesh.cells) {
            *v = *v * (1.0 / cell.volume);
        }
        h
    }

    /// Face fluxes of the operator evaluated at `psi`.
    pub fn flux(&self, mesh: &Mesh, psi: &VolField<T>) -> SurfaceField<T> {
        let mut flux = SurfaceField::new(&format!("{}Flux", self.field), mesh, T::zero());
        for f in mesh.internal_faces() {
            let face = &mesh.faces[f];
            let Some(n) = face.neighbour else { continue };
            flux.values[f] = psi.internal[n] * self.upper[f] - psi.internal[face.owner] * self.lower[f];
        }
        for (p, patch) in mesh.patches.iter().enumerate() {
            for ((i, f), cell) in patch.faces().enumerate().zip(mesh.patch_face_cells(p)) {
                flux.values[f] =
                    psi.internal[cell] * self.internal_coeffs[p][i] - self.boundary_coeffs[p][i];
            }
        }
        if let Some(corr) = &self.face_flux_correction {
            for (v, &c) in flux.values.iter_mut().zip(corr) {
                *v += c;
            }
        }
        flux
    }

    /// `b - A x` per cell, boundary contributions included.
    pub fn residual(&self, mesh: &Mesh, psi: &VolField<T>) -> Vec<T> {
        let diag = self.full_diag(mesh);
        let mut r = self.full_source(mesh);
        for (c, rc) in r.iter_mut().enumerate() {
            *rc -= psi.internal[c] * diag[c];
        }
        for f in mesh.internal_faces() {
            let face = &mesh.faces[f];
            let Some(n) = face.neighbour else { continue };
            r[face.owner] -= psi.internal[n] * self.upper[f];
            r[n] -= psi.internal[face.owner] * self.lower[f];
        }
        r
    }

    pub fn is_symmetric(&self) -> bool {
        self.upper == self.lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{BoxSpec, create_box_mesh};
    use crate::parallel::NoComm;

    fn line() -> Mesh {
        create_box_mesh(&BoxSpec::line(3, 3.0)).unwrap()
    }

    #[test]
    fn combining_different_fields_fails() {
        let mesh = line();
        let a = FvMatrix::<f64>::new("p", &mesh);
        let b = FvMatrix::<f64>::new("T", &mesh);
        assert_eq!(
            a.add(&b).unwrap_err(),
            AssemblyError::FieldMismatch {
                left: "p".into(),
                right: "T".into()
            }
        );
    }

    #[test]
    fn set_reference_doubles_diagonal() {
        let mesh = line();
        let mut m = FvMatrix::<f64>::new("p", &mesh);
        m.diag = vec![2.0, 3.0, 4.0];
        m.set_reference(1, 5.0);
        assert_eq!(m.diag[1], 6.0);
        assert_eq!(m.source[1], 15.0);
    }

    #[test]
    fn relaxation_keeps_solution_fixed_point() {
        let mesh = line();
        let mut m = FvMatrix::<f64>::new("T", &mesh);
        m.upper = vec![-1.0, -1.0];
        m.lower = vec![-1.0, -1.0];
        m.diag = vec![1.0, 2.0, 1.0];
        let psi = VolField::calculated("T", &mesh, vec![1.0, 2.0, 3.0], &NoComm).unwrap();

        let residual_before: Vec<f64> = (0..3)
            .map(|c| {
                let h = m.h(&mesh, &psi)[c] * mesh.cells[c].volume;
                m.full_diag(&mesh)[c] * psi.internal[c] - h
            })
            .collect();
        m.relax(&mesh, &psi, 0.5);
        let residual_after: Vec<f64> = (0..3)
            .map(|c| {
                let h = m.h(&mesh, &psi)[c] * mesh.cells[c].volume;
                m.full_diag(&mesh)[c] * psi.internal[c] - h
            })
            .collect();
        for (a, b) in residual_before.iter().zip(&residual_after) {
            assert!((a - b).abs() < 1e-12);
        }
        // Row sums of |off| are 1, 2, 1 so the relaxed diagonal is 2, 4, 2.
        assert_eq!(m.diag, vec![2.0, 4.0, 2.0]);
    }

    #[test]
    fn residual_vanishes_at_solution() {
        let mesh = line();
        let mut m = FvMatrix::<f64>::new("T", &mesh);
        m.upper = vec![-1.0, -1.0];
        m.lower = vec![-1.0, -1.0];
        m.diag = vec![2.0, 2.0, 2.0];
        m.source = vec![1.0, 0.0, 1.0];
        let psi = VolField::calculated("T", &mesh, vec![1.0, 1.0, 1.0], &NoComm).unwrap();
        assert!(m.residual(&mesh, &psi).iter().all(|r| r.abs() < 1e-12));
    }

    #[test]
    fn equate_scales_by_volume() {
        let mesh = line();
        let m = FvMatrix::<f64>::new("T", &mesh).equate(&mesh, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(m.source, vec![1.0, 2.0, 3.0]);
        let err = FvMatrix::<f64>::new("T", &mesh).equate(&mesh, &[1.0]).unwrap_err();
        assert!(matches!(err, AssemblyError::SizeMismatch { found: 1, .. }));
    }
}
