//! Implicit finite-volume operators assembled into [`FvMatrix`] systems.

use crate::discretization::field::{FieldValue, SurfaceField, TimeLevels, VolField};
use crate::discretization::mesh::Mesh;
use crate::numerics::matrix::FvMatrix;
use crate::numerics::timing::record_assembly;
use crate::physics::bc::BoundaryCondition;
use crate::physics::fvc;
use crate::physics::schemes::{ConvectionScheme, DdtScheme};

/// Euler `ddt(psi)`; empty for steady state.
pub fn ddt<T: FieldValue>(
    mesh: &Mesh,
    psi: &TimeLevels<VolField<T>>,
    dt: f64,
    scheme: DdtScheme,
) -> FvMatrix<T> {
    let ones = vec![1.0; mesh.n_cells()];
    ddt_weighted(mesh, &TimeLevels { current: ones.clone(), old: ones }, psi, dt, scheme)
}

/// Euler `ddt(rho, psi)`: `diag = rho V / dt`, `source = rho_old V / dt psi_old`.
pub fn ddt_weighted<T: FieldValue>(
    mesh: &Mesh,
    rho: &TimeLevels<Vec<f64>>,
    psi: &TimeLevels<VolField<T>>,
    dt: f64,
    scheme: DdtScheme,
) -> FvMatrix<T> {
    let mut m = FvMatrix::new(&psi.current.name, mesh);
    if scheme == DdtScheme::SteadyState {
        return m;
    }
    record_assembly(&psi.current.name, || {
        let rdt = 1.0 / dt;
        for (c, cell) in mesh.cells.iter().enumerate() {
            m.diag[c] = rdt * rho.current[c] * cell.volume;
            m.source[c] = psi.old.internal[c] * (rdt * rho.old[c] * cell.volume);
        }
    });
    m
}

/// Convection `div(phi, psi)` with owner weights from `scheme`.
pub fn div<T: FieldValue>(
    mesh: &Mesh,
    phi: &SurfaceField<f64>,
    psi: &VolField<T>,
    scheme: ConvectionScheme,
) -> FvMatrix<T> {
    let mut m = FvMatrix::new(&psi.name, mesh);
    record_assembly(&psi.name, || {
        for f in mesh.internal_faces() {
            let w = scheme.weight(phi.values[f], mesh.geometry(f).weight);
            m.lower[f] = -w * phi.values[f];
            m.upper[f] = m.lower[f] + phi.values[f];
        }
        m.neg_sum_diag(mesh);

        for (p, (pf, patch)) in psi.boundary.iter().zip(&mesh.patches).enumerate() {
            let phi_b = phi.patch(mesh, p);
            match &pf.condition {
                BoundaryCondition::Coupled { neighbour_values } => {
                    for (i, f) in patch.faces().enumerate() {
                        let w = scheme.weight(phi_b[i], mesh.geometry(f).weight);
                        m.internal_coeffs[p][i] = phi_b[i] * w;
                        m.boundary_coeffs[p][i] = -(neighbour_values[i] * (phi_b[i] * (1.0 - w)));
                    }
                }
                _ => {
                    let contrib = pf.value_contribution(mesh, p);
                    for i in 0..patch.size {
                        m.internal_coeffs[p][i] = phi_b[i] * contrib.internal[i];
                        m.boundary_coeffs[p][i] = -(contrib.boundary[i] * phi_b[i]);
                    }
                }
            }
        }
    });
    m
}

/// Diffusion `laplacian(gamma, psi)` with face diffusivity `gamma`.
///
/// With `correct_non_orthogonal` the explicit part `gamma |S| k · (grad psi)_f`
/// moves to the source and is kept for [`FvMatrix::flux`].
pub fn laplacian<T: FieldValue>(
    mesh: &Mesh,
    gamma: &SurfaceField<f64>,
    psi: &VolField<T>,
    correct_non_orthogonal: bool,
) -> FvMatrix<T> {
    let mut m = FvMatrix::new(&psi.name, mesh);
    record_assembly(&psi.name, || {
        for f in mesh.internal_faces() {
            let g = mesh.geometry(f);
            let coeff = gamma.values[f] * g.mag_sf * g.delta_coeff;
            m.upper[f] = coeff;
            m.lower[f] = coeff;
        }
        m.neg_sum_diag(mesh);

        for (p, (pf, patch)) in psi.boundary.iter().zip(&mesh.patches).enumerate() {
            let contrib = pf.gradient_contribution(mesh, p);
            for (i, f) in patch.faces().enumerate() {
                let gamma_mag_sf = gamma.values[f] * mesh.geometry(f).mag_sf;
                m.internal_coeffs[p][i] = gamma_mag_sf * contrib.internal[i];
                m.boundary_coeffs[p][i] = -(contrib.boundary[i] * gamma_mag_sf);
            }
        }

        if correct_non_orthogonal {
            let grad = fvc::grad(mesh, psi);
            let mut correction = vec![T::zero(); mesh.n_faces()];
            for (f, face) in mesh.faces.iter().enumerate() {
                let g = mesh.geometry(f);
                if g.corr_vec == glam::DVec3::ZERO {
                    continue;
                }
                // Processor faces see the owner gradient only.
                let grad_f = match face.neighbour {
                    Some(n) => grad[face.owner] * g.weight + grad[n] * (1.0 - g.weight),
                    None => grad[face.owner],
                };
                let corr = T::directional(g.corr_vec, &grad_f) * (gamma.values[f] * g.mag_sf);
                correction[f] = corr;
                m.source[face.owner] -= corr;
                if let Some(n) = face.neighbour {
                    m.source[n] += corr;
                }
            }
            m.face_flux_correction = Some(correction);
        }
    });
    m
}

/// Laplacian with a uniform diffusivity.
pub fn laplacian_uniform<T: FieldValue>(
    mesh: &Mesh,
    gamma: f64,
    psi: &VolField<T>,
    correct_non_orthogonal: bool,
) -> FvMatrix<T> {
    let gamma_f = SurfaceField::new("gamma", mesh, gamma);
    laplacian(mesh, &gamma_f, psi, correct_non_orthogonal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{BoxSpec, create_box_mesh};
    use crate::parallel::NoComm;
    use crate::physics::bc::BoundarySpec;
    use glam::DVec3;
    use std::collections::HashMap;

    fn line_field(mesh: &Mesh, left: f64, right: f64) -> VolField<f64> {
        let specs = HashMap::from([
            ("left".to_string(), BoundarySpec::FixedValue(left)),
            ("right".to_string(), BoundarySpec::FixedValue(right)),
            ("sides".to_string(), BoundarySpec::ZeroGradient),
        ]);
        VolField::new("T", mesh, 0.0, &specs).unwrap()
    }

    #[test]
    fn euler_ddt_uses_old_level() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 2.0)).unwrap();
        let mut levels = TimeLevels::new(line_field(&mesh, 0.0, 0.0));
        levels.old.internal = vec![3.0, 4.0];
        let m = ddt(&mesh, &levels, 0.5, DdtScheme::Euler);
        assert_eq!(m.diag, vec![2.0, 2.0]);
        assert_eq!(m.source, vec![6.0, 8.0]);

        let steady = ddt(&mesh, &levels, 0.5, DdtScheme::SteadyState);
        assert!(steady.diag.iter().all(|&d| d == 0.0));
    }

    #[test]
    fn laplacian_boundary_coefficients_follow_fixed_values() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        let psi = line_field(&mesh, 0.0, 10.0);
        let m = laplacian_uniform(&mesh, 1.0, &psi, false);
        let right = mesh.patch_index("right").unwrap();
        // |S| = 1, delta = 4 to the face.
        assert!((m.internal_coeffs[right][0] + 4.0).abs() < 1e-12);
        assert!((m.boundary_coeffs[right][0] + 40.0).abs() < 1e-12);
        assert!(m.face_flux_correction.is_none());
    }

    #[test]
    fn upwind_convection_is_diagonally_dominant() {
        let mesh = create_box_mesh(&BoxSpec::line(3, 3.0)).unwrap();
        let psi = line_field(&mesh, 1.0, 0.0);
        let u = VolField::calculated("U", &mesh, vec![DVec3::X; 3], &NoComm).unwrap();
        let phi = fvc::flux(&mesh, &u);
        let m = div(&mesh, &phi, &psi, ConvectionScheme::Upwind);
        assert_eq!(m.upper, vec![0.0, 0.0]);
        assert_eq!(m.lower, vec![-1.0, -1.0]);
        assert_eq!(m.diag[1], 1.0);
    }
}
