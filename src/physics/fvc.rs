//! Explicit finite-volume operators evaluated from current field values.

use crate::discretization::field::{FieldValue, GradValue, SurfaceField, VolField};
use crate::discretization::mesh::Mesh;
use crate::parallel::{Communicator, ReduceOp};
use crate::physics::bc::BoundaryError;
use crate::physics::schemes::ConvectionScheme;
use glam::DVec3;

/// Linear interpolation to faces; boundary faces take the patch values.
pub fn interpolate<T: FieldValue>(mesh: &Mesh, vf: &VolField<T>) -> SurfaceField<T> {
    let mut sf = SurfaceField::new(&format!("interpolate({})", vf.name), mesh, T::zero());
    for f in mesh.internal_faces() {
        let face = &mesh.faces[f];
        let Some(n) = face.neighbour else { continue };
        let w = mesh.geometry(f).weight;
        sf.values[f] = vf.internal[face.owner] * w + vf.internal[n] * (1.0 - w);
    }
    for (p, pf) in vf.boundary.iter().enumerate() {
        sf.patch_mut(mesh, p).copy_from_slice(&pf.values);
    }
    sf
}

/// Flux-directed interpolation of a convected field.
pub fn interpolate_convected<T: FieldValue>(
    mesh: &Mesh,
    phi: &SurfaceField<f64>,
    vf: &VolField<T>,
    scheme: ConvectionScheme,
) -> SurfaceField<T> {
    let mut sf = interpolate(mesh, vf);
    for f in mesh.internal_faces() {
        let face = &mesh.faces[f];
        let Some(n) = face.neighbour else { continue };
        let w = scheme.weight(phi.values[f], mesh.geometry(f).weight);
        sf.values[f] = vf.internal[face.owner] * w + vf.internal[n] * (1.0 - w);
    }
    sf
}

/// Interpolate a cell quantity without its own boundary conditions,
/// extrapolating to walls and exchanging across processor patches.
pub fn interpolate_cells(
    mesh: &Mesh,
    name: &str,
    values: Vec<f64>,
    comm: &dyn Communicator,
) -> Result<SurfaceField<f64>, BoundaryError> {
    let vf = VolField::calculated(name, mesh, values, comm)?;
    Ok(interpolate(mesh, &vf))
}

/// `U_f · S_f`.
pub fn flux(mesh: &Mesh, u: &VolField<DVec3>) -> SurfaceField<f64> {
    face_flux(mesh, &interpolate(mesh, u))
}

pub fn face_flux(mesh: &Mesh, uf: &SurfaceField<DVec3>) -> SurfaceField<f64> {
    SurfaceField {
        name: format!("flux({})", uf.name),
        values: uf
            .values
            .iter()
            .zip(&mesh.faces)
            .map(|(u, face)| u.dot(face.area))
            .collect(),
    }
}

/// Gauss summation of face quantities, per unit volume.
fn surface_sum<T: FieldValue>(mesh: &Mesh, face_values: impl Fn(usize) -> T) -> Vec<T> {
    let mut out = vec![T::zero(); mesh.n_cells()];
    for (f, face) in mesh.faces.iter().enumerate() {
        let v = face_values(f);
        out[face.owner] += v;
        if let Some(n) = face.neighbour {
            out[n] -= v;
        }
    }
    for (o, cell) in out.iter_mut().zip(&mesh.cells) {
        *o = *o * (1.0 / cell.volume);
    }
    out
}

/// Divergence of a face flux.
pub fn div_flux(mesh: &Mesh, phi: &SurfaceField<f64>) -> Vec<f64> {
    surface_sum(mesh, |f| phi.values[f])
}

/// Convective divergence `div(phi, psi)`.
pub fn div<T: FieldValue>(
    mesh: &Mesh,
    phi: &SurfaceField<f64>,
    psi: &VolField<T>,
    scheme: ConvectionScheme,
) -> Vec<T> {
    let psi_f = interpolate_convected(mesh, phi, psi, scheme);
    surface_sum(mesh, |f| psi_f.values[f] * phi.values[f])
}

/// Gauss gradient.
pub fn grad<T: FieldValue>(mesh: &Mesh, vf: &VolField<T>) -> Vec<T::Grad> {
    let vf_f = interpolate(mesh, vf);
    let mut out = vec![<T::Grad as GradValue>::zero(); mesh.n_cells()];
    for (f, face) in mesh.faces.iter().enumerate() {
        let contrib = T::outer(face.area, vf_f.values[f]);
        out[face.owner] += contrib;
        if let Some(n) = face.neighbour {
            out[n] += contrib * -1.0;
        }
    }
    for (g, cell) in out.iter_mut().zip(&mesh.cells) {
        *g = *g * (1.0 / cell.volume);
    }
    out
}

/// Time-consistent flux correction `c (phi_old - U_old_f · S_f) / dt`,
/// with `c = 1 - min(|phi_old - U_old_f · S_f| / (|phi_old| + small), 1)`.
///
/// The correction is zero on non-coupled boundary faces.
pub fn ddt_phi_corr(
    mesh: &Mesh,
    u_old: &VolField<DVec3>,
    phi_old: &SurfaceField<f64>,
    dt: f64,
) -> SurfaceField<f64> {
    const SMALL: f64 = 1e-15;
    let interpolated = flux(mesh, u_old);
    let mut corr = SurfaceField::new("ddtPhiCorr", mesh, 0.0);

    let mut apply = |f: usize| {
        let diff = phi_old.values[f] - interpolated.values[f];
        let coeff = 1.0 - (diff.abs() / (phi_old.values[f].abs() + SMALL)).min(1.0);
        corr.values[f] = coeff * diff / dt;
    };
    for f in mesh.internal_faces() {
        apply(f);
    }
    for patch in mesh.patches.iter().filter(|p| p.is_coupled()) {
        for f in patch.faces() {
            apply(f);
        }
    }
    corr
}

/// `div(phi, 0.5 |U|^2)`.
pub fn kinetic_energy_div(mesh: &Mesh, phi: &SurfaceField<f64>, u: &VolField<DVec3>) -> Vec<f64> {
    let uf = interpolate(mesh, u);
    let mut k_f: Vec<f64> = Vec::with_capacity(mesh.n_faces());
    for (f, face) in mesh.faces.iter().enumerate() {
        let k = match face.neighbour {
            Some(n) => {
                let w = mesh.geometry(f).weight;
                0.5 * (w * u.internal[face.owner].length_squared()
                    + (1.0 - w) * u.internal[n].length_squared())
            }
            None => 0.5 * uf.values[f].length_squared(),
        };
        k_f.push(k);
    }
    surface_sum(mesh, |f| k_f[f] * phi.values[f])
}

/// Volume-weighted mean over all partitions.
pub fn weighted_average(mesh: &Mesh, values: &[f64], comm: &dyn Communicator) -> f64 {
    let local: f64 = values.iter().zip(&mesh.cells).map(|(v, c)| v * c.volume).sum();
    let total = comm.reduce(local, ReduceOp::Sum);
    let volume = comm.reduce(mesh.total_volume(), ReduceOp::Sum);
    total / volume
}

/// Mean and maximum cell Courant number `0.5 dt sum|phi| / V`.
pub fn courant_number(mesh: &Mesh, phi: &SurfaceField<f64>, dt: f64, comm: &dyn Communicator) -> (f64, f64) {
    let mut sum_phi = vec![0.0; mesh.n_cells()];
    for (face, &flux) in mesh.faces.iter().zip(&phi.values) {
        sum_phi[face.owner] += flux.abs();
        if let Some(n) = face.neighbour {
            sum_phi[n] += flux.abs();
        }
    }
    let local_max = sum_phi
        .iter()
        .zip(&mesh.cells)
        .map(|(s, cell)| s / cell.volume)
        .fold(0.0, f64::max);
    let total_phi = comm.reduce(sum_phi.iter().sum(), ReduceOp::Sum);
    let total_volume = comm.reduce(mesh.total_volume(), ReduceOp::Sum);
    let mean = 0.5 * dt * total_phi / total_volume;
    let max = 0.5 * dt * comm.reduce(local_max, ReduceOp::Max);
    (mean, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{BoxSpec, create_box_mesh};
    use crate::parallel::NoComm;
    use approx::assert_relative_eq;

    fn linear_field(mesh: &Mesh) -> VolField<f64> {
        let values = mesh.cells.iter().map(|c| 2.0 * c.centroid.x + 3.0 * c.centroid.y).collect();
        let mut vf = VolField::calculated("s", mesh, values, &NoComm).unwrap();
        // Exact boundary values make the Gauss gradient exact.
        for (p, patch) in mesh.patches.iter().enumerate() {
            for (i, f) in patch.faces().enumerate() {
                let x = mesh.faces[f].centroid;
                vf.boundary[p].values[i] = 2.0 * x.x + 3.0 * x.y;
            }
        }
        vf
    }

    #[test]
    fn gauss_gradient_is_exact_for_linear_fields() {
        let mesh = create_box_mesh(&BoxSpec::new(DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0), [4, 3, 1])).unwrap();
        let vf = linear_field(&mesh);
        for g in grad(&mesh, &vf) {
            assert_relative_eq!(g.x, 2.0, epsilon = 1e-10);
            assert_relative_eq!(g.y, 3.0, epsilon = 1e-10);
            assert_relative_eq!(g.z, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn uniform_velocity_is_divergence_free() {
        let mesh = create_box_mesh(&BoxSpec::new(DVec3::ZERO, DVec3::ONE, [3, 3, 3]).with_skew(0.2)).unwrap();
        let u = VolField::calculated("U", &mesh, vec![DVec3::new(1.0, -2.0, 0.5); 27], &NoComm).unwrap();
        let phi = flux(&mesh, &u);
        for d in div_flux(&mesh, &phi) {
            assert!(d.abs() < 1e-10);
        }
    }

    #[test]
    fn ddt_correction_vanishes_for_consistent_flux() {
        let mesh = create_box_mesh(&BoxSpec::line(4, 1.0)).unwrap();
        let u = VolField::calculated("U", &mesh, vec![DVec3::X; 4], &NoComm).unwrap();
        let phi = flux(&mesh, &u);
        let corr = ddt_phi_corr(&mesh, &u, &phi, 0.1);
        assert!(corr.values.iter().all(|c| c.abs() < 1e-12));
    }

    #[test]
    fn courant_number_of_uniform_flow() {
        let mesh = create_box_mesh(&BoxSpec::line(4, 1.0)).unwrap();
        let u = VolField::calculated("U", &mesh, vec![DVec3::X * 2.0; 4], &NoComm).unwrap();
        let phi = flux(&mesh, &u);
        // dx = 0.25, |U| = 2, dt = 0.05 gives Co = 0.4.
        let (mean, max) = courant_number(&mesh, &phi, 0.05, &NoComm);
        assert_relative_eq!(max, 0.4, epsilon = 1e-12);
        assert_relative_eq!(mean, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn weighted_average_uses_volumes() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        assert_relative_eq!(weighted_average(&mesh, &[1.0, 3.0], &NoComm), 2.0);
    }
}
