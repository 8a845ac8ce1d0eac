//! Pressure level control and flux balancing for closed domains.

use super::CouplingError;
use super::controls::PimpleSettings;
use crate::discretization::field::{SurfaceField, VolField};
use crate::discretization::mesh::Mesh;
use crate::numerics::matrix::FvMatrix;
use crate::parallel::{Communicator, ReduceOp};
use crate::physics::bc::{BoundaryError, BoundarySpec};
use glam::DVec3;
use std::collections::HashMap;

const SMALL: f64 = 1e-15;
const VSMALL: f64 = 1e-300;

/// Reference cell fixing the level of a pressure field without fixed-value patches.
#[derive(Clone, Debug, PartialEq)]
pub struct PressureReference {
    /// Local cell index; `Some` only on the partition holding the reference.
    pub cell: Option<usize>,
    pub value: f64,
    /// False when the pressure boundaries already fix the level.
    pub active: bool,
}

impl PressureReference {
    /// Collective: every rank must call it.
    pub fn resolve(
        mesh: &Mesh,
        p: &VolField<f64>,
        settings: &PimpleSettings,
        comm: &dyn Communicator,
    ) -> Result<Self, CouplingError> {
        if !p.needs_reference(comm) {
            return Ok(Self {
                cell: None,
                value: settings.p_ref_value,
                active: false,
            });
        }

        let mut out_of_range = None;
        let cell = if comm.is_master() {
            match settings.p_ref_cell {
                Some(c) if c < mesh.n_cells() => Some(c),
                Some(c) => {
                    out_of_range = Some(c);
                    None
                }
                None => None,
            }
        } else {
            None
        };

        let count = comm.reduce(if cell.is_some() { 1.0 } else { 0.0 }, ReduceOp::Sum).round() as usize;
        if let Some(c) = out_of_range {
            return Err(CouplingError::ReferenceCellOutOfRange {
                cell: c,
                n_cells: mesh.n_cells(),
            });
        }
        if count != 1 {
            return Err(CouplingError::ReferenceCellNotUnique { count });
        }
        if let Some(c) = cell {
            log::debug!("pressure reference cell {c} on rank {}, value {}", comm.rank(), settings.p_ref_value);
        }
        Ok(Self {
            cell,
            value: settings.p_ref_value,
            active: true,
        })
    }

    /// Value of `values` at the reference cell, known on every rank.
    pub fn ref_cell_value(&self, values: &[f64], comm: &dyn Communicator) -> f64 {
        let local = self.cell.map_or(0.0, |c| values[c]);
        comm.reduce(local, ReduceOp::Sum)
    }

    /// Pin the reference cell of a singular system.
    pub fn pin(&self, eqn: &mut FvMatrix<f64>) {
        if let (true, Some(c)) = (self.active, self.cell) {
            eqn.set_reference(c, self.value);
        }
    }

    /// Shift `values` uniformly so the reference cell takes the reference value.
    pub fn shift_to_reference(&self, values: &mut [f64], comm: &dyn Communicator) {
        if !self.active {
            return;
        }
        let shift = self.value - self.ref_cell_value(values, comm);
        for v in values.iter_mut() {
            *v += shift;
        }
    }
}

/// Scale adjustable outflow so the boundary fluxes balance.
///
/// Does nothing unless the pressure needs a reference. Returns true when
/// the domain carries no boundary flux at all.
pub fn adjust_phi(
    mesh: &Mesh,
    phi: &mut SurfaceField<f64>,
    u: &VolField<DVec3>,
    p: &VolField<f64>,
    comm: &dyn Communicator,
) -> Result<bool, CouplingError> {
    if !p.needs_reference(comm) {
        return Ok(false);
    }

    let fixed = |patch: usize| {
        let pf = &u.boundary[patch];
        pf.fixes_value() && !pf.is_inlet_outlet()
    };

    let mut mass_in = 0.0;
    let mut fixed_mass_out = 0.0;
    let mut adjustable_mass_out = 0.0;
    for (i, patch) in mesh.patches.iter().enumerate() {
        if patch.is_coupled() {
            continue;
        }
        let is_fixed = fixed(i);
        for &flux in phi.patch(mesh, i) {
            if flux < 0.0 {
                mass_in -= flux;
            } else if is_fixed {
                fixed_mass_out += flux;
            } else {
                adjustable_mass_out += flux;
            }
        }
    }

    let local_total: f64 = phi.internal(mesh).iter().map(|f| f.abs()).sum();
    let total_flux = VSMALL + comm.reduce(local_total, ReduceOp::Sum);
    let mass_in = comm.reduce(mass_in, ReduceOp::Sum);
    let fixed_mass_out = comm.reduce(fixed_mass_out, ReduceOp::Sum);
    let adjustable_mass_out = comm.reduce(adjustable_mass_out, ReduceOp::Sum);

    let mut mass_corr = 1.0;
    let mag_adjustable = adjustable_mass_out.abs();
    if mag_adjustable > VSMALL && mag_adjustable / total_flux > SMALL {
        mass_corr = (mass_in - fixed_mass_out) / adjustable_mass_out;
    } else if (fixed_mass_out - mass_in).abs() / total_flux > 1e-8 {
        return Err(CouplingError::ContinuityImbalance {
            mass_in,
            fixed_mass_out,
            total_flux,
        });
    }

    for (i, patch) in mesh.patches.iter().enumerate() {
        if patch.is_coupled() || fixed(i) {
            continue;
        }
        for flux in phi.patch_mut(mesh, i) {
            if *flux > 0.0 {
                *flux *= mass_corr;
            }
        }
    }

    Ok(mass_in / total_flux < SMALL
        && fixed_mass_out / total_flux < SMALL
        && mag_adjustable / total_flux < SMALL)
}

/// Wrap `HbyA` in a field whose non-assignable patches keep the velocity
/// boundary values.
pub fn constrain_hbya(
    mesh: &Mesh,
    hbya: Vec<DVec3>,
    u: &VolField<DVec3>,
    comm: &dyn Communicator,
) -> Result<VolField<DVec3>, BoundaryError> {
    let specs: HashMap<String, BoundarySpec<DVec3>> = mesh
        .patches
        .iter()
        .zip(&u.boundary)
        .filter(|(patch, _)| !patch.is_coupled())
        .map(|(patch, pf)| {
            let spec = if pf.assignable() {
                BoundarySpec::ZeroGradient
            } else {
                BoundarySpec::FixedValue(DVec3::ZERO)
            };
            (patch.name.clone(), spec)
        })
        .collect();

    let mut field = VolField::from_internal("HbyA", mesh, hbya, &specs)?;
    for (pf, upf) in field.boundary.iter_mut().zip(&u.boundary) {
        if !upf.assignable() {
            pf.set_fixed_values(upf.values.clone());
        }
    }
    field.correct_boundary_conditions(mesh, comm)?;
    Ok(field)
}
