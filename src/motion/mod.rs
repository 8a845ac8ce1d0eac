//! Point motion constraints from boundary patches.

pub mod point_constraint;

use crate::discretization::mesh::Mesh;
use glam::DVec3;
use point_constraint::PointConstraint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the points of a patch may move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchMotion {
    Fixed,
    /// Tangential motion only.
    Slip,
    Free,
}

/// Combined constraint of every boundary point.
#[derive(Clone, Debug, Default)]
pub struct PointConstraints {
    pub constraints: HashMap<usize, PointConstraint>,
}

impl PointConstraints {
    /// Accumulate per patch, then combine across patches. Patches without
    /// an entry move freely.
    pub fn from_patches(mesh: &Mesh, motion: &HashMap<String, PatchMotion>) -> Self {
        let mut combined: HashMap<usize, PointConstraint> = HashMap::new();

        for patch in &mesh.patches {
            let kind = motion.get(&patch.name).copied().unwrap_or(PatchMotion::Free);
            if kind == PatchMotion::Free || patch.is_coupled() {
                continue;
            }

            let mut patch_constraints: HashMap<usize, PointConstraint> = HashMap::new();
            match kind {
                PatchMotion::Fixed => {
                    for f in patch.faces() {
                        for &pt in &mesh.faces[f].point_ids {
                            patch_constraints.insert(pt, PointConstraint::fixed());
                        }
                    }
                }
                PatchMotion::Slip => {
                    let mut normals: HashMap<usize, DVec3> = HashMap::new();
                    for f in patch.faces() {
                        let face = &mesh.faces[f];
                        for &pt in &face.point_ids {
                            *normals.entry(pt).or_insert(DVec3::ZERO) += face.area;
                        }
                    }
                    for (pt, n) in normals {
                        let mut pc = PointConstraint::default();
                        pc.apply_constraint(n);
                        patch_constraints.insert(pt, pc);
                    }
                }
                PatchMotion::Free => {}
            }

            for (pt, pc) in patch_constraints {
                combined.entry(pt).or_default().combine(&pc);
            }
        }

        log::debug!("{} constrained boundary points", combined.len());
        Self { constraints: combined }
    }

    pub fn get(&self, point: usize) -> PointConstraint {
        self.constraints.get(&point).copied().unwrap_or_default()
    }

    /// Project each point displacement onto its allowed motion.
    pub fn constrain(&self, displacement: &mut [DVec3]) {
        for (&pt, pc) in &self.constraints {
            if let Some(d) = displacement.get_mut(pt) {
                *d = pc.constrain_displacement(*d);
            }
        }
    }
}
