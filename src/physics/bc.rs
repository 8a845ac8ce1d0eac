use crate::discretization::field::FieldValue;
use crate::discretization::mesh::Mesh;
use crate::parallel::CommError;
use crate::physics::FrameModel;
use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("field '{field}' has no boundary condition for patch '{patch}'")]
    MissingPatch { field: String, patch: String },
    #[error("patch '{patch}' is not a processor patch and cannot be coupled")]
    NotCoupled { patch: String },
    #[error("patch '{patch}': value fraction {fraction} is outside [0, 1]")]
    InvalidFraction { patch: String, fraction: f64 },
    #[error("patch '{patch}': frame freestream condition needs a vector field")]
    NotAVectorField { patch: String },
    #[error("patch '{patch}': {what} is required to update the condition")]
    MissingInput { patch: String, what: &'static str },
    #[error("patch '{patch}': expected {expected} values, received {found}")]
    SizeMismatch {
        patch: String,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Comm(#[from] CommError),
}

/// Size-free description of a patch condition, keyed by patch name.
///
/// Reads from JSON as `"zeroGradient"`, `{ "fixedValue": [1, 0, 0] }` or
/// `{ "inletOutlet": { "inletValue": 0 } }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BoundarySpec<T> {
    FixedValue(T),
    ZeroGradient,
    FixedGradient(T),
    Mixed {
        ref_value: T,
        ref_grad: T,
        value_fraction: f64,
    },
    /// Fixed `inlet_value` where flow enters, zero gradient where it leaves.
    InletOutlet { inlet_value: T },
    /// Freestream seen from a rotating frame.
    FrameFreestream { freestream: DVec3 },
    Coupled,
}

#[derive(Clone, Debug)]
pub struct MixedState<T> {
    pub ref_value: Vec<T>,
    pub ref_grad: Vec<T>,
    pub value_fraction: Vec<f64>,
}

impl<T: FieldValue> MixedState<T> {
    fn uniform(n: usize, ref_value: T, ref_grad: T, value_fraction: f64) -> Self {
        Self {
            ref_value: vec![ref_value; n],
            ref_grad: vec![ref_grad; n],
            value_fraction: vec![value_fraction; n],
        }
    }
}

#[derive(Clone, Debug)]
pub enum BoundaryCondition<T> {
    FixedValue,
    ZeroGradient,
    FixedGradient { gradient: Vec<T> },
    Mixed(MixedState<T>),
    InletOutlet(MixedState<T>),
    FrameFreestream {
        freestream: DVec3,
        state: MixedState<T>,
    },
    /// Processor interface; the neighbour values lag by one exchange.
    Coupled { neighbour_values: Vec<T> },
}

/// Per-face linear coefficients: `internal * x_P + boundary`.
#[derive(Clone, Debug)]
pub struct Contribution<T> {
    pub internal: Vec<f64>,
    pub boundary: Vec<T>,
}

pub struct UpdateContext<'a> {
    pub mesh: &'a Mesh,
    pub patch: usize,
    /// Face flux on this patch.
    pub face_flux: Option<&'a [f64]>,
    pub time: f64,
    pub frame: Option<&'a dyn FrameModel>,
}

#[derive(Clone, Debug)]
pub struct PatchField<T> {
    pub values: Vec<T>,
    pub condition: BoundaryCondition<T>,
    updated: bool,
}

#[inline]
fn pos0(x: f64) -> f64 {
    if x >= 0.0 { 1.0 } else { 0.0 }
}

impl<T: FieldValue> PatchField<T> {
    pub fn from_spec(
        spec: &BoundarySpec<T>,
        mesh: &Mesh,
        patch: usize,
        internal: &[T],
    ) -> Result<Self, BoundaryError> {
        let p = &mesh.patches[patch];
        let n = p.size;
        let name = || p.name.clone();

        let condition = match spec {
            BoundarySpec::FixedValue(_) => BoundaryCondition::FixedValue,
            BoundarySpec::ZeroGradient => BoundaryCondition::ZeroGradient,
            BoundarySpec::FixedGradient(g) => BoundaryCondition::FixedGradient {
                gradient: vec![*g; n],
            },
            BoundarySpec::Mixed {
                ref_value,
                ref_grad,
                value_fraction,
            } => {
                if !(0.0..=1.0).contains(value_fraction) {
                    return Err(BoundaryError::InvalidFraction {
                        patch: name(),
                        fraction: *value_fraction,
                    });
                }
                BoundaryCondition::Mixed(MixedState::uniform(n, *ref_value, *ref_grad, *value_fraction))
            }
            BoundarySpec::InletOutlet { inlet_value } => {
                BoundaryCondition::InletOutlet(MixedState::uniform(n, *inlet_value, T::zero(), 0.0))
            }
            BoundarySpec::FrameFreestream { freestream } => {
                let value = T::from_vector(*freestream)
                    .ok_or_else(|| BoundaryError::NotAVectorField { patch: name() })?;
                BoundaryCondition::FrameFreestream {
                    freestream: *freestream,
                    state: MixedState::uniform(n, value, T::zero(), 1.0),
                }
            }
            BoundarySpec::Coupled => {
                if !p.is_coupled() {
                    return Err(BoundaryError::NotCoupled { patch: name() });
                }
                BoundaryCondition::Coupled {
                    neighbour_values: mesh.patch_face_cells(patch).map(|c| internal[c]).collect(),
                }
            }
        };

        let values = match spec {
            BoundarySpec::FixedValue(v) => vec![*v; n],
            _ => vec![T::zero(); n],
        };
        let mut field = Self {
            values,
            condition,
            updated: false,
        };
        field.evaluate(mesh, patch, internal);
        Ok(field)
    }

    /// Face value = `internal * x_P + boundary`.
    pub fn value_contribution(&self, mesh: &Mesh, patch: usize) -> Contribution<T> {
        let faces = mesh.patches[patch].faces();
        let n = faces.len();
        let mut internal = Vec::with_capacity(n);
        let mut boundary = Vec::with_capacity(n);

        for (i, f) in faces.enumerate() {
            let g = mesh.geometry(f);
            let (ic, bc) = match &self.condition {
                BoundaryCondition::FixedValue => (0.0, self.values[i]),
                BoundaryCondition::ZeroGradient => (1.0, T::zero()),
                BoundaryCondition::FixedGradient { gradient } => {
                    (1.0, gradient[i] * (1.0 / g.delta_coeff))
                }
                BoundaryCondition::Mixed(s)
                | BoundaryCondition::InletOutlet(s)
                | BoundaryCondition::FrameFreestream { state: s, .. } => {
                    let frac = s.value_fraction[i];
                    (
                        1.0 - frac,
                        s.ref_value[i] * frac + s.ref_grad[i] * ((1.0 - frac) / g.delta_coeff),
                    )
                }
                BoundaryCondition::Coupled { neighbour_values } => {
                    (g.weight, neighbour_values[i] * (1.0 - g.weight))
                }
            };
            internal.push(ic);
            boundary.push(bc);
        }
        Contribution { internal, boundary }
    }

    /// Face-normal gradient = `internal * x_P + boundary`.
    pub fn gradient_contribution(&self, mesh: &Mesh, patch: usize) -> Contribution<T> {
        let faces = mesh.patches[patch].faces();
        let n = faces.len();
        let mut internal = Vec::with_capacity(n);
        let mut boundary = Vec::with_capacity(n);

        for (i, f) in faces.enumerate() {
            let dc = mesh.geometry(f).delta_coeff;
            let (ic, bc) = match &self.condition {
                BoundaryCondition::FixedValue => (-dc, self.values[i] * dc),
                BoundaryCondition::ZeroGradient => (0.0, T::zero()),
                BoundaryCondition::FixedGradient { gradient } => (0.0, gradient[i]),
                BoundaryCondition::Mixed(s)
                | BoundaryCondition::InletOutlet(s)
                | BoundaryCondition::FrameFreestream { state: s, .. } => {
                    let frac = s.value_fraction[i];
                    (
                        -frac * dc,
                        s.ref_value[i] * (frac * dc) + s.ref_grad[i] * (1.0 - frac),
                    )
                }
                BoundaryCondition::Coupled { neighbour_values } => {
                    (-dc, neighbour_values[i] * dc)
                }
            };
            internal.push(ic);
            boundary.push(bc);
        }
        Contribution { internal, boundary }
    }

    /// Recompute flux- or time-dependent coefficients. Repeated calls before
    /// the next [`evaluate`](Self::evaluate) are no-ops.
    pub fn update_coeffs(&mut self, ctx: &UpdateContext) -> Result<(), BoundaryError> {
        if self.updated {
            return Ok(());
        }
        let patch = &ctx.mesh.patches[ctx.patch];

        match &mut self.condition {
            BoundaryCondition::InletOutlet(state) => {
                let flux = ctx.face_flux.ok_or_else(|| BoundaryError::MissingInput {
                    patch: patch.name.clone(),
                    what: "face flux",
                })?;
                for (frac, &phi) in state.value_fraction.iter_mut().zip(flux) {
                    *frac = 1.0 - pos0(phi);
                }
            }
            BoundaryCondition::FrameFreestream { freestream, state } => {
                let frame = ctx.frame.ok_or_else(|| BoundaryError::MissingInput {
                    patch: patch.name.clone(),
                    what: "rotating frame",
                })?;
                let omega = frame.omega();
                let theta = ctx.time * omega.length();
                let axis = frame.axis();
                let rotated = *freestream * theta.cos() + axis.cross(*freestream) * theta.sin();

                for (i, f) in patch.faces().enumerate() {
                    let face = &ctx.mesh.faces[f];
                    let reference = rotated - frame.velocity(face.centroid);
                    state.ref_value[i] = T::from_vector(reference).ok_or_else(|| {
                        BoundaryError::NotAVectorField {
                            patch: patch.name.clone(),
                        }
                    })?;
                    state.value_fraction[i] = 1.0 - pos0(reference.dot(face.area));
                }
            }
            _ => {}
        }

        self.updated = true;
        Ok(())
    }

    /// Recompute face values from the internal field and clear the updated flag.
    pub fn evaluate(&mut self, mesh: &Mesh, patch: usize, internal: &[T]) {
        if !matches!(self.condition, BoundaryCondition::FixedValue) {
            let contrib = self.value_contribution(mesh, patch);
            for ((value, cell), (ic, bc)) in self
                .values
                .iter_mut()
                .zip(mesh.patch_face_cells(patch))
                .zip(contrib.internal.into_iter().zip(contrib.boundary))
            {
                *value = internal[cell] * ic + bc;
            }
        }
        self.updated = false;
    }

    /// Face-normal gradient on the patch.
    pub fn sn_grad(&self, mesh: &Mesh, patch: usize, internal: &[T]) -> Vec<T> {
        let contrib = self.gradient_contribution(mesh, patch);
        mesh.patch_face_cells(patch)
            .zip(contrib.internal.into_iter().zip(contrib.boundary))
            .map(|(cell, (ic, bc))| internal[cell] * ic + bc)
            .collect()
    }

    pub fn set_neighbour_values(&mut self, values: Vec<T>) {
        if let BoundaryCondition::Coupled { neighbour_values } = &mut self.condition {
            *neighbour_values = values;
        }
    }

    /// Overwrite the fixed values of a fixed-value patch.
    pub fn set_fixed_values(&mut self, values: Vec<T>) {
        if matches!(self.condition, BoundaryCondition::FixedValue) && values.len() == self.values.len() {
            self.values = values;
        }
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn is_coupled(&self) -> bool {
        matches!(self.condition, BoundaryCondition::Coupled { .. })
    }

    /// Whether the patch pins the level of the field.
    pub fn fixes_value(&self) -> bool {
        matches!(
            self.condition,
            BoundaryCondition::FixedValue
                | BoundaryCondition::Mixed(_)
                | BoundaryCondition::InletOutlet(_)
                | BoundaryCondition::FrameFreestream { .. }
        )
    }

    /// Whether derived fields may overwrite the patch values.
    pub fn assignable(&self) -> bool {
        !matches!(
            self.condition,
            BoundaryCondition::FixedValue | BoundaryCondition::Mixed(_)
        )
    }

    /// Flow-direction switching conditions; excluded from outflow scaling.
    pub fn is_inlet_outlet(&self) -> bool {
        matches!(
            self.condition,
            BoundaryCondition::InletOutlet(_) | BoundaryCondition::FrameFreestream { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{BoxSpec, create_box_mesh};
    use std::collections::HashMap;

    #[test]
    fn specs_read_from_json() {
        let specs: HashMap<String, BoundarySpec<DVec3>> = serde_json::from_str(
            r#"{
                "inlet": { "fixedValue": [1.0, 0.0, 0.0] },
                "outlet": { "inletOutlet": { "inletValue": [0.0, 0.0, 0.0] } },
                "far": { "frameFreestream": { "freestream": [0.0, 2.0, 0.0] } },
                "walls": "zeroGradient"
            }"#,
        )
        .unwrap();
        assert_eq!(specs["inlet"], BoundarySpec::FixedValue(DVec3::X));
        assert_eq!(specs["outlet"], BoundarySpec::InletOutlet { inlet_value: DVec3::ZERO });
        assert_eq!(specs["far"], BoundarySpec::FrameFreestream { freestream: DVec3::new(0.0, 2.0, 0.0) });
        assert_eq!(specs["walls"], BoundarySpec::ZeroGradient);

        let mixed: BoundarySpec<f64> =
            serde_json::from_str(r#"{ "mixed": { "refValue": 1.0, "refGrad": 0.0, "valueFraction": 0.25 } }"#).unwrap();
        assert!(matches!(mixed, BoundarySpec::Mixed { value_fraction, .. } if value_fraction == 0.25));
    }

    fn right_patch(mesh: &Mesh) -> usize {
        mesh.patch_index("right").unwrap()
    }

    #[test]
    fn fixed_value_contributions() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        let p = right_patch(&mesh);
        let pf = PatchField::from_spec(&BoundarySpec::FixedValue(3.0), &mesh, p, &[0.0, 0.0]).unwrap();

        let v = pf.value_contribution(&mesh, p);
        assert_eq!(v.internal, vec![0.0]);
        assert_eq!(v.boundary, vec![3.0]);

        // Half-cell distance 0.25 gives a delta coefficient of 4.
        let g = pf.gradient_contribution(&mesh, p);
        assert!((g.internal[0] + 4.0).abs() < 1e-12);
        assert!((g.boundary[0] - 12.0).abs() < 1e-12);
    }

    #[test]
    fn mixed_blends_value_and_gradient() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        let p = right_patch(&mesh);
        let spec = BoundarySpec::Mixed {
            ref_value: 2.0,
            ref_grad: 1.0,
            value_fraction: 0.25,
        };
        let pf = PatchField::from_spec(&spec, &mesh, p, &[0.0, 1.0]).unwrap();
        let v = pf.value_contribution(&mesh, p);
        assert!((v.internal[0] - 0.75).abs() < 1e-12);
        assert!((v.boundary[0] - (0.5 + 0.75 * 0.25)).abs() < 1e-12);
        assert!((pf.values[0] - (0.75 + 0.5 + 0.1875)).abs() < 1e-12);
    }

    #[test]
    fn rejects_fraction_outside_unit_interval() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        let spec = BoundarySpec::Mixed {
            ref_value: 0.0,
            ref_grad: 0.0,
            value_fraction: 1.5,
        };
        let err = PatchField::from_spec(&spec, &mesh, 0, &[0.0, 0.0]).unwrap_err();
        assert!(matches!(err, BoundaryError::InvalidFraction { .. }));
    }

    #[test]
    fn coupled_requires_processor_patch() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        let err = PatchField::<f64>::from_spec(&BoundarySpec::Coupled, &mesh, 0, &[0.0, 0.0]).unwrap_err();
        assert!(matches!(err, BoundaryError::NotCoupled { .. }));
    }

    #[test]
    fn update_is_idempotent_until_evaluated() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        let p = right_patch(&mesh);
        let mut pf = PatchField::from_spec(&BoundarySpec::InletOutlet { inlet_value: 5.0 }, &mesh, p, &[1.0, 1.0]).unwrap();

        let inflow = [-1.0];
        let ctx = UpdateContext { mesh: &mesh, patch: p, face_flux: Some(&inflow), time: 0.0, frame: None };
        pf.update_coeffs(&ctx).unwrap();
        assert!(pf.is_updated());

        let outflow = [1.0];
        let ctx = UpdateContext { mesh: &mesh, patch: p, face_flux: Some(&outflow), time: 0.0, frame: None };
        pf.update_coeffs(&ctx).unwrap();
        let v = pf.value_contribution(&mesh, p);
        assert_eq!(v.internal[0], 0.0, "second update before evaluate must be ignored");

        pf.evaluate(&mesh, p, &[1.0, 1.0]);
        assert_eq!(pf.values[0], 5.0);
        pf.update_coeffs(&ctx).unwrap();
        assert_eq!(pf.value_contribution(&mesh, p).internal[0], 1.0);
    }

    #[test]
    fn frame_freestream_needs_frame_and_vector_field() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        let p = right_patch(&mesh);
        let err = PatchField::<f64>::from_spec(
            &BoundarySpec::FrameFreestream { freestream: DVec3::X },
            &mesh,
            p,
            &[0.0, 0.0],
        )
        .unwrap_err();
        assert!(matches!(err, BoundaryError::NotAVectorField { .. }));

        let mut pf = PatchField::from_spec(
            &BoundarySpec::FrameFreestream { freestream: DVec3::X },
            &mesh,
            p,
            &[DVec3::ZERO; 2],
        )
        .unwrap();
        let ctx = UpdateContext { mesh: &mesh, patch: p, face_flux: None, time: 0.0, frame: None };
        assert!(matches!(pf.update_coeffs(&ctx), Err(BoundaryError::MissingInput { .. })));
    }
}
