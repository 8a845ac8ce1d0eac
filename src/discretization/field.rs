use super::mesh::Mesh;
use crate::parallel::{Communicator, ReduceOp};
use crate::physics::FrameModel;
use crate::physics::bc::{BoundaryError, BoundarySpec, PatchField, UpdateContext};
use glam::{DMat3, DVec3};
use std::collections::HashMap;
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Values a field can carry: scalars and 3-vectors.
pub trait FieldValue:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<f64, Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
{
    /// Gradient type; for vectors column `j` holds the gradient of component `j`.
    type Grad: GradValue;
    const N_COMPONENTS: usize;

    fn zero() -> Self;
    fn component(&self, i: usize) -> f64;
    fn set_component(&mut self, i: usize, value: f64);
    fn mag(&self) -> f64;
    /// `sf ⊗ value`, the face contribution to a Gauss gradient.
    fn outer(sf: DVec3, value: Self) -> Self::Grad;
    /// `d · grad`.
    fn directional(d: DVec3, grad: &Self::Grad) -> Self;
    fn from_vector(v: DVec3) -> Option<Self>;
}

pub trait GradValue:
    Copy + Debug + Send + Sync + 'static + Add<Output = Self> + Mul<f64, Output = Self> + AddAssign
{
    fn zero() -> Self;
}

impl GradValue for DVec3 {
    fn zero() -> Self {
        DVec3::ZERO
    }
}

impl GradValue for DMat3 {
    fn zero() -> Self {
        DMat3::ZERO
    }
}

impl FieldValue for f64 {
    type Grad = DVec3;
    const N_COMPONENTS: usize = 1;

    fn zero() -> Self {
        0.0
    }

    fn component(&self, _i: usize) -> f64 {
        *self
    }

    fn set_component(&mut self, _i: usize, value: f64) {
        *self = value;
    }

    fn mag(&self) -> f64 {
        self.abs()
    }

    fn outer(sf: DVec3, value: Self) -> DVec3 {
        sf * value
    }

    fn directional(d: DVec3, grad: &DVec3) -> Self {
        d.dot(*grad)
    }

    fn from_vector(_v: DVec3) -> Option<Self> {
        None
    }
}

impl FieldValue for DVec3 {
    type Grad = DMat3;
    const N_COMPONENTS: usize = 3;

    fn zero() -> Self {
        DVec3::ZERO
    }

    fn component(&self, i: usize) -> f64 {
        self[i]
    }

    fn set_component(&mut self, i: usize, value: f64) {
        self[i] = value;
    }

    fn mag(&self) -> f64 {
        self.length()
    }

    fn outer(sf: DVec3, value: Self) -> DMat3 {
        DMat3::from_cols(sf * value.x, sf * value.y, sf * value.z)
    }

    fn directional(d: DVec3, grad: &DMat3) -> Self {
        DVec3::new(d.dot(grad.x_axis), d.dot(grad.y_axis), d.dot(grad.z_axis))
    }

    fn from_vector(v: DVec3) -> Option<Self> {
        Some(v)
    }
}

/// Cell-centred field with one boundary condition per patch.
#[derive(Clone, Debug)]
pub struct VolField<T: FieldValue> {
    pub name: String,
    pub internal: Vec<T>,
    pub boundary: Vec<PatchField<T>>,
    /// Internal values at the start of the current outer iteration.
    pub prev_iter: Option<Vec<T>>,
}

impl<T: FieldValue> VolField<T> {
    pub fn new(
        name: &str,
        mesh: &Mesh,
        initial: T,
        specs: &HashMap<String, BoundarySpec<T>>,
    ) -> Result<Self, BoundaryError> {
        Self::from_internal(name, mesh, vec![initial; mesh.n_cells()], specs)
    }

    /// Processor patches always get a coupled condition; every other patch
    /// needs an entry in `specs`.
    pub fn from_internal(
        name: &str,
        mesh: &Mesh,
        internal: Vec<T>,
        specs: &HashMap<String, BoundarySpec<T>>,
    ) -> Result<Self, BoundaryError> {
        let coupled = BoundarySpec::Coupled;
        let mut boundary = Vec::with_capacity(mesh.patches.len());
        for (p, patch) in mesh.patches.iter().enumerate() {
            let spec = if patch.is_coupled() {
                &coupled
            } else {
                specs.get(&patch.name).ok_or_else(|| BoundaryError::MissingPatch {
                    field: name.to_string(),
                    patch: patch.name.clone(),
                })?
            };
            boundary.push(PatchField::from_spec(spec, mesh, p, &internal)?);
        }
        Ok(Self {
            name: name.to_string(),
            internal,
            boundary,
            prev_iter: None,
        })
    }

    /// Zero-gradient field, e.g. for `1/A`; coupled patches are exchanged.
    pub fn calculated(
        name: &str,
        mesh: &Mesh,
        internal: Vec<T>,
        comm: &dyn Communicator,
    ) -> Result<Self, BoundaryError> {
        let specs = mesh
            .patches
            .iter()
            .map(|p| (p.name.clone(), BoundarySpec::ZeroGradient))
            .collect();
        let mut field = Self::from_internal(name, mesh, internal, &specs)?;
        field.correct_boundary_conditions(mesh, comm)?;
        Ok(field)
    }

    pub fn n_cells(&self) -> usize {
        self.internal.len()
    }

    pub fn patch_internal(&self, mesh: &Mesh, patch: usize) -> Vec<T> {
        mesh.patch_face_cells(patch)
            .map(|c| self.internal[c])
            .collect()
    }

    /// Refresh flux- and time-dependent coefficients before assembly.
    pub fn update_coeffs(
        &mut self,
        mesh: &Mesh,
        face_flux: Option<&SurfaceField<f64>>,
        time: f64,
        frame: Option<&dyn FrameModel>,
    ) -> Result<(), BoundaryError> {
        for (p, pf) in self.boundary.iter_mut().enumerate() {
            let ctx = UpdateContext {
                mesh,
                patch: p,
                face_flux: face_flux.map(|phi| phi.patch(mesh, p)),
                time,
                frame,
            };
            pf.update_coeffs(&ctx)?;
        }
        Ok(())
    }

    /// Exchange processor-patch values, then evaluate every patch.
    pub fn correct_boundary_conditions(
        &mut self,
        mesh: &Mesh,
        comm: &dyn Communicator,
    ) -> Result<(), BoundaryError> {
        for (p, patch) in mesh.patches.iter().enumerate() {
            if let Some(nb) = patch.neighbour_rank() {
                let mut buf = Vec::with_capacity(patch.size * T::N_COMPONENTS);
                for cell in mesh.patch_face_cells(p) {
                    for c in 0..T::N_COMPONENTS {
                        buf.push(self.internal[cell].component(c));
                    }
                }
                comm.send(nb, &buf)?;
            }
        }

        for (p, patch) in mesh.patches.iter().enumerate() {
            if let Some(nb) = patch.neighbour_rank() {
                let buf = comm.receive(nb)?;
                if buf.len() != patch.size * T::N_COMPONENTS {
                    return Err(BoundaryError::SizeMismatch {
                        patch: patch.name.clone(),
                        expected: patch.size * T::N_COMPONENTS,
                        found: buf.len(),
                    });
                }
                let values = buf
                    .chunks(T::N_COMPONENTS)
                    .map(|chunk| {
                        let mut v = T::zero();
                        for (c, &x) in chunk.iter().enumerate() {
                            v.set_component(c, x);
                        }
                        v
                    })
                    .collect();
                self.boundary[p].set_neighbour_values(values);
            }
        }

        for (p, pf) in self.boundary.iter_mut().enumerate() {
            pf.evaluate(mesh, p, &self.internal);
        }
        Ok(())
    }

    pub fn store_prev_iter(&mut self) {
        self.prev_iter = Some(self.internal.clone());
    }

    /// Explicit under-relaxation towards the stored previous iterate:
    /// `psi = prev + alpha (psi - prev)`. A no-op for `alpha >= 1` or when
    /// nothing was stored.
    pub fn relax(&mut self, mesh: &Mesh, alpha: f64, comm: &dyn Communicator) -> Result<(), BoundaryError> {
        let Some(prev) = self.prev_iter.as_ref() else {
            return Ok(());
        };
        if alpha >= 1.0 {
            return Ok(());
        }
        for (v, &old) in self.internal.iter_mut().zip(prev) {
            *v = old + (*v - old) * alpha;
        }
        self.correct_boundary_conditions(mesh, comm)
    }

    /// True when no patch on any partition fixes the level of the field.
    pub fn needs_reference(&self, comm: &dyn Communicator) -> bool {
        let fixed = self.boundary.iter().any(|pf| pf.fixes_value());
        comm.reduce(if fixed { 1.0 } else { 0.0 }, ReduceOp::Max) < 0.5
    }

    pub fn max_mag(&self, comm: &dyn Communicator) -> f64 {
        let local = self.internal.iter().map(|v| v.mag()).fold(0.0, f64::max);
        comm.reduce(local, ReduceOp::Max)
    }
}

/// One value per face, boundary faces included.
#[derive(Clone, Debug)]
pub struct SurfaceField<T> {
    pub name: String,
    pub values: Vec<T>,
}

impl<T: FieldValue> SurfaceField<T> {
    pub fn new(name: &str, mesh: &Mesh, value: T) -> Self {
        Self {
            name: name.to_string(),
            values: vec![value; mesh.n_faces()],
        }
    }

    pub fn internal<'a>(&'a self, mesh: &Mesh) -> &'a [T] {
        &self.values[mesh.internal_faces()]
    }

    pub fn patch<'a>(&'a self, mesh: &Mesh, patch: usize) -> &'a [T] {
        &self.values[mesh.patches[patch].faces()]
    }

    pub fn patch_mut<'a>(&'a mut self, mesh: &Mesh, patch: usize) -> &'a mut [T] {
        &mut self.values[mesh.patches[patch].faces()]
    }
}

/// Current and previous time level of a quantity.
#[derive(Clone, Debug)]
pub struct TimeLevels<F: Clone> {
    pub current: F,
    pub old: F,
}

impl<F: Clone> TimeLevels<F> {
    pub fn new(current: F) -> Self {
        Self {
            old: current.clone(),
            current,
        }
    }

    /// Called once per time step, before the step modifies `current`.
    pub fn store_old(&mut self) {
        self.old = self.current.clone();
    }
}
