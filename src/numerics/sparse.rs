//! Compressed-row matrices and Jacobi-preconditioned Krylov solvers.
//!
//! Residuals are measured as `sum |b - A x| / norm_factor`, so the stopping
//! rule matches the normalised residual reported by the equation solver.

use crate::discretization::mesh::Mesh;
use crate::numerics::Tolerance;
use nalgebra::{DMatrix, DVector};

const BREAKDOWN: f64 = 1e-300;

#[derive(Clone, Debug)]
pub struct CsrMatrix {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Assemble from owner/neighbour coefficients: row `owner` receives
    /// `upper[f]` in column `neighbour`, row `neighbour` receives `lower[f]`.
    pub fn from_ldu(mesh: &Mesh, diag: &[f64], lower: &[f64], upper: &[f64]) -> Self {
        let n = diag.len();
        let mut rows: Vec<Vec<(usize, f64)>> = diag.iter().enumerate().map(|(c, &d)| vec![(c, d)]).collect();
        for f in mesh.internal_faces() {
            let face = &mesh.faces[f];
            let Some(nb) = face.neighbour else { continue };
            rows[face.owner].push((nb, upper[f]));
            rows[nb].push((face.owner, lower[f]));
        }

        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for mut row in rows {
            row.sort_by_key(|&(col, _)| col);
            for (col, v) in row {
                col_idx.push(col);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }

        Self {
            n,
            row_ptr,
            col_idx,
            values,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn mul_vec(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        for row in 0..self.n {
            let mut sum = 0.0;
            for k in self.row_ptr[row]..self.row_ptr[row + 1] {
                sum += self.values[k] * x[self.col_idx[k]];
            }
            y[row] = sum;
        }
    }

    pub fn diagonal(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.n,
            (0..self.n).map(|row| {
                (self.row_ptr[row]..self.row_ptr[row + 1])
                    .find(|&k| self.col_idx[k] == row)
                    .map_or(0.0, |k| self.values[k])
            }),
        )
    }

    pub fn row_sums(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.n,
            (0..self.n).map(|row| self.values[self.row_ptr[row]..self.row_ptr[row + 1]].iter().sum()),
        )
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(self.n, self.n);
        for row in 0..self.n {
            for k in self.row_ptr[row]..self.row_ptr[row + 1] {
                m[(row, self.col_idx[k])] += self.values[k];
            }
        }
        m
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KrylovStatus {
    Converged,
    MaxIterationsReached,
    Breakdown,
}

#[derive(Clone, Copy, Debug)]
pub struct KrylovControl {
    pub tolerance: Tolerance,
    pub max_iter: usize,
    pub norm_factor: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct KrylovResult {
    pub status: KrylovStatus,
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
}

fn jacobi(a: &CsrMatrix) -> DVector<f64> {
    a.diagonal().map(|d| if d.abs() > BREAKDOWN { 1.0 / d } else { 1.0 })
}

fn residual(a: &CsrMatrix, b: &DVector<f64>, x: &DVector<f64>, work: &mut DVector<f64>) -> DVector<f64> {
    a.mul_vec(x, work);
    b - &*work
}

fn normalised(r: &DVector<f64>, control: &KrylovControl) -> f64 {
    r.lp_norm(1) / control.norm_factor
}

/// Jacobi-preconditioned conjugate gradients, for symmetric matrices.
pub fn pcg(a: &CsrMatrix, b: &DVector<f64>, x: &mut DVector<f64>, control: &KrylovControl) -> KrylovResult {
    let n = a.n_rows();
    let inv_diag = jacobi(a);
    let mut ap = DVector::zeros(n);
    let mut r = residual(a, b, x, &mut ap);

    let initial = normalised(&r, control);
    let mut result = KrylovResult {
        status: KrylovStatus::Converged,
        iterations: 0,
        initial_residual: initial,
        final_residual: initial,
    };
    if control.tolerance.check_tolerance(initial, initial) || initial == 0.0 {
        return result;
    }

    let mut z = r.component_mul(&inv_diag);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for it in 1..=control.max_iter {
        a.mul_vec(&p, &mut ap);
        let pap = p.dot(&ap);
        if pap.abs() < BREAKDOWN {
            result.status = KrylovStatus::Breakdown;
            return result;
        }
        let alpha = rz / pap;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &ap, 1.0);

        result.iterations = it;
        result.final_residual = normalised(&r, control);
        log::trace!("PCG iteration {it}: residual {:.3e}", result.final_residual);
        if control.tolerance.check_tolerance(result.final_residual, initial) {
            return result;
        }

        z = r.component_mul(&inv_diag);
        let rz_new = r.dot(&z);
        let beta = rz_new / rz;
        rz = rz_new;
        p.axpy(1.0, &z, beta);
    }

    result.status = KrylovStatus::MaxIterationsReached;
    result
}

/// Right-preconditioned BiCGStab, for asymmetric matrices.
pub fn bicgstab(a: &CsrMatrix, b: &DVector<f64>, x: &mut DVector<f64>, control: &KrylovControl) -> KrylovResult {
    let n = a.n_rows();
    let inv_diag = jacobi(a);
    let mut v = DVector::zeros(n);
    let mut r = residual(a, b, x, &mut v);
    v.fill(0.0);

    let initial = normalised(&r, control);
    let mut result = KrylovResult {
        status: KrylovStatus::Converged,
        iterations: 0,
        initial_residual: initial,
        final_residual: initial,
    };
    if control.tolerance.check_tolerance(initial, initial) || initial == 0.0 {
        return result;
    }

    let r0 = r.clone();
    let mut p = DVector::zeros(n);
    let mut t = DVector::zeros(n);
    let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);

    for it in 1..=control.max_iter {
        let rho_new = r0.dot(&r);
        if rho_new.abs() < BREAKDOWN {
            result.status = KrylovStatus::Breakdown;
            return result;
        }
        let beta = (rho_new / rho) * (alpha / omega);
        rho = rho_new;

        // p = r + beta * (p - omega * v)
        p.axpy(-omega, &v, 1.0);
        p.axpy(1.0, &r, beta);

        let p_hat = p.component_mul(&inv_diag);
        a.mul_vec(&p_hat, &mut v);
        let r0v = r0.dot(&v);
        if r0v.abs() < BREAKDOWN {
            result.status = KrylovStatus::Breakdown;
            return result;
        }
        alpha = rho / r0v;

        let mut s = r.clone();
        s.axpy(-alpha, &v, 1.0);
        result.iterations = it;

        let s_res = normalised(&s, control);
        if control.tolerance.check_tolerance(s_res, initial) {
            x.axpy(alpha, &p_hat, 1.0);
            result.final_residual = s_res;
            return result;
        }

        let s_hat = s.component_mul(&inv_diag);
        a.mul_vec(&s_hat, &mut t);
        let tt = t.dot(&t);
        omega = if tt > BREAKDOWN { t.dot(&s) / tt } else { 0.0 };

        x.axpy(alpha, &p_hat, 1.0);
        x.axpy(omega, &s_hat, 1.0);
        r = s;
        r.axpy(-omega, &t, 1.0);

        result.final_residual = normalised(&r, control);
        log::trace!("BiCGStab iteration {it}: residual {:.3e}", result.final_residual);
        if control.tolerance.check_tolerance(result.final_residual, initial) {
            return result;
        }
        if omega.abs() < BREAKDOWN {
            result.status = KrylovStatus::Breakdown;
            return result;
        }
    }

    result.status = KrylovStatus::MaxIterationsReached;
    result
}
