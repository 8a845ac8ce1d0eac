pub mod matrix;
pub mod solver;
pub mod sparse;
pub mod timing;
pub mod transient;

/// Stopping rule for iterative solvers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Tolerance {
    Absolute(f64),
    Relative(f64),
    Combined(f64, f64),
}

impl Tolerance {
    pub fn check_tolerance(&self, norm: f64, initial_norm: f64) -> bool {
        let relative = |tol: f64| initial_norm > 0.0 && norm / initial_norm < tol;
        match *self {
            Tolerance::Absolute(tol) => norm < tol,
            Tolerance::Relative(tol) => relative(tol),
            Tolerance::Combined(abs_tol, rel_tol) => norm < abs_tol || relative(rel_tol),
        }
    }
}
