pub mod coupling;
pub mod discretization;
pub mod error;
pub mod models;
pub mod motion;
pub mod numerics;
pub mod parallel;
pub mod physics;
pub mod processing;

pub use error::FvError;
