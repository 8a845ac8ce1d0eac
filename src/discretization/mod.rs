pub mod field;
pub mod generator;
pub mod mesh;
