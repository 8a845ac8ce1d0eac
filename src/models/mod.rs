pub mod cavity;
pub mod perfect_gas;
pub mod srf;
pub mod transport;
