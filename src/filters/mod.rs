pub mod bessel;

pub use bessel::{BesselKernel, BesselParams};
