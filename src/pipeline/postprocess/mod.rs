//! Post-processing effects

mod volumetric_light;

pub use volumetric_light::*;
