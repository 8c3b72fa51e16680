//! Volumetric light effect
//!
//! [`VolumetricLightSettings`] is the per-frame parameter snapshot and
//! [`VolumetricLightPass`] runs the extraction, blur and composite stages.
//! [`VolumetricLightKernels`] runs the same stages on the CPU.

mod kernels;
mod pass;
mod settings;

pub use kernels::*;
pub use pass::*;
pub use settings::*;
