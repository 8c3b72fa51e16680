//! Backend abstraction layer
//!
//! Provides the [`FilterContext`] trait and the contexts that implement it:
//! - [`HeadlessContext`]: CPU images, operation log and fault injection
//! - `WgpuFilterContext`: offscreen wgpu device (`wgpu-backend` feature)

pub mod headless;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use headless::{FilterCommand, HeadlessContext, IdentityKernel, StageInput, StageKernel};
pub use traits::*;
pub use types::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuFilterContext;
