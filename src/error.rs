//! Effect error types

use crate::backend::BackendError;
use crate::resources::{FilterStage, ProgramError};
use thiserror::Error;

/// Errors reported by the volumetric light pass
#[derive(Error, Debug)]
pub enum EffectError {
    /// The filter program could not be built; the effect stays disabled
    #[error("Volumetric light setup failed: {0}")]
    SetupFailure(#[from] ProgramError),
    /// A scratch target could not be allocated; no stage ran
    #[error("Failed to allocate scratch target: {0}")]
    AllocationFailure(#[source] BackendError),
    /// A sub-pass failed; scratch targets were released
    ///
    /// Copies are attributed to the stage whose output they move.
    #[error("Filter stage {stage} failed: {source}")]
    FilterInvocationFailure {
        stage: FilterStage,
        #[source]
        source: BackendError,
    },
}

pub type EffectResult<T> = Result<T, EffectError>;
