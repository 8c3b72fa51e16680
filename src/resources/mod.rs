//! Resource management
//!
//! Handles loading and validation of filter programs.

mod program;

pub use program::*;
