//! Scene-side configuration
//!
//! Settings volumes are `bevy_ecs` components; [`resolve_settings`] blends
//! them into the snapshot a frame runs with.

mod volume;

pub use volume::*;
