//! Settings volumes

use crate::pipeline::VolumetricLightSettings;
use bevy_ecs::prelude::*;

/// Per-field overrides carried by a volume; `None` leaves the field alone
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SettingsOverrides {
    pub step_time: Option<f32>,
    pub intensity: Option<f32>,
    pub loop_count: Option<i32>,
    pub spatial_sigma: Option<f32>,
    pub range_sigma: Option<f32>,
    pub kernel_size: Option<f32>,
}

impl SettingsOverrides {
    /// Apply every present override through the clamped setters
    pub fn apply(&self, settings: &mut VolumetricLightSettings) {
        if let Some(value) = self.step_time {
            settings.set_step_time(value);
        }
        if let Some(value) = self.intensity {
            settings.set_intensity(value);
        }
        if let Some(value) = self.loop_count {
            settings.set_loop_count(value);
        }
        if let Some(value) = self.spatial_sigma {
            settings.set_spatial_sigma(value);
        }
        if let Some(value) = self.range_sigma {
            settings.set_range_sigma(value);
        }
        if let Some(value) = self.kernel_size {
            settings.set_kernel_size(value);
        }
    }
}

/// Volume contributing volumetric light overrides
///
/// Higher priorities are applied later and win.
#[derive(Component, Debug, Clone)]
pub struct SettingsVolume {
    pub priority: i32,
    pub enabled: bool,
    pub overrides: SettingsOverrides,
}

impl SettingsVolume {
    pub fn new(priority: i32, overrides: SettingsOverrides) -> Self {
        Self {
            priority,
            enabled: true,
            overrides,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for SettingsVolume {
    fn default() -> Self {
        Self::new(0, SettingsOverrides::default())
    }
}

/// Blend all enabled volumes in `world` into a fresh settings snapshot
///
/// Starts from defaults and applies volumes in ascending priority; equal
/// priorities apply in entity order.
pub fn resolve_settings(world: &mut World) -> VolumetricLightSettings {
    let mut volumes: Vec<(i32, Entity, SettingsOverrides)> = world
        .query::<(Entity, &SettingsVolume)>()
        .iter(world)
        .filter(|(_, volume)| volume.enabled)
        .map(|(entity, volume)| (volume.priority, entity, volume.overrides))
        .collect();
    volumes.sort_by_key(|(priority, entity, _)| (*priority, *entity));

    let mut settings = VolumetricLightSettings::default();
    for (_, _, overrides) in &volumes {
        overrides.apply(&mut settings);
    }

    log::trace!("Resolved {} settings volume(s): {:?}", volumes.len(), settings);
    settings
}
