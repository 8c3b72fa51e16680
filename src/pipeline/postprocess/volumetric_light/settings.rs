//! Tunable parameters of the volumetric light effect

use std::ops::RangeInclusive;

pub const STEP_TIME_RANGE: RangeInclusive<f32> = 1.0..=64.0;
pub const INTENSITY_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const LOOP_COUNT_RANGE: RangeInclusive<u32> = 1..=10;
pub const SPATIAL_SIGMA_RANGE: RangeInclusive<f32> = 0.1..=5.0;
pub const RANGE_SIGMA_RANGE: RangeInclusive<f32> = 0.1..=5.0;
pub const KERNEL_SIZE_RANGE: RangeInclusive<f32> = 0.1..=30.0;

/// Names under which the scalar parameters are pushed to the filter
pub const STEP_TIME_BINDING: &str = "step_time";
pub const INTENSITY_BINDING: &str = "intensity";
pub const SPATIAL_SIGMA_BINDING: &str = "space_sigma";
pub const RANGE_SIGMA_BINDING: &str = "range_sigma";
pub const KERNEL_SIZE_BINDING: &str = "kernel_size";

/// Float parameter clamped to an inclusive range on every assignment
#[derive(Debug, Clone, PartialEq)]
pub struct ClampedFloat {
    value: f32,
    range: RangeInclusive<f32>,
}

impl ClampedFloat {
    pub fn new(value: f32, range: RangeInclusive<f32>) -> Self {
        let mut parameter = Self {
            value: *range.start(),
            range,
        };
        parameter.set(value);
        parameter
    }

    /// NaN lands on the range minimum
    pub fn set(&mut self, value: f32) {
        self.value = if value.is_nan() {
            *self.range.start()
        } else {
            value.clamp(*self.range.start(), *self.range.end())
        };
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn min(&self) -> f32 {
        *self.range.start()
    }

    pub fn max(&self) -> f32 {
        *self.range.end()
    }
}

/// Integer parameter clamped to an inclusive range on every assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClampedInt {
    value: u32,
    range: RangeInclusive<u32>,
}

impl ClampedInt {
    pub fn new(value: i32, range: RangeInclusive<u32>) -> Self {
        let mut parameter = Self {
            value: *range.start(),
            range,
        };
        parameter.set(value);
        parameter
    }

    pub fn set(&mut self, value: i32) {
        let clamped = i64::from(value).clamp(
            i64::from(*self.range.start()),
            i64::from(*self.range.end()),
        );
        self.value = clamped as u32;
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn min(&self) -> u32 {
        *self.range.start()
    }

    pub fn max(&self) -> u32 {
        *self.range.end()
    }
}

/// Per-frame snapshot of the volumetric light configuration
///
/// Every field stays inside its range no matter how it was assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumetricLightSettings {
    step_time: ClampedFloat,
    intensity: ClampedFloat,
    loop_count: ClampedInt,
    spatial_sigma: ClampedFloat,
    range_sigma: ClampedFloat,
    kernel_size: ClampedFloat,
}

impl Default for VolumetricLightSettings {
    fn default() -> Self {
        Self {
            step_time: ClampedFloat::new(8.0, STEP_TIME_RANGE),
            intensity: ClampedFloat::new(0.0, INTENSITY_RANGE),
            loop_count: ClampedInt::new(3, LOOP_COUNT_RANGE),
            spatial_sigma: ClampedFloat::new(0.3, SPATIAL_SIGMA_RANGE),
            range_sigma: ClampedFloat::new(0.3, RANGE_SIGMA_RANGE),
            kernel_size: ClampedFloat::new(0.5, KERNEL_SIZE_RANGE),
        }
    }
}

impl VolumetricLightSettings {
    /// The filter reads neighbouring pixels, so it cannot run on partial tiles
    pub const SUPPORTS_TILING: bool = false;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn supports_tiling() -> bool {
        Self::SUPPORTS_TILING
    }

    /// The effect only runs with a positive intensity
    pub fn is_active(&self) -> bool {
        self.intensity.value() > 0.0
    }

    pub fn step_time(&self) -> f32 {
        self.step_time.value()
    }

    pub fn intensity(&self) -> f32 {
        self.intensity.value()
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count.value()
    }

    pub fn spatial_sigma(&self) -> f32 {
        self.spatial_sigma.value()
    }

    pub fn range_sigma(&self) -> f32 {
        self.range_sigma.value()
    }

    pub fn kernel_size(&self) -> f32 {
        self.kernel_size.value()
    }

    pub fn set_step_time(&mut self, value: f32) {
        self.step_time.set(value);
    }

    pub fn set_intensity(&mut self, value: f32) {
        self.intensity.set(value);
    }

    pub fn set_loop_count(&mut self, value: i32) {
        self.loop_count.set(value);
    }

    pub fn set_spatial_sigma(&mut self, value: f32) {
        self.spatial_sigma.set(value);
    }

    pub fn set_range_sigma(&mut self, value: f32) {
        self.range_sigma.set(value);
    }

    pub fn set_kernel_size(&mut self, value: f32) {
        self.kernel_size.set(value);
    }

    pub fn with_step_time(mut self, value: f32) -> Self {
        self.set_step_time(value);
        self
    }

    pub fn with_intensity(mut self, value: f32) -> Self {
        self.set_intensity(value);
        self
    }

    pub fn with_loop_count(mut self, value: i32) -> Self {
        self.set_loop_count(value);
        self
    }

    pub fn with_spatial_sigma(mut self, value: f32) -> Self {
        self.set_spatial_sigma(value);
        self
    }

    pub fn with_range_sigma(mut self, value: f32) -> Self {
        self.set_range_sigma(value);
        self
    }

    pub fn with_kernel_size(mut self, value: f32) -> Self {
        self.set_kernel_size(value);
        self
    }

    /// Scalar parameters pushed to the filter before the first stage
    pub fn filter_bindings(&self) -> [(&'static str, f32); 5] {
        [
            (STEP_TIME_BINDING, self.step_time()),
            (INTENSITY_BINDING, self.intensity()),
            (SPATIAL_SIGMA_BINDING, self.spatial_sigma()),
            (RANGE_SIGMA_BINDING, self.range_sigma()),
            (KERNEL_SIZE_BINDING, self.kernel_size()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_authoring_defaults() {
        let settings = VolumetricLightSettings::default();
        assert_eq!(settings.step_time(), 8.0);
        assert_eq!(settings.intensity(), 0.0);
        assert_eq!(settings.loop_count(), 3);
        assert_eq!(settings.spatial_sigma(), 0.3);
        assert_eq!(settings.range_sigma(), 0.3);
        assert_eq!(settings.kernel_size(), 0.5);
        assert!(!settings.is_active());
    }

    #[test]
    fn setters_clamp_into_range() {
        let mut settings = VolumetricLightSettings::new();

        settings.set_loop_count(50);
        assert_eq!(settings.loop_count(), 10);
        settings.set_loop_count(-4);
        assert_eq!(settings.loop_count(), 1);
        settings.set_loop_count(i32::MIN);
        assert_eq!(settings.loop_count(), 1);

        settings.set_intensity(-1.0);
        assert_eq!(settings.intensity(), 0.0);
        settings.set_intensity(7.5);
        assert_eq!(settings.intensity(), 1.0);

        settings.set_step_time(0.0);
        assert_eq!(settings.step_time(), 1.0);
        settings.set_step_time(1000.0);
        assert_eq!(settings.step_time(), 64.0);

        settings.set_spatial_sigma(0.0);
        assert_eq!(settings.spatial_sigma(), 0.1);
        settings.set_range_sigma(f32::INFINITY);
        assert_eq!(settings.range_sigma(), 5.0);

        settings.set_kernel_size(-3.0);
        assert_eq!(settings.kernel_size(), 0.1);
        settings.set_kernel_size(31.0);
        assert_eq!(settings.kernel_size(), 30.0);
    }

    #[test]
    fn every_input_lands_in_range() {
        let inputs = [
            f32::NEG_INFINITY,
            -1e9,
            -1.0,
            0.0,
            0.05,
            0.5,
            1.0,
            4.99,
            17.0,
            64.0,
            1e9,
            f32::INFINITY,
            f32::NAN,
        ];

        for input in inputs {
            let settings = VolumetricLightSettings::new()
                .with_step_time(input)
                .with_intensity(input)
                .with_spatial_sigma(input)
                .with_range_sigma(input)
                .with_kernel_size(input);

            assert!(STEP_TIME_RANGE.contains(&settings.step_time()), "{input}");
            assert!(INTENSITY_RANGE.contains(&settings.intensity()), "{input}");
            assert!(SPATIAL_SIGMA_RANGE.contains(&settings.spatial_sigma()), "{input}");
            assert!(RANGE_SIGMA_RANGE.contains(&settings.range_sigma()), "{input}");
            assert!(KERNEL_SIZE_RANGE.contains(&settings.kernel_size()), "{input}");
        }

        for input in [i32::MIN, -1, 0, 1, 5, 10, 11, i32::MAX] {
            let settings = VolumetricLightSettings::new().with_loop_count(input);
            assert!(LOOP_COUNT_RANGE.contains(&settings.loop_count()), "{input}");
        }
    }

    #[test]
    fn active_iff_intensity_positive() {
        let mut settings = VolumetricLightSettings::new();
        assert!(!settings.is_active());

        for intensity in [f32::MIN_POSITIVE, 0.25, 1.0] {
            settings.set_intensity(intensity);
            assert!(settings.is_active());
        }

        settings.set_intensity(0.0);
        assert!(!settings.is_active());
    }

    #[test]
    fn tiling_is_never_supported() {
        assert!(!VolumetricLightSettings::supports_tiling());
    }

    #[test]
    fn filter_bindings_follow_current_values() {
        let settings = VolumetricLightSettings::new()
            .with_step_time(16.0)
            .with_intensity(0.5)
            .with_spatial_sigma(1.5)
            .with_range_sigma(2.0)
            .with_kernel_size(4.0);

        assert_eq!(
            settings.filter_bindings(),
            [
                ("step_time", 16.0),
                ("intensity", 0.5),
                ("space_sigma", 1.5),
                ("range_sigma", 2.0),
                ("kernel_size", 4.0),
            ]
        );
    }
}
