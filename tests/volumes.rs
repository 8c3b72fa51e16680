//! Settings volumes driving the feature, frame by frame.

mod common;

use bevy_ecs::world::World;
use common::test_pattern;
use rstest::rstest;
use volumetric_light::backend::{HeadlessContext, TextureFormat};
use volumetric_light::{
    resolve_settings, CameraFrame, SettingsOverrides, SettingsVolume, VolumetricLightFeature,
};

fn volume(priority: i32, overrides: SettingsOverrides) -> SettingsVolume {
    SettingsVolume::new(priority, overrides)
}

#[rstest]
#[case::later_priority_wins(vec![(0, 0.2), (5, 0.6)], 0.6)]
#[case::order_of_spawn_is_irrelevant(vec![(5, 0.6), (0, 0.2)], 0.6)]
#[case::negative_priority_loses(vec![(-1, 0.9), (0, 0.3)], 0.3)]
#[case::clamped(vec![(0, 4.0)], 1.0)]
fn intensity_resolution(#[case] volumes: Vec<(i32, f32)>, #[case] expected: f32) {
    let mut world = World::new();
    for (priority, intensity) in volumes {
        world.spawn(volume(
            priority,
            SettingsOverrides {
                intensity: Some(intensity),
                ..Default::default()
            },
        ));
    }

    assert_eq!(resolve_settings(&mut world).intensity(), expected);
}

#[test]
fn equal_priorities_apply_in_spawn_order() {
    let mut world = World::new();
    world.spawn(volume(
        1,
        SettingsOverrides {
            loop_count: Some(2),
            ..Default::default()
        },
    ));
    world.spawn(volume(
        1,
        SettingsOverrides {
            loop_count: Some(7),
            ..Default::default()
        },
    ));

    assert_eq!(resolve_settings(&mut world).loop_count(), 7);
}

#[test]
fn untouched_fields_keep_defaults() {
    let mut world = World::new();
    world.spawn(volume(
        0,
        SettingsOverrides {
            range_sigma: Some(2.0),
            ..Default::default()
        },
    ));

    let settings = resolve_settings(&mut world);
    assert_eq!(settings.range_sigma(), 2.0);
    assert_eq!(settings.step_time(), 8.0);
    assert_eq!(settings.loop_count(), 3);
    assert_eq!(settings.kernel_size(), 0.5);
}

#[test]
fn toggling_a_volume_switches_the_effect_between_frames() {
    common::init_logging();
    let mut world = World::new();
    let entity = world
        .spawn(volume(
            0,
            SettingsOverrides {
                intensity: Some(0.5),
                loop_count: Some(1),
                ..Default::default()
            },
        ))
        .id();

    let mut ctx = HeadlessContext::new();
    let source = ctx.insert_image(test_pattern(8, 8), TextureFormat::Rgba8Unorm);
    let frame = CameraFrame::new(source);
    let mut feature = VolumetricLightFeature::default();

    feature
        .render_frame(&mut ctx, &frame, &resolve_settings(&mut world))
        .unwrap();
    assert_eq!(ctx.buffer_operations().len(), 5);

    if let Some(mut volume) = world.get_mut::<SettingsVolume>(entity) {
        volume.enabled = false;
    }
    ctx.clear_commands();

    feature
        .render_frame(&mut ctx, &frame, &resolve_settings(&mut world))
        .unwrap();
    assert!(ctx.commands().is_empty());
}
