//! Headless demo: drop a few bodies onto a floor and log their collisions.
//!
//! Run with `RUST_LOG=info cargo run --manifest-path tether-app/Cargo.toml`
//! (or `debug` for the library's own tracing output).

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use glam::Vec3;
use log::info;
use tether::{
    BodyDesc, ColliderShape, GlobalTransform, PhysicsConfig, PhysicsSystem, Transform,
};

const FRAME_TIME: f64 = 1.0 / 60.0;
const FRAMES: u32 = 300;

#[derive(Debug, Default)]
struct Stats {
    contacts: u64,
    starts: u64,
    ends: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut world = hecs::World::new();
    let mut physics = PhysicsSystem::new(PhysicsConfig::default())?;

    let floor = world.spawn((
        Transform::from_position(Vec3::new(0.0, -0.5, 0.0)),
        GlobalTransform::default(),
    ));
    physics
        .create_body(
            &mut world,
            floor,
            &BodyDesc::new_static(ColliderShape::Box {
                half_extents: Vec3::new(10.0, 0.5, 10.0),
            }),
        )
        .context("creating floor")?;

    let shapes = [
        ColliderShape::Sphere { radius: 0.5 },
        ColliderShape::Box {
            half_extents: Vec3::splat(0.4),
        },
        ColliderShape::Capsule {
            radius: 0.3,
            half_height: 0.4,
        },
    ];
    let mut names = Vec::new();
    for (i, shape) in shapes.iter().cycle().take(6).enumerate() {
        let entity = world.spawn((
            Transform::from_position(Vec3::new(i as f32 * 1.5 - 4.0, 2.0 + i as f32, 0.0)),
            GlobalTransform::default(),
        ));
        let desc = BodyDesc::new_dynamic(shape.clone(), 1.0).with_restitution(0.3);
        physics
            .create_body(&mut world, entity, &desc)
            .with_context(|| format!("creating body {i}"))?;
        names.push((entity, format!("body-{i}")));
    }
    let name_of = Rc::new(move |entity: hecs::Entity| {
        if entity == floor {
            return "floor".to_owned();
        }
        names
            .iter()
            .find(|(e, _)| *e == entity)
            .map_or_else(|| format!("{entity:?}"), |(_, name)| name.clone())
    });

    let stats = Rc::new(RefCell::new(Stats::default()));
    {
        let events = physics.events_mut();

        let sink = Rc::clone(&stats);
        events.on_contact(move |_, _| sink.borrow_mut().contacts += 1);

        let (sink, name) = (Rc::clone(&stats), Rc::clone(&name_of));
        events.on_collision_start(move |entity, result, _| {
            sink.borrow_mut().starts += 1;
            let at = result.contacts.first().map(|c| c.point).unwrap_or_default();
            info!(
                "collisionstart: {} hit {} ({} points, first at {:.2})",
                name(entity),
                name(result.other),
                result.contacts.len(),
                at
            );
        });

        let (sink, name) = (Rc::clone(&stats), Rc::clone(&name_of));
        events.on_collision_end(move |entity, other, _| {
            sink.borrow_mut().ends += 1;
            info!("collisionend: {} left {}", name(entity), name(other));
        });
    }

    for frame in 0..FRAMES {
        // Pull the floor away for the last second so every pair ends.
        if frame == FRAMES - 60 {
            info!("Removing floor");
            physics.remove_body(floor);
        }
        physics.advance(&mut world, FRAME_TIME);
    }

    if let Some(hit) = physics.raycast_first(Vec3::new(0.0, 50.0, 0.0), Vec3::new(0.0, -500.0, 0.0))
    {
        info!(
            "Ray hit {} at {:?} (normal {:?})",
            name_of(hit.entity),
            hit.point,
            hit.normal
        );
    }

    let stats = stats.borrow();
    info!(
        "{} frames: {} contacts, {} starts, {} ends",
        FRAMES, stats.contacts, stats.starts, stats.ends
    );
    Ok(())
}
