mod common;

use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_abs_diff_eq;
use common::ScriptedBackend;
use tether::ecs::components::physics::{BodyDesc, ColliderShape, PhysicsBody};
use tether::ecs::components::transform::{GlobalTransform, Transform};
use tether::glam::Vec3;
use tether::hecs::{Entity, World};
use tether::{
    CollisionEventKind, ConstraintDesc, PhysicsConfig, PhysicsError, PhysicsSystem, Pose, RayHit,
};

const DT: f64 = 1.0 / 60.0;

fn config(gravity: Vec3) -> PhysicsConfig {
    PhysicsConfig {
        gravity,
        ..Default::default()
    }
}

fn spawn_floor(world: &mut World, system: &mut PhysicsSystem) -> Entity {
    let floor = world.spawn((
        Transform::from_position(Vec3::new(0.0, -0.5, 0.0)),
        GlobalTransform::default(),
    ));
    system
        .create_body(
            world,
            floor,
            &BodyDesc::new_static(ColliderShape::Box {
                half_extents: Vec3::new(20.0, 0.5, 20.0),
            }),
        )
        .unwrap();
    floor
}

fn spawn_ball(world: &mut World, system: &mut PhysicsSystem, position: Vec3) -> Entity {
    let ball = world.spawn((Transform::from_position(position), GlobalTransform::default()));
    system
        .create_body(
            world,
            ball,
            &BodyDesc::new_dynamic(ColliderShape::Sphere { radius: 0.5 }, 1.0),
        )
        .unwrap();
    ball
}

#[derive(Debug, Default)]
struct Seen {
    starts: Vec<Entity>,
    contacts: Vec<u32>,
    ends: Vec<Entity>,
}

#[test]
fn test_sphere_falls_onto_floor_and_reports_lifecycle() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(config(Vec3::new(0.0, -9.82, 0.0))).unwrap();
    let floor = spawn_floor(&mut world, &mut system);
    let ball = spawn_ball(&mut world, &mut system, Vec3::new(0.0, 3.0, 0.0));

    let seen = Rc::new(RefCell::new(Seen::default()));
    let frame = Rc::new(RefCell::new(0u32));
    {
        let events = system.events_mut();
        let sink = Rc::clone(&seen);
        events.on_entity_collision_start(ball, move |_, result, _| {
            sink.borrow_mut().starts.push(result.other);
        });
        let (sink, clock) = (Rc::clone(&seen), Rc::clone(&frame));
        events.on_entity_contact(ball, move |_, result, _| {
            assert!(!result.contacts.is_empty());
            sink.borrow_mut().contacts.push(*clock.borrow());
        });
        let sink = Rc::clone(&seen);
        events.on_entity_collision_end(ball, move |_, other, _| {
            sink.borrow_mut().ends.push(other);
        });
    }

    for i in 0..240 {
        *frame.borrow_mut() = i;
        system.advance(&mut world, DT);
    }

    {
        let seen = seen.borrow();
        assert_eq!(seen.starts, vec![floor]);
        assert!(seen.ends.is_empty());

        // Once touching, a contact is reported on every step.
        let first = seen.contacts[0];
        let expected: Vec<u32> = (first..240).collect();
        assert_eq!(seen.contacts, expected);
    }

    let y = world.get::<&Transform>(ball).unwrap().position.y;
    assert_abs_diff_eq!(y, 0.5, epsilon = 0.02);

    assert!(system.remove_body(floor));
    system.advance(&mut world, DT);
    system.advance(&mut world, DT);

    let seen = seen.borrow();
    assert_eq!(seen.ends, vec![floor]);
    assert_eq!(seen.starts.len(), 1);
}

#[test]
fn test_raycast_hits_unit_sphere_top() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(PhysicsConfig::default()).unwrap();
    let ball = world.spawn((Transform::identity(),));
    system
        .create_body(
            &mut world,
            ball,
            &BodyDesc::new_dynamic(ColliderShape::Sphere { radius: 1.0 }, 1.0),
        )
        .unwrap();

    let hit = system
        .raycast_first(Vec3::new(0.0, 10.0, 0.0), Vec3::new(0.0, -10.0, 0.0))
        .unwrap();
    assert_eq!(hit.entity, ball);
    assert_abs_diff_eq!(hit.point.y, 1.0, epsilon = 1e-4);
    assert_abs_diff_eq!(hit.normal.y, 1.0, epsilon = 1e-4);
    assert_abs_diff_eq!(hit.normal.x, 0.0, epsilon = 1e-4);

    assert!(system
        .raycast_first(Vec3::new(5.0, 10.0, 0.0), Vec3::new(5.0, -10.0, 0.0))
        .is_none());
    assert!(system.raycast_first(Vec3::ONE, Vec3::ONE).is_none());
    assert!(system
        .raycast_first(Vec3::new(0.0, f32::NAN, 0.0), Vec3::ZERO)
        .is_none());
}

#[test]
fn test_raycast_skips_hit_without_entity() {
    let (backend, script) = ScriptedBackend::new();
    let mut system = PhysicsSystem::with_backend(PhysicsConfig::default(), Box::new(backend)).unwrap();

    let orphan = system.backend_mut().unwrap().create_body(
        &BodyDesc::new_static(ColliderShape::Sphere { radius: 1.0 }),
        Pose::IDENTITY,
    );
    script.borrow_mut().ray_hit = Some(RayHit {
        body: orphan,
        point: Vec3::Y,
        normal: Vec3::Y,
        fraction: 0.45,
    });

    assert!(system
        .raycast_first(Vec3::new(0.0, 10.0, 0.0), Vec3::new(0.0, -10.0, 0.0))
        .is_none());
}

#[test]
fn test_gravity_scalars_and_vector_match() {
    fn trajectory(set: impl FnOnce(&mut PhysicsSystem)) -> Vec<Vec3> {
        let mut world = World::new();
        let mut system = PhysicsSystem::new(PhysicsConfig::default()).unwrap();
        let ball = spawn_ball(&mut world, &mut system, Vec3::new(0.0, 50.0, 0.0));
        set(&mut system);

        (0..60)
            .map(|_| {
                system.advance(&mut world, DT);
                world.get::<&Transform>(ball).unwrap().position
            })
            .collect()
    }

    let by_scalars = trajectory(|s| s.set_gravity(0.0, -20.0, 0.0));
    let by_vector = trajectory(|s| s.set_gravity_vec(Vec3::new(0.0, -20.0, 0.0)));
    assert_eq!(by_scalars, by_vector);

    let default_gravity = trajectory(|_| {});
    assert!(by_scalars[59].y < default_gravity[59].y);
}

#[test]
fn test_remove_never_added_body_is_noop() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(PhysicsConfig::default()).unwrap();

    let disabled = world.spawn((Transform::identity(),));
    system
        .create_body(
            &mut world,
            disabled,
            &BodyDesc::new_dynamic(ColliderShape::Sphere { radius: 0.5 }, 1.0).with_enabled(false),
        )
        .unwrap();
    assert!(!system.remove_body(disabled));
    assert!(!system.is_active(disabled));

    let bare = world.spawn(());
    assert!(!system.remove_body(bare));
    assert!(!system.destroy_body(&mut world, bare));
}

#[test]
fn test_remove_then_destroy_clears_back_reference() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(PhysicsConfig::default()).unwrap();
    let ball = spawn_ball(&mut world, &mut system, Vec3::ZERO);
    let handle = system.body_handle(ball).unwrap();
    assert_eq!(system.entity_for_body(handle), Some(ball));
    assert_eq!(world.get::<&PhysicsBody>(ball).unwrap().handle(), handle);

    assert!(system.remove_body(ball));
    assert!(system.destroy_body(&mut world, ball));

    assert_eq!(system.entity_for_body(handle), None);
    assert_eq!(system.body_handle(ball), None);
    assert!(world.get::<&PhysicsBody>(ball).is_err());
    assert_eq!(system.body_count(), 0);
    assert!(system.backend().unwrap().pose(handle).is_none());
    assert!(!system.destroy_body(&mut world, ball));
}

/// Rest a ball on the floor and collect the floor's end notifications.
fn resting_ball_with_floor_ends(
    world: &mut World,
    system: &mut PhysicsSystem,
) -> (Entity, Entity, Rc<RefCell<Vec<Entity>>>) {
    let floor = spawn_floor(world, system);
    let ball = spawn_ball(world, system, Vec3::new(0.0, 0.51, 0.0));

    let ends: Rc<RefCell<Vec<Entity>>> = Rc::default();
    let sink = Rc::clone(&ends);
    system
        .events_mut()
        .on_entity_collision_end(floor, move |_, other, _| sink.borrow_mut().push(other));
    system.events_mut().on_entity_contact(ball, |_, _, _| {});

    for _ in 0..10 {
        system.advance(world, DT);
    }
    assert!(!system.ledger().is_empty());
    assert!(ends.borrow().is_empty());
    (floor, ball, ends)
}

#[test]
fn test_despawned_entity_body_is_destroyed_and_pair_ends() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(config(Vec3::new(0.0, -9.82, 0.0))).unwrap();
    let (floor, ball, ends) = resting_ball_with_floor_ends(&mut world, &mut system);
    let handle = system.body_handle(ball).unwrap();

    world.despawn(ball).unwrap();
    for _ in 0..10 {
        system.advance(&mut world, DT);
    }

    assert_eq!(system.body_count(), 1);
    assert_eq!(system.body_handle(ball), None);
    assert_eq!(system.entity_for_body(handle), None);
    assert!(system.backend().unwrap().pose(handle).is_none());
    assert_eq!(*ends.borrow(), vec![ball]);
    assert!(system.ledger().is_empty());
    assert!(!system.events().has_entity(ball, CollisionEventKind::Contact));
    assert!(system.body_handle(floor).is_some());
}

#[test]
fn test_removed_component_destroys_body() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(config(Vec3::new(0.0, -9.82, 0.0))).unwrap();
    let (_floor, ball, ends) = resting_ball_with_floor_ends(&mut world, &mut system);

    world.remove_one::<PhysicsBody>(ball).unwrap();
    system.advance(&mut world, DT);
    system.advance(&mut world, DT);

    assert_eq!(system.body_count(), 1);
    assert_eq!(system.body_handle(ball), None);
    assert_eq!(*ends.borrow(), vec![ball]);
    assert!(!system.events().has_entity(ball, CollisionEventKind::Contact));

    // The entity is still alive and can get a fresh body.
    assert!(world.contains(ball));
    let desc = BodyDesc::new_dynamic(ColliderShape::Sphere { radius: 0.5 }, 1.0);
    assert!(system.create_body(&mut world, ball, &desc).unwrap().is_some());
    assert_eq!(system.body_count(), 2);
}

#[test]
fn test_destroy_body_drops_entity_listeners() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(PhysicsConfig::default()).unwrap();
    let ball = spawn_ball(&mut world, &mut system, Vec3::ZERO);
    system.events_mut().on_entity_collision_start(ball, |_, _, _| {});
    system.events_mut().on_entity_collision_end(ball, |_, _, _| {});
    assert!(system.events().has_entity(ball, CollisionEventKind::CollisionStart));

    assert!(system.destroy_body(&mut world, ball));

    assert!(!system.events().has_entity(ball, CollisionEventKind::CollisionStart));
    assert!(!system.events().has_entity(ball, CollisionEventKind::CollisionEnd));
    assert!(system.events().is_empty());
}

#[test]
fn test_create_body_rejects_bad_input() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(PhysicsConfig::default()).unwrap();
    let entity = world.spawn(());

    let err = system
        .create_body(
            &mut world,
            entity,
            &BodyDesc::new_dynamic(ColliderShape::Sphere { radius: 0.5 }, 0.0),
        )
        .unwrap_err();
    assert!(matches!(err, PhysicsError::InvalidMass { .. }));

    let desc = BodyDesc::new_dynamic(ColliderShape::Sphere { radius: 0.5 }, 1.0);
    system.create_body(&mut world, entity, &desc).unwrap();
    assert_eq!(
        system.create_body(&mut world, entity, &desc),
        Err(PhysicsError::AlreadyHasBody(entity))
    );

    world.despawn(entity).unwrap();
    assert_eq!(
        system.create_body(&mut world, entity, &desc),
        Err(PhysicsError::EntityNotFound(entity))
    );
}

#[test]
fn test_without_backend_everything_is_inert() {
    let mut world = World::new();
    let mut system = PhysicsSystem::without_backend(PhysicsConfig::default()).unwrap();
    let entity = world.spawn((Transform::identity(),));

    let created = system
        .create_body(
            &mut world,
            entity,
            &BodyDesc::new_dynamic(ColliderShape::Sphere { radius: 0.5 }, 1.0),
        )
        .unwrap();
    assert!(created.is_none());
    assert_eq!(system.advance(&mut world, DT), 0);
    assert!(system.raycast_first(Vec3::Y, -Vec3::Y).is_none());
    assert!(!system.remove_body(entity));
    assert_eq!(world.get::<&Transform>(entity).unwrap().position, Vec3::ZERO);
}

#[test]
fn test_kinematic_paddle_pushes_ball() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(config(Vec3::ZERO)).unwrap();
    let paddle = world.spawn((Transform::from_position(Vec3::new(-1.0, 0.0, 0.0)),));
    system
        .create_body(
            &mut world,
            paddle,
            &BodyDesc::new_kinematic(ColliderShape::Box {
                half_extents: Vec3::splat(0.5),
            }),
        )
        .unwrap();
    let ball = spawn_ball(&mut world, &mut system, Vec3::new(0.05, 0.0, 0.0));

    for _ in 0..30 {
        world.get::<&mut Transform>(paddle).unwrap().position.x += 0.05;
        system.advance(&mut world, DT);
    }

    assert!(world.get::<&Transform>(ball).unwrap().position.x > 0.5);
    assert!(system.linear_velocity(ball).unwrap().x > 0.0);
}

#[test]
fn test_distance_constraint_between_entities() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(PhysicsConfig::default()).unwrap();
    let anchor = world.spawn((Transform::from_position(Vec3::new(0.0, 5.0, 0.0)),));
    system
        .create_body(
            &mut world,
            anchor,
            &BodyDesc::new_static(ColliderShape::Sphere { radius: 0.05 }),
        )
        .unwrap();
    let bob = spawn_ball(&mut world, &mut system, Vec3::new(1.5, 5.0, 0.0));

    let joint = system
        .add_distance_constraint(anchor, bob, Vec3::ZERO, Vec3::ZERO, 1.5)
        .unwrap()
        .unwrap();
    for _ in 0..120 {
        system.advance(&mut world, DT);
    }
    let length = (world.get::<&Transform>(bob).unwrap().position - Vec3::new(0.0, 5.0, 0.0)).length();
    assert_abs_diff_eq!(length, 1.5, epsilon = 0.1);

    assert!(system.remove_constraint(joint));
    assert!(!system.remove_constraint(joint));

    let stranger = world.spawn(());
    assert_eq!(
        system.add_distance_constraint(anchor, stranger, Vec3::ZERO, Vec3::ZERO, 1.0),
        Err(PhysicsError::NoBody(stranger))
    );
    let anchor_body = system.body_handle(anchor).unwrap();
    assert!(matches!(
        system.add_constraint(&ConstraintDesc::Distance {
            body_a: anchor_body,
            body_b: anchor_body,
            anchor_a: Vec3::ZERO,
            anchor_b: Vec3::ZERO,
            rest_length: 1.0,
        }),
        Err(PhysicsError::InvalidConstraint(_))
    ));
}

#[test]
fn test_velocity_and_impulse_helpers() {
    let mut world = World::new();
    let mut system = PhysicsSystem::new(config(Vec3::ZERO)).unwrap();
    let ball = spawn_ball(&mut world, &mut system, Vec3::ZERO);

    system.set_linear_velocity(ball, Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(system.linear_velocity(ball), Some(Vec3::new(1.0, 0.0, 0.0)));

    system.apply_impulse(ball, Vec3::new(0.0, 2.0, 0.0), Vec3::ZERO);
    assert_eq!(system.linear_velocity(ball), Some(Vec3::new(1.0, 2.0, 0.0)));

    system.set_angular_velocity(ball, Vec3::Z);
    assert_eq!(system.angular_velocity(ball), Some(Vec3::Z));

    system.apply_force(ball, Vec3::new(60.0, 0.0, 0.0));
    system.advance(&mut world, DT);
    let v = system.linear_velocity(ball).unwrap();
    assert_abs_diff_eq!(v.x, 2.0, epsilon = 1e-4);

    let stranger = world.spawn(());
    assert_eq!(system.linear_velocity(stranger), None);
}
