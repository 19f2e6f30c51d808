//! Tether
//!
//! Binds `hecs` entities to a rigid-body simulation and turns the engine's
//! per-step contact manifolds into entity-level collision notifications.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **ecs** - Components (`Transform`, `PhysicsBody`, body descriptions) and the transform sync system
//! 2. **physics::backend** - The `PhysicsBackend` trait a rigid-body engine implements
//! 3. **physics::cpu** - Bundled CPU engine (feature = "cpu-backend")
//! 4. **physics** - `PhysicsSystem`: stepping, body lifecycle, contact extraction,
//!    the collision ledger, event dispatch and ray queries

pub mod ecs;
pub mod physics;

pub use ecs::prelude::*;

pub use physics::backend::{
    BodyHandle, ConstraintDesc, ConstraintHandle, ContactManifold, PhysicsBackend, Pose,
    RawContact, RayHit,
};
pub use physics::contact::{ContactPoint, ContactResult, SingleContactResult};
pub use physics::error::PhysicsError;
pub use physics::events::{CollisionEventKind, Deferred, EventRegistry, ListenerId};
pub use physics::raycast::RaycastResult;
pub use physics::{PhysicsConfig, PhysicsSystem};

#[cfg(feature = "cpu-backend")]
pub use physics::cpu::CpuBackend;

// Re-export glam and hecs for convenience
pub use glam;
pub use hecs;
