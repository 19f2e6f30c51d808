//! Errors surfaced to callers of the physics system.
//!
//! Only caller programming errors are reported here. A missing backend or a
//! contact that no longer maps to an entity is recovered locally.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("invalid mass {mass}: dynamic bodies need a finite mass > 0")]
    InvalidMass { mass: f32 },

    #[error("invalid body property `{0}`")]
    InvalidProperty(&'static str),

    #[error("invalid collider shape: {0}")]
    InvalidShape(String),

    #[error("invalid physics config: {0}")]
    InvalidConfig(&'static str),

    #[error("invalid constraint: {0}")]
    InvalidConstraint(&'static str),

    #[error("entity {0:?} does not exist")]
    EntityNotFound(hecs::Entity),

    #[error("entity {0:?} already owns a body")]
    AlreadyHasBody(hecs::Entity),

    #[error("entity {0:?} has no physics body")]
    NoBody(hecs::Entity),
}
