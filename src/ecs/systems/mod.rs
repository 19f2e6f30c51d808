//! ECS systems.

pub mod sync;

pub use sync::sync_transforms;
