//! Canonical persisted object model shared by every component.
//!
//! The structs here double as the ECS wire shapes (camelCase serde), so the
//! protocol layer can embed them in responses without a parallel DTO set.
//! Derived counters (running/pending tasks and friends) live on the structs
//! but are recomputed on every read; the stores never treat them as
//! authoritative.

pub mod arn;
pub mod ecs;
pub mod elb;
pub mod event;
pub mod status;

pub use arn::{ArnError, Identity};
pub use ecs::*;
pub use elb::*;
pub use event::Event;
pub use status::*;
