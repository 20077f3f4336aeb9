//! Middleware for hierarchy-service.

pub mod actor;

pub use actor::{actor_context_middleware, ActorContext};
