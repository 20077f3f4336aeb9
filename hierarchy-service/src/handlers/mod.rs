//! HTTP handlers for hierarchy-service.

pub mod assignment;
pub mod entity;
pub mod health;
pub mod scope;
