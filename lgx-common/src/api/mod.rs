//! API module for shared HTTP API functionality
//!
//! Contains ONLY pure functions and shared types; each service wraps these
//! with framework-specific middleware.

pub mod auth;

pub use auth::{hash_token, Actor, Role};
