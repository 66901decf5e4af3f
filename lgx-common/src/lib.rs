//! # LGX Common Library
//!
//! Shared code for the LGX logistics services including:
//! - Error type and result alias
//! - Delivery lifecycle events and the channel-keyed broadcaster
//! - Actor/role types and session token hashing
//! - Configuration loading and root folder resolution
//! - SSE stream helpers
//! - Clock abstraction

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
