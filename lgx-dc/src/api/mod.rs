//! HTTP API for lgx-dc

pub mod auth;
pub mod deliveries;
pub mod events;
pub mod health;
pub mod offline;
pub mod sync;

pub use auth::auth_middleware;
pub use deliveries::delivery_routes;
pub use events::event_routes;
pub use health::health_routes;
pub use offline::offline_routes;
pub use sync::sync_routes;
