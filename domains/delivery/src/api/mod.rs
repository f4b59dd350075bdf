//! API layer for the Delivery domain
//!
//! Contains HTTP handlers, routes, and domain state definition.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use middleware::DeliveryState;
pub use routes::routes;
