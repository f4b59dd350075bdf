//! HTTP handlers for the Delivery domain

pub mod assets;
pub mod dispatch;
pub mod reviews;
