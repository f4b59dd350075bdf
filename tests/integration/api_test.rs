//! API endpoint integration tests
//!
//! Tests for the delivery domain: review pages, asset endpoints, the job
//! substrate entry points, and end-to-end delivery scenarios.

#![allow(dead_code)]

mod assets;
mod common;
mod dispatch;
mod reviews;
mod scenarios;
