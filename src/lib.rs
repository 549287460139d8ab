//! Gym access: identity and access control for the gym backend.
//!
//! The binary in `main.rs` wires these modules into an HTTP server and an
//! admin CLI; integration tests in `tests/` drive them directly.

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod registry;
pub mod store;
