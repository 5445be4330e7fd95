//! REST API server module.
//!
//! HTTP endpoints for pushing messages through the relay, switching it on and
//! off, and inspecting its status.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
