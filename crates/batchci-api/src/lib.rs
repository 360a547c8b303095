//! HTTP server for batch CI orchestration.
//!
//! Operator routes require a bearer token. Task callbacks under `/api`
//! authenticate with their per-job secret instead.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod views;

pub use routes::create_router;
pub use state::AppState;
