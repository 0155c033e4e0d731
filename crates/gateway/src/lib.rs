//! HTTP server for the timetable API.
//!
//! Lifecycle:
//! 1. Initialize the metrics registry
//! 2. Connect SQLite and create the schema
//! 3. Build the router: CRUD routes, health, scrape endpoint
//! 4. Wrap it in the HTTP metrics middleware, tracing and CORS layers
//! 5. Serve until Ctrl-C

pub mod cache;
pub mod error;
pub mod metrics_middleware;
pub mod metrics_routes;
pub mod server;
pub mod state;
pub mod store;
pub mod timetable_routes;
pub mod validation;

pub use {
    error::{ApiError, ValidationIssue},
    server::{build_app, start_gateway},
    state::AppState,
};
