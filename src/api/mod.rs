//! HTTP surfaces: the evaluator's intake server and shared response types.

pub mod auth;
pub mod routes;
pub mod types;

pub use routes::{router, serve, shutdown_signal, AppState};
