//! Reference submitter: receives a task, generates the app, publishes it and
//! reports the deployment back to the evaluator.

pub mod builder;
pub mod routes;

pub use builder::{AppBuilder, BuildRequest, BuiltApp, LlmAppBuilder};
pub use routes::{router, serve, DeployResponse, StudentState};
