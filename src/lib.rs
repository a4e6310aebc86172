//! # taskgrade
//!
//! Assigns generated web-development micro-tasks, receives deployed
//! submissions and grades them automatically.
//!
//! ## Flow
//!
//! ```text
//!  round1 / round2 ──► task::generate ──► dispatch::send ──► submitter
//!                                                              │
//!            store ◄── intake::accept ◄── POST /api/notify ◄───┘
//!              │
//!              └──► evaluate ──► checks::CheckRunner ──► store (results)
//! ```
//!
//! ## Modules
//! - `task`: seeded templates, attachments and task ids
//! - `store`: dispatches, submissions and check results (memory or SQLite)
//! - `intake`: idempotent submission acceptance
//! - `checks`: the grading pipeline
//! - `dispatch` / `rounds`: outbound task delivery and notify retry
//! - `api`: evaluator HTTP server
//! - `student`: reference submitter (deploy endpoint)
//! - `llm`, `vcs`, `browser`: external capabilities

pub mod api;
pub mod browser;
pub mod checks;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluation;
pub mod intake;
pub mod llm;
pub mod rounds;
pub mod store;
pub mod student;
pub mod task;
pub mod vcs;

pub use config::Config;
pub use error::GradeError;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the fmt subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
