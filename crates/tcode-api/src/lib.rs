//! Axum HTTP API server.
//!
//! This crate provides:
//! - `POST /transcode` with inline or queued execution
//! - Job status polling and artifact download
//! - Health, readiness and Prometheus metrics endpoints

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(test)]
mod test_support;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{RetrievalService, SubmissionRouter};
pub use state::AppState;
