//! HTTP server for atelierd.
//!
//! - [`routes`] builds the axum [`Router`](axum::Router) over a shared gateway
//! - [`error`] maps gateway errors to status codes and JSON bodies
//! - [`config`] loads daemon configuration and secrets

pub mod config;
pub mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::router;
