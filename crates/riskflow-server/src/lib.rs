//! RiskFlow HTTP Server Library
//!
//! REST API, configuration and process wiring, exposed for the binary and
//! for integration tests.

pub mod api;
pub mod app;
pub mod config;
pub mod error;

pub use app::App;
pub use config::ServerConfig;
