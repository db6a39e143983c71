//! REST API implementation
//!
//! - types: request/response payloads and shared state
//! - extractors: JSON and query extractors with uniform error bodies
//! - handlers: endpoint handlers
//! - router: route table and middleware
//! - tests: unit tests for the payload types

mod extractors;
mod handlers;
mod router;
pub mod types;

pub use extractors::{JsonExtractor, QueryExtractor};
pub use handlers::REPLAY_HEADER;
pub use router::create_router;
pub use types::{
    AlertsQuery, AlertsResponse, AppState, HealthResponse, RecentTransactionsResponse,
    ServiceStatus, UserRiskResponse,
};
