//! HTTP API handlers for compliance-ai

pub mod auth;
pub mod comparisons;
pub mod frameworks;
pub mod health;
pub mod ws;

pub use auth::AuthUser;
pub use comparisons::comparison_routes;
pub use frameworks::framework_routes;
pub use health::health_routes;
pub use ws::ws_routes;
