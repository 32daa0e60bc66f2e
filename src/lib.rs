// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;

// Domain layer (delivery)
pub mod gateway;
pub mod notification;
pub mod queue;

// Application layer
pub mod api;
pub mod server;
pub mod triggers;

// Supporting modules
pub mod shutdown;
pub mod telemetry;
