mod settings;

pub use settings::{ApiConfig, GatewayConfig, OtelConfig, PayloadConfig, ServerConfig, Settings};
