use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub payload: PayloadConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Use the development sandbox. Must match the certificate in use.
    #[serde(default = "default_use_sandbox")]
    pub use_sandbox: bool,
    #[serde(default = "default_production_host")]
    pub production_host: String,
    #[serde(default = "default_sandbox_host")]
    pub sandbox_host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Client certificate presented to the gateway
    #[serde(default = "default_cert_file")]
    pub cert_file: PathBuf,
    /// Private key for the client certificate
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
    /// Extra trust anchors in addition to the bundled web PKI roots
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Seconds a connection may stay idle before it is recycled
    #[serde(default = "default_socket_max_age")]
    pub socket_max_age_seconds: u64,
    /// Seconds a sent notification stays in history
    #[serde(default = "default_history_max_age")]
    pub history_max_age_seconds: u64,
    /// How long to wait for an error reply after each send
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Transmission tries per notification before it is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadConfig {
    /// JSON template with `{{alert}}` and `{{badge}}` placeholders
    #[serde(default = "default_payload_template")]
    pub template: String,
    /// Alert text used by the ingestion endpoint
    #[serde(default = "default_alert_text")]
    pub alert_text: String,
    /// Only channels with this prefix are forwarded to the gateway
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8066
}

fn default_use_sandbox() -> bool {
    true
}

fn default_production_host() -> String {
    "gateway.push.apple.com".to_string()
}

fn default_sandbox_host() -> String {
    "gateway.sandbox.push.apple.com".to_string()
}

fn default_gateway_port() -> u16 {
    2195
}

fn default_cert_file() -> PathBuf {
    PathBuf::from("apns-cert.pem")
}

fn default_key_file() -> PathBuf {
    PathBuf::from("apns-key.pem")
}

fn default_socket_max_age() -> u64 {
    120 // 2 minutes
}

fn default_history_max_age() -> u64 {
    3600 // 1 hour
}

fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_priority() -> u8 {
    10 // send immediately
}

fn default_reconnect_initial_delay_ms() -> u64 {
    100
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_payload_template() -> String {
    r#"{"aps":{"alert":"{{alert}}","badge":{{badge}},"sound":"2beep.aiff"}}"#.to_string()
}

fn default_alert_text() -> String {
    "You have a new message".to_string()
}

fn default_channel_prefix() -> String {
    "taskme".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "push-relay-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8066)?
            .set_default("gateway.use_sandbox", true)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER__PORT, GATEWAY__USE_SANDBOX, GATEWAY__CERT_FILE, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl GatewayConfig {
    /// Gateway host selected by the sandbox flag
    pub fn host(&self) -> &str {
        if self.use_sandbox {
            &self.sandbox_host
        } else {
            &self.production_host
        }
    }

    pub fn socket_max_age(&self) -> Duration {
        Duration::from_secs(self.socket_max_age_seconds)
    }

    pub fn history_max_age(&self) -> Duration {
        Duration::from_secs(self.history_max_age_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            use_sandbox: default_use_sandbox(),
            production_host: default_production_host(),
            sandbox_host: default_sandbox_host(),
            port: default_gateway_port(),
            cert_file: default_cert_file(),
            key_file: default_key_file(),
            ca_file: None,
            socket_max_age_seconds: default_socket_max_age(),
            history_max_age_seconds: default_history_max_age(),
            read_timeout_ms: default_read_timeout_ms(),
            max_attempts: default_max_attempts(),
            priority: default_priority(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            template: default_payload_template(),
            alert_text: default_alert_text(),
            channel_prefix: default_channel_prefix(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8066);

        let gateway = GatewayConfig::default();
        assert_eq!(gateway.port, 2195);
        assert_eq!(gateway.max_attempts, 5);
        assert_eq!(gateway.socket_max_age(), Duration::from_secs(120));
        assert_eq!(gateway.history_max_age(), Duration::from_secs(3600));
        assert_eq!(gateway.read_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_host_follows_sandbox_flag() {
        let mut gateway = GatewayConfig::default();
        assert_eq!(gateway.host(), "gateway.sandbox.push.apple.com");

        gateway.use_sandbox = false;
        assert_eq!(gateway.host(), "gateway.push.apple.com");
    }

    #[test]
    fn test_deserialize_partial_gateway_section() {
        let settings: Settings = Config::builder()
            .set_override("gateway.use_sandbox", false)
            .unwrap()
            .set_override("gateway.max_attempts", 3)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(!settings.gateway.use_sandbox);
        assert_eq!(settings.gateway.max_attempts, 3);
        assert_eq!(settings.gateway.port, 2195);
        assert_eq!(settings.payload.channel_prefix, "taskme");
    }
}
