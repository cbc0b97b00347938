//! Relay configuration
//!
//! Loaded from environment variables with defaults for everything.
//! `ClientConfig` is the per-connection slice handed to each client.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::AppError;
use crate::message::WireFormat;

/// Default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port
pub const DEFAULT_PORT: u16 = 3000;

/// Default room label
pub const DEFAULT_ROOM_NAME: &str = "Lobby";

/// Time allowed to write a frame to the peer
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between frames from the peer before it is presumed dead
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum inbound frame size in bytes
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Time allowed for the WebSocket upgrade
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-client mailbox capacity
pub const DEFAULT_MAILBOX_CAPACITY: usize = 16;

/// Default graceful drain deadline
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Deployment environment, reported in logs and by the healthcheck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(AppError::Config(format!(
                "CHAT_ENV must be development, staging or production, got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Staging => f.write_str("staging"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Largest inbound frame accepted; anything bigger drops the client
    pub max_message_size: usize,
    /// Read deadline, reset by every inbound frame
    pub pong_wait: Duration,
    /// Keepalive ping period, shorter than `pong_wait`
    pub ping_period: Duration,
    /// Deadline for each outbound write
    pub write_wait: Duration,
    /// Outbound mailbox capacity
    pub mailbox_capacity: usize,
    /// How outbound messages are rendered
    pub wire_format: WireFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: ping_period(DEFAULT_PONG_WAIT),
            write_wait: WRITE_WAIT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            wire_format: WireFormat::default(),
        }
    }
}

impl ClientConfig {
    /// Set the liveness timeout and derive the ping period from it
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = ping_period(pong_wait);
        self
    }

    /// WebSocket limits enforced on inbound frames
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

/// Ping period is 9/10 of the liveness timeout
fn ping_period(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener address ("host:port")
    pub bind_address: String,
    /// Deployment environment
    pub env: Environment,
    /// Room label
    pub room_name: String,
    /// Whether senders are left out of their own broadcasts
    pub self_suppress: bool,
    /// How long shutdown waits for connections to drain
    pub shutdown_timeout: Duration,
    /// Per-connection settings
    pub client: ClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            env: Environment::default(),
            room_name: DEFAULT_ROOM_NAME.to_string(),
            self_suppress: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, AppError> {
        let host = vars
            .get("CHAT_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port: u16 = parse_var(vars, "CHAT_PORT")?.unwrap_or(DEFAULT_PORT);

        let env = match vars.get("CHAT_ENV") {
            Some(value) => value.parse()?,
            None => Environment::default(),
        };

        let room_name = vars
            .get("CHAT_ROOM_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROOM_NAME.to_string());

        let self_suppress = match vars.get("CHAT_SELF_SUPPRESS") {
            Some(value) => parse_bool("CHAT_SELF_SUPPRESS", value)?,
            None => true,
        };

        let wire_format = match vars.get("CHAT_WIRE_FORMAT") {
            Some(value) => value.parse()?,
            None => WireFormat::default(),
        };

        let mailbox_capacity =
            parse_var(vars, "CHAT_MAILBOX_CAPACITY")?.unwrap_or(DEFAULT_MAILBOX_CAPACITY);
        if mailbox_capacity == 0 {
            return Err(AppError::Config(
                "CHAT_MAILBOX_CAPACITY must be greater than 0".to_string(),
            ));
        }

        let pong_wait = match parse_var::<u64>(vars, "CHAT_PONG_WAIT_SECS")? {
            Some(0) => {
                return Err(AppError::Config(
                    "CHAT_PONG_WAIT_SECS must be greater than 0".to_string(),
                ))
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_PONG_WAIT,
        };

        let shutdown_timeout = parse_var(vars, "CHAT_SHUTDOWN_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        let client = ClientConfig {
            mailbox_capacity,
            wire_format,
            ..ClientConfig::default()
        }
        .with_pong_wait(pong_wait);

        Ok(Config {
            bind_address: format!("{}:{}", host, port),
            env,
            room_name,
            self_suppress,
            shutdown_timeout,
            client,
        })
    }
}

/// Parse an optional numeric variable, naming it in the error
fn parse_var<T>(vars: &HashMap<String, String>, key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    vars.get(key)
        .map(|value| {
            value.trim().parse().map_err(|e| {
                AppError::Config(format!("{} must be a valid number, got '{}': {}", key, value, e))
            })
        })
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:3000");
        assert_eq!(config.env, Environment::Development);
        assert_eq!(config.room_name, "Lobby");
        assert!(config.self_suppress);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.client.pong_wait, Duration::from_secs(60));
        assert_eq!(config.client.ping_period, Duration::from_secs(54));
        assert_eq!(config.client.write_wait, Duration::from_secs(10));
        assert_eq!(config.client.max_message_size, 512);
        assert_eq!(config.client.mailbox_capacity, 16);
        assert_eq!(config.client.wire_format, WireFormat::Json);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(&vars(&[
            ("CHAT_HOST", "0.0.0.0"),
            ("CHAT_PORT", "9000"),
            ("CHAT_ENV", "production"),
            ("CHAT_ROOM_NAME", "Test Room"),
            ("CHAT_SELF_SUPPRESS", "false"),
            ("CHAT_WIRE_FORMAT", "text"),
            ("CHAT_MAILBOX_CAPACITY", "4"),
            ("CHAT_PONG_WAIT_SECS", "10"),
            ("CHAT_SHUTDOWN_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert_eq!(config.env, Environment::Production);
        assert_eq!(config.room_name, "Test Room");
        assert!(!config.self_suppress);
        assert_eq!(config.client.wire_format, WireFormat::Text);
        assert_eq!(config.client.mailbox_capacity, 4);
        assert_eq!(config.client.pong_wait, Duration::from_secs(10));
        assert_eq!(config.client.ping_period, Duration::from_secs(9));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for pairs in [
            [("CHAT_PORT", "not-a-port")],
            [("CHAT_PORT", "70000")],
            [("CHAT_ENV", "qa")],
            [("CHAT_SELF_SUPPRESS", "maybe")],
            [("CHAT_WIRE_FORMAT", "xml")],
            [("CHAT_MAILBOX_CAPACITY", "0")],
            [("CHAT_PONG_WAIT_SECS", "0")],
        ] {
            let result = Config::from_vars(&vars(&pairs));
            assert!(
                matches!(result, Err(AppError::Config(_))),
                "expected config error for {:?}",
                pairs
            );
        }
    }

    #[test]
    fn test_websocket_limits() {
        let ws = ClientConfig::default().websocket_config();
        assert_eq!(ws.max_message_size, Some(512));
        assert_eq!(ws.max_frame_size, Some(512));
    }
}
