//! Room client configuration.
//!
//! Configuration is loaded from environment variables. The gateway API
//! secret is redacted in Debug output.

use common::secret::SecretString;
use common::types::RoomId;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default VideoRoom room id.
pub const DEFAULT_ROOM_ID: u64 = 12345;

/// Default number of subscription slots.
pub const DEFAULT_SLOT_COUNT: usize = 2;

/// Upper bound on subscription slots.
pub const MAX_SLOT_COUNT: usize = 16;

/// Default display name prefix (`<prefix>-<0..999>`).
pub const DEFAULT_DISPLAY_NAME_PREFIX: &str = "User";

/// Default time allowed from `join()` to a published session.
pub const DEFAULT_JOIN_TIMEOUT_SECONDS: u64 = 15;

/// Default per-request timeout on the signaling channel.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Default keepalive interval for the gateway session.
pub const DEFAULT_KEEPALIVE_SECONDS: u64 = 25;

/// Upper bound on every timeout and interval setting.
pub const MAX_TIMEOUT_SECONDS: u64 = 3600;

/// Room client configuration.
#[derive(Clone)]
pub struct Config {
    /// Gateway WebSocket URL (`ws://` or `wss://`).
    pub gateway_url: String,

    /// Room to create and join.
    pub room_id: RoomId,

    /// Description sent with create-room (default: `room-<id>`).
    pub room_description: String,

    /// Number of subscription slots (1..=16).
    pub slot_count: usize,

    /// Prefix of the generated display name.
    pub display_name_prefix: String,

    pub join_timeout_seconds: u64,

    pub request_timeout_seconds: u64,

    pub keepalive_seconds: u64,

    /// Optional gateway API secret.
    /// Protected by `SecretString` to prevent accidental logging.
    pub api_secret: Option<SecretString>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("gateway_url", &self.gateway_url)
            .field("room_id", &self.room_id)
            .field("room_description", &self.room_description)
            .field("slot_count", &self.slot_count)
            .field("display_name_prefix", &self.display_name_prefix)
            .field("join_timeout_seconds", &self.join_timeout_seconds)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("keepalive_seconds", &self.keepalive_seconds)
            .field(
                "api_secret",
                &self.api_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Settings the session controller needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSettings {
    pub room_id: RoomId,
    pub description: String,
    pub slot_count: usize,
    pub display_name_prefix: String,
    pub join_timeout: Duration,
}

impl RoomSettings {
    /// Settings for `room_id` with every other value at its default.
    #[must_use]
    pub fn for_room(room_id: RoomId) -> Self {
        Self {
            room_id,
            description: format!("room-{room_id}"),
            slot_count: DEFAULT_SLOT_COUNT,
            display_name_prefix: DEFAULT_DISPLAY_NAME_PREFIX.to_string(),
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECONDS),
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self::for_room(RoomId(DEFAULT_ROOM_ID))
    }
}

/// Settings the WebSocket gateway channel needs.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub url: String,
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub api_secret: Option<SecretString>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let gateway_url = vars
            .get("ROOM_GATEWAY_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("ROOM_GATEWAY_URL".to_string()))?
            .clone();

        if !(gateway_url.starts_with("ws://") || gateway_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "ROOM_GATEWAY_URL must use ws:// or wss://, got '{gateway_url}'"
            )));
        }

        let room_id = if let Some(value_str) = vars.get("ROOM_ID") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "ROOM_ID must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;
            RoomId(value)
        } else {
            RoomId(DEFAULT_ROOM_ID)
        };

        let room_description = vars
            .get("ROOM_DESCRIPTION")
            .cloned()
            .unwrap_or_else(|| format!("room-{room_id}"));

        let slot_count = if let Some(value_str) = vars.get("ROOM_SLOT_COUNT") {
            let value: usize = value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "ROOM_SLOT_COUNT must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if value == 0 || value > MAX_SLOT_COUNT {
                return Err(ConfigError::InvalidValue(format!(
                    "ROOM_SLOT_COUNT must be between 1 and {MAX_SLOT_COUNT}, got {value}"
                )));
            }

            value
        } else {
            DEFAULT_SLOT_COUNT
        };

        let display_name_prefix = vars
            .get("ROOM_DISPLAY_NAME_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME_PREFIX.to_string());

        let join_timeout_seconds = parse_positive_seconds(
            vars,
            "ROOM_JOIN_TIMEOUT_SECONDS",
            DEFAULT_JOIN_TIMEOUT_SECONDS,
        )?;
        let request_timeout_seconds = parse_positive_seconds(
            vars,
            "ROOM_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;
        let keepalive_seconds =
            parse_positive_seconds(vars, "ROOM_KEEPALIVE_SECONDS", DEFAULT_KEEPALIVE_SECONDS)?;

        let api_secret = vars
            .get("ROOM_API_SECRET")
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.clone()));

        Ok(Config {
            gateway_url,
            room_id,
            room_description,
            slot_count,
            display_name_prefix,
            join_timeout_seconds,
            request_timeout_seconds,
            keepalive_seconds,
            api_secret,
        })
    }

    /// Settings for the session controller.
    #[must_use]
    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            room_id: self.room_id,
            description: self.room_description.clone(),
            slot_count: self.slot_count,
            display_name_prefix: self.display_name_prefix.clone(),
            join_timeout: Duration::from_secs(self.join_timeout_seconds),
        }
    }

    /// Settings for the WebSocket gateway channel.
    #[must_use]
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            url: self.gateway_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            keepalive_interval: Duration::from_secs(self.keepalive_seconds),
            api_secret: self.api_secret.clone(),
        }
    }
}

fn parse_positive_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == 0 || value > MAX_TIMEOUT_SECONDS {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be between 1 and {MAX_TIMEOUT_SECONDS}, got {value}"
        )));
    }

    Ok(value)
}
