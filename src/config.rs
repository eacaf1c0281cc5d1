//! # Configuration Management
//!
//! Explicit configuration for one game client.
//!
//! A [`ClientConfig`] value is handed to the connection constructor; nothing is
//! read from process-wide state after that.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`NEBULOUS_` prefix)
//!
//! ## Sections
//! - `server`: endpoint, region selector and timeouts
//! - `session`: credential, alias and cosmetic choices sent in the connect request
//! - `keepalive`: ping cadence and missed-ack threshold
//! - `logging`: subscriber settings

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Client build the connect request claims to be.
pub const APP_VERSION: i16 = 1100;

/// First UDP port of the game servers; clients alternate between this and the next.
pub const BASE_PORT: u16 = 27900;

/// Default keep-alive cadence.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(500);

/// Unanswered pings tolerated before the session times out.
pub const MISSED_ACK_THRESHOLD: u32 = 10;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "NEBULOUS_";

/// Main client configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub keepalive: KeepAliveConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `NEBULOUS_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Unparseable values are errors
    /// rather than silently ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(address) = var("SERVER_ADDRESS") {
            self.server.address = address;
        }
        if let Some(region) = var("REGION") {
            self.server.region = region.parse()?;
        }
        if let Some(ms) = var("CONNECT_TIMEOUT_MS") {
            self.server.connect_timeout = parse_millis("CONNECT_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = var("HANDSHAKE_TIMEOUT_MS") {
            self.server.handshake_timeout = parse_millis("HANDSHAKE_TIMEOUT_MS", &ms)?;
        }
        if let Some(ticket) = var("TICKET") {
            self.session.ticket = ticket;
        }
        if let Some(secure) = var("SECURE_TICKET") {
            self.session.secure_ticket = secure;
        }
        if let Some(alias) = var("ALIAS") {
            self.session.alias = alias;
        }
        if let Some(ms) = var("KEEPALIVE_INTERVAL_MS") {
            self.keepalive.interval = parse_millis("KEEPALIVE_INTERVAL_MS", &ms)?;
        }
        if let Some(n) = var("KEEPALIVE_THRESHOLD") {
            self.keepalive.missed_ack_threshold = n.parse().map_err(|_| {
                ProtocolError::ConfigError(format!("{ENV_PREFIX}KEEPALIVE_THRESHOLD: '{n}'"))
            })?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.log_level = level.parse().map_err(|_| {
                ProtocolError::ConfigError(format!("{ENV_PREFIX}LOG_LEVEL: '{level}'"))
            })?;
        }

        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.session.validate());
        errors.extend(self.keepalive.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ProtocolError::ConfigError(format!("{ENV_PREFIX}{name}: '{value}'")))
}

/// Game server region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Region {
    #[default]
    UsEast,
    UsWest,
    Eu,
    EastAsia,
    SouthAmerica,
    Australia,
    SouthAsia,
    MiddleEast,
    India,
    SouthAfrica,
    Japan,
    Debug,
    DebugGlobal,
}

impl Region {
    pub const ALL: [Region; 13] = [
        Region::UsEast,
        Region::UsWest,
        Region::Eu,
        Region::EastAsia,
        Region::SouthAmerica,
        Region::Australia,
        Region::SouthAsia,
        Region::MiddleEast,
        Region::India,
        Region::SouthAfrica,
        Region::Japan,
        Region::Debug,
        Region::DebugGlobal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Region::UsEast => "US_EAST",
            Region::UsWest => "US_WEST",
            Region::Eu => "EU",
            Region::EastAsia => "EAST_ASIA",
            Region::SouthAmerica => "SOUTH_AMERICA",
            Region::Australia => "AUSTRALIA",
            Region::SouthAsia => "SOUTH_ASIA",
            Region::MiddleEast => "MIDDLE_EAST",
            Region::India => "INDIA",
            Region::SouthAfrica => "SOUTH_AFRICA",
            Region::Japan => "JAPAN",
            Region::Debug => "DEBUG",
            Region::DebugGlobal => "DEBUG_GLOBAL",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Region {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Region::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::ConfigError(format!("Unknown region: '{s}'")))
    }
}

/// Server endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// `host:port`, or a bare host to use the alternating game ports
    pub address: String,

    /// Region selector
    pub region: Region,

    /// Timeout for opening the transport
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Deadline for the handshake result after the connect request is sent
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Timeout for a single datagram send
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1"),
            region: Region::default(),
            connect_timeout: timeout::CONNECT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            send_timeout: timeout::SEND_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Host part of `address`.
    pub fn host(&self) -> &str {
        match self.explicit_port() {
            Some(_) => self
                .address
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or(&self.address),
            None => &self.address,
        }
    }

    /// Port given in `address`, if any.
    pub fn explicit_port(&self) -> Option<u16> {
        let (_, port) = self.address.rsplit_once(':')?;
        port.parse().ok()
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.contains(':') && self.explicit_port().is_none() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected 'host' or 'host:port')",
                self.address
            ));
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.send_timeout.as_millis() < 10 {
            errors.push("Send timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Identity and cosmetics sent in the connect request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session ticket from the account service. Empty for guests.
    pub ticket: String,

    /// Hex-encoded secure ticket bytes from the account service.
    pub secure_ticket: String,

    /// Display alias. The connect request itself carries a random alias used
    /// to find the local player; this one is used for chat.
    pub alias: String,

    pub app_version: i16,
    pub game_mode: u8,
    pub difficulty: u8,
    /// `-1` joins any game.
    pub game_id: i32,
    pub online_mode: u8,
    pub mayhem: bool,
    pub skin: i16,
    pub skin2: i16,
    pub eject_skin: u8,
    pub custom_skin: i32,
    pub custom_skin2: i32,
    pub alias_colors: Vec<u8>,
    pub alias_font: u8,
    pub alias_anim: u8,
    pub level_colors: Vec<u8>,
    pub blob_color: i32,
    pub hat: u8,
    pub halo: u8,
    pub pet_id: u8,
    pub pet_id2: u8,
    pub pet_name: String,
    pub pet_name2: String,
    pub custom_pet: i32,
    pub custom_pet2: i32,
    pub custom_particle: i32,
    pub particle: u8,
    pub skin_interpolation_rate: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ticket: String::new(),
            secure_ticket: String::new(),
            alias: String::from("Blob"),
            app_version: APP_VERSION,
            game_mode: 0,
            difficulty: 0,
            game_id: -1,
            online_mode: 0,
            mayhem: false,
            skin: 0,
            skin2: 0,
            eject_skin: 0,
            custom_skin: 0,
            custom_skin2: 0,
            alias_colors: Vec::new(),
            alias_font: 0,
            alias_anim: 0,
            level_colors: Vec::new(),
            blob_color: -1,
            hat: 0,
            halo: 0,
            pet_id: 0,
            pet_id2: 0,
            pet_name: String::new(),
            pet_name2: String::new(),
            custom_pet: 0,
            custom_pet2: 0,
            custom_particle: 0,
            particle: 0,
            skin_interpolation_rate: 0.0,
        }
    }
}

impl SessionConfig {
    /// Decoded secure ticket bytes.
    pub fn secure_ticket_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(self.secure_ticket.trim())
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid secure_ticket hex: {e}")))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = hex::decode(self.secure_ticket.trim()) {
            errors.push(format!("secure_ticket is not valid hex: {e}"));
        } else if self.secure_ticket.len() / 2 > u16::MAX as usize {
            errors.push("secure_ticket too long (maximum: 65535 bytes)".to_string());
        }

        if self.alias.len() > 16 {
            errors.push(format!(
                "Alias too long: {} bytes (maximum: 16)",
                self.alias.len()
            ));
        }

        for (name, value) in [
            ("ticket", &self.ticket),
            ("pet_name", &self.pet_name),
            ("pet_name2", &self.pet_name2),
        ] {
            if value.len() > u16::MAX as usize {
                errors.push(format!("{name} too long (maximum: 65535 bytes)"));
            }
        }

        for (name, value) in [
            ("alias_colors", &self.alias_colors),
            ("level_colors", &self.level_colors),
        ] {
            if value.len() > u8::MAX as usize {
                errors.push(format!("{name} has too many entries (maximum: 255)"));
            }
        }

        if !(0.0..=60.0).contains(&self.skin_interpolation_rate) {
            errors.push("skin_interpolation_rate must be within 0..=60".to_string());
        }

        errors
    }
}

/// Keep-alive configuration, fixed for a connection's lifetime
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeepAliveConfig {
    /// Interval between pings
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Outstanding pings tolerated before `Timeout`
    pub missed_ack_threshold: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: KEEPALIVE_INTERVAL,
            missed_ack_threshold: MISSED_ACK_THRESHOLD,
        }
    }
}

impl KeepAliveConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval.is_zero() {
            errors.push("Keep-alive interval must be greater than 0".to_string());
        } else if self.interval.as_secs() > 60 {
            errors.push("Keep-alive interval too long (maximum: 60s)".to_string());
        }

        if self.missed_ack_threshold == 0 {
            errors.push("Missed-ack threshold must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("nebulous-client"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
