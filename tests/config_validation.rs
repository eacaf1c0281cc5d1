//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use nebulous_client::config::{
    ClientConfig, KeepAliveConfig, LoggingConfig, Region, ServerConfig, SessionConfig,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = ClientConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_empty_server_address() {
    let mut config = ClientConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_server_address_with_bad_port() {
    let mut config = ClientConfig::default();
    config.server.address = "game.example.com:notaport".to_string();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Invalid server address format")));
}

#[test]
fn test_server_address_forms() {
    let explicit = ServerConfig {
        address: "10.0.0.7:27901".to_string(),
        ..ServerConfig::default()
    };
    assert!(explicit.validate().is_empty());
    assert_eq!(explicit.host(), "10.0.0.7");
    assert_eq!(explicit.explicit_port(), Some(27901));

    let bare = ServerConfig {
        address: "game.example.com".to_string(),
        ..ServerConfig::default()
    };
    assert!(bare.validate().is_empty());
    assert_eq!(bare.host(), "game.example.com");
    assert_eq!(bare.explicit_port(), None);
}

#[test]
fn test_timeout_bounds() {
    let mut config = ClientConfig::default();
    config.server.connect_timeout = Duration::from_millis(50);
    config.server.handshake_timeout = Duration::from_secs(301);
    config.server.send_timeout = Duration::from_millis(1);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Connect timeout too short")));
    assert!(errors.iter().any(|e| e.contains("Handshake timeout too long")));
    assert!(errors.iter().any(|e| e.contains("Send timeout too short")));
}

#[test]
fn test_keepalive_bounds() {
    let zero = KeepAliveConfig {
        interval: Duration::ZERO,
        missed_ack_threshold: 0,
    };
    let errors = zero.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Keep-alive interval must be greater than 0")));
    assert!(errors
        .iter()
        .any(|e| e.contains("Missed-ack threshold must be greater than 0")));

    let slow = KeepAliveConfig {
        interval: Duration::from_secs(61),
        ..KeepAliveConfig::default()
    };
    assert!(slow
        .validate()
        .iter()
        .any(|e| e.contains("Keep-alive interval too long")));
}

#[test]
fn test_secure_ticket_must_be_hex() {
    let session = SessionConfig {
        secure_ticket: "not hex".to_string(),
        ..SessionConfig::default()
    };
    assert!(session
        .validate()
        .iter()
        .any(|e| e.contains("secure_ticket is not valid hex")));
    assert!(session.secure_ticket_bytes().is_err());

    let session = SessionConfig {
        secure_ticket: "00ff10".to_string(),
        ..SessionConfig::default()
    };
    assert!(session.validate().is_empty());
    assert_eq!(
        session.secure_ticket_bytes().expect("hex"),
        vec![0x00, 0xff, 0x10]
    );
}

#[test]
fn test_session_field_limits() {
    let session = SessionConfig {
        alias: "a".repeat(17),
        alias_colors: vec![0; 256],
        skin_interpolation_rate: 90.0,
        ..SessionConfig::default()
    };
    let errors = session.validate();
    assert!(errors.iter().any(|e| e.contains("Alias too long")));
    assert!(errors
        .iter()
        .any(|e| e.contains("alias_colors has too many entries")));
    assert!(errors
        .iter()
        .any(|e| e.contains("skin_interpolation_rate must be within")));
}

#[test]
fn test_empty_app_name() {
    let logging = LoggingConfig {
        app_name: String::new(),
        ..LoggingConfig::default()
    };
    assert!(logging
        .validate()
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_multiple_errors_collected() {
    let mut config = ClientConfig::default();
    config.server.address = String::new();
    config.keepalive.missed_ack_threshold = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors.len() >= 3, "expected several errors, got {errors:?}");
}

#[test]
fn test_validate_strict_reports_all_errors() {
    let mut config = ClientConfig::default();
    config.server.address = String::new();
    config.keepalive.missed_ack_threshold = 0;

    let err = config
        .validate_strict()
        .expect_err("invalid config must fail");
    let message = err.to_string();
    assert!(message.contains("cannot be empty"));
    assert!(message.contains("Missed-ack threshold"));
}

#[test]
fn test_full_toml_file() {
    let toml = r#"
        [server]
        address = "eu.game.example:27901"
        region = "EU"
        connect_timeout = 2000
        handshake_timeout = 4000
        send_timeout = 250

        [session]
        ticket = "abc"
        secure_ticket = "0a0b0c"
        alias = "pilot"
        game_mode = 2
        skin = 14

        [keepalive]
        interval = 250
        missed_ack_threshold = 4

        [logging]
        app_name = "bot"
        log_level = "debug"
        json_format = true
    "#;

    let config = ClientConfig::from_toml(toml).expect("parse");
    assert!(config.validate().is_empty());
    assert_eq!(config.server.region, Region::Eu);
    assert_eq!(config.server.connect_timeout, Duration::from_secs(2));
    assert_eq!(config.server.send_timeout, Duration::from_millis(250));
    assert_eq!(config.session.alias, "pilot");
    assert_eq!(config.session.skin, 14);
    // Unlisted session fields keep their defaults.
    assert_eq!(config.session.game_id, -1);
    assert_eq!(config.keepalive.interval, Duration::from_millis(250));
    assert_eq!(config.keepalive.missed_ack_threshold, 4);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.logging.json_format);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = ClientConfig::from_toml("[server\naddress = ").expect_err("must fail");
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_save_and_reload() {
    let path = std::env::temp_dir().join(format!(
        "nebulous-client-config-{}.toml",
        std::process::id()
    ));
    let config = ClientConfig::default_with_overrides(|c| {
        c.server.region = Region::Japan;
        c.session.alias = "saved".to_string();
    });
    config.save_to_file(&path).expect("save");

    let loaded = ClientConfig::from_file(&path).expect("load");
    std::fs::remove_file(&path).expect("cleanup");
    assert_eq!(loaded.server.region, Region::Japan);
    assert_eq!(loaded.session.alias, "saved");
    assert_eq!(loaded.keepalive.interval, config.keepalive.interval);
}

#[test]
fn test_example_config_parses() {
    let example = ClientConfig::example_config();
    let parsed = ClientConfig::from_toml(&example).expect("example parses");
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_env_overrides_reject_garbage() {
    let vars: HashMap<&str, &str> = [("NEBULOUS_KEEPALIVE_INTERVAL_MS", "soon")].into();
    let mut config = ClientConfig::default();
    let result = config.apply_env(|key| vars.get(key).map(|v| v.to_string()));
    assert!(result.is_err());

    let vars: HashMap<&str, &str> = [("NEBULOUS_REGION", "mars")].into();
    let result = config.apply_env(|key| vars.get(key).map(|v| v.to_string()));
    assert!(result.is_err());
}
