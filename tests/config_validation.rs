//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use craftwire::config::{CraftwireConfig, LoggingConfig, ProtocolConfig, ServerConfig, TransportConfig};
use craftwire::service::{ServerContext, SettingValue};
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = CraftwireConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = CraftwireConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = CraftwireConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_long_motd() {
    let mut config = CraftwireConfig::default();
    config.server.motd = "x".repeat(257);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("MOTD too long")));
}

#[test]
fn test_keepalive_timeout_must_exceed_interval() {
    let mut config = CraftwireConfig::default();
    config.server.keepalive_interval = Duration::from_secs(10);
    config.server.keepalive_timeout = Duration::from_secs(10);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("must exceed the keep-alive interval")));
}

#[test]
fn test_keepalive_interval_bounds() {
    let server = ServerConfig {
        keepalive_interval: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    assert!(server
        .validate()
        .iter()
        .any(|e| e.contains("Keep-alive interval too short")));

    let server = ServerConfig {
        keepalive_interval: Duration::from_secs(7200),
        keepalive_timeout: Duration::from_secs(7300),
        ..ServerConfig::default()
    };
    assert!(server
        .validate()
        .iter()
        .any(|e| e.contains("Keep-alive interval too long")));
}

#[test]
fn test_shutdown_timeout_bounds() {
    let mut config = CraftwireConfig::default();
    config.server.shutdown_timeout = Duration::from_millis(500);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Shutdown timeout too short")));

    config.server.shutdown_timeout = Duration::from_secs(120);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Shutdown timeout too long")));
}

#[test]
fn test_zero_max_connections() {
    let mut config = CraftwireConfig::default();
    config.server.max_connections = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_inverted_protocol_range() {
    let protocol = ProtocolConfig {
        min_protocol: 340,
        max_protocol: 47,
        ..ProtocolConfig::default()
    };

    let errors = protocol.validate();
    assert!(errors.iter().any(|e| e.contains("is above maximum protocol")));
    assert!(!protocol.supports(100));
}

#[test]
fn test_protocol_support_is_inclusive() {
    let protocol = ProtocolConfig::default();
    assert!(protocol.supports(47));
    assert!(protocol.supports(340));
    assert!(!protocol.supports(46));
    assert!(!protocol.supports(341));
}

#[test]
fn test_invalid_default_locale() {
    let mut config = CraftwireConfig::default();
    config.protocol.default_locale = "english".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid default locale")));
}

#[test]
fn test_invalid_compression_level() {
    let transport = TransportConfig {
        compression_level: 10,
        ..TransportConfig::default()
    };

    let errors = transport.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid compression level")));
}

#[test]
fn test_frame_length_limits() {
    let mut transport = TransportConfig::default();
    transport.max_frame_length = 0;
    assert!(transport
        .validate()
        .iter()
        .any(|e| e.contains("Max frame length cannot be 0")));

    transport.max_frame_length = 4 * 1024 * 1024;
    assert!(transport
        .validate()
        .iter()
        .any(|e| e.contains("Max frame length too large")));
}

#[test]
fn test_threshold_larger_than_frame() {
    let transport = TransportConfig {
        compression_threshold: 4096,
        max_frame_length: 1024,
        ..TransportConfig::default()
    };
    assert!(transport
        .validate()
        .iter()
        .any(|e| e.contains("Compression threshold cannot be larger")));
}

#[test]
fn test_negative_threshold_disables_compression() {
    let transport = TransportConfig {
        compression_threshold: -1,
        ..TransportConfig::default()
    };
    assert!(transport.validate().is_empty());
    assert_eq!(transport.threshold(), None);
    assert_eq!(TransportConfig::default().threshold(), Some(256));
}

#[test]
fn test_file_logging_without_path() {
    let logging = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };

    let errors = logging.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_output() {
    let logging = LoggingConfig {
        log_to_console: false,
        log_to_file: false,
        ..LoggingConfig::default()
    };

    let errors = logging.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_empty_settings_namespace() {
    let mut config = CraftwireConfig::default();
    config
        .settings
        .entry(String::new())
        .or_default()
        .insert("key".into(), SettingValue::Bool(true));

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Settings namespace cannot be empty")));
}

#[test]
fn test_validate_strict_collects_all_errors() {
    let mut config = CraftwireConfig::default();
    config.server.address = String::new();
    config.transport.compression_level = 12;

    let err = config.validate_strict().unwrap_err().to_string();
    assert!(err.contains("Server address cannot be empty"));
    assert!(err.contains("Invalid compression level"));
}

#[test]
fn test_context_refuses_invalid_config() {
    let mut config = CraftwireConfig::default();
    config.server.max_connections = 0;
    assert!(ServerContext::builder(config).build().is_err());
}

#[test]
fn test_toml_roundtrip_and_defaults() {
    let toml = r#"
        [server]
        address = "127.0.0.1:25566"
        motd = "From TOML"
        keepalive_interval = 2000
        keepalive_timeout = 8000

        [protocol]
        max_protocol = 316

        [logging]
        log_level = "debug"

        [settings.world]
        render_distance = 6
        name = "lobby"
    "#;

    let config = CraftwireConfig::from_toml(toml).unwrap();
    assert_eq!(config.server.address, "127.0.0.1:25566");
    assert_eq!(config.server.motd, "From TOML");
    assert_eq!(config.server.max_players, 20);
    assert_eq!(config.server.keepalive_interval, Duration::from_secs(2));
    assert_eq!(config.server.keepalive_timeout, Duration::from_secs(8));
    assert_eq!(config.protocol.min_protocol, 47);
    assert_eq!(config.protocol.max_protocol, 316);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert_eq!(
        config.settings["world"]["render_distance"],
        SettingValue::Int(6)
    );
    assert_eq!(
        config.settings["world"]["name"],
        SettingValue::Text("lobby".into())
    );
    assert!(config.validate().is_empty());

    let reparsed = CraftwireConfig::from_toml(&CraftwireConfig::example_config()).unwrap();
    assert_eq!(reparsed.server.address, CraftwireConfig::default().server.address);
    assert_eq!(reparsed.transport.compression_threshold, 256);
}

#[test]
fn test_malformed_toml() {
    let err = CraftwireConfig::from_toml("[server\naddress = 1").unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_file_roundtrip() {
    let path = std::env::temp_dir().join(format!("craftwire-config-{}.toml", std::process::id()));
    let config = CraftwireConfig::default_with_overrides(|c| {
        c.server.motd = "Saved".into();
        c.transport.compression_threshold = 64;
    });
    config.save_to_file(&path).unwrap();

    let loaded = CraftwireConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded.server.motd, "Saved");
    assert_eq!(loaded.transport.compression_threshold, 64);
}

#[test]
fn test_missing_file() {
    let err = CraftwireConfig::from_file("/nonexistent/craftwire.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to open config file"));
}
