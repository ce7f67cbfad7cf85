// tests/unit_config_test.rs

use std::time::Duration;
use vellumdb_client::config::ClientConfig;

#[test]
fn test_defaults_disable_the_socket_timeout() {
    let config = ClientConfig::default();
    assert_eq!(config.socket_timeout_secs, 0.0);
    assert_eq!(config.socket_timeout(), None);
}

#[test]
fn test_socket_timeout_accepts_fractional_seconds() {
    let config = ClientConfig {
        socket_timeout_secs: 2.5,
    };
    assert_eq!(config.socket_timeout(), Some(Duration::from_millis(2500)));
}

#[test]
fn test_missing_fields_fall_back_to_defaults() {
    let config: ClientConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.socket_timeout(), None);
}

#[test]
fn test_config_round_trips_through_serde() {
    let config = ClientConfig {
        socket_timeout_secs: 1.0,
    };
    let text = serde_json::to_string(&config).unwrap();
    let back: ClientConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back.socket_timeout(), Some(Duration::from_secs(1)));
}
