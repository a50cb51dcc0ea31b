//! Core infrastructure tests.

mod common;

use common::create_config_file;
use livelock::core::config::{Config, ConfigOverrides};
use livelock::core::error::{LivelockError, RespErrorMapping};
use livelock::core::time::{Clock, ManualClock, SystemClock, Timestamp};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_full_config() {
    let file = create_config_file(
        r#"
[server]
bind = "127.0.0.1"
port = 9000
max_payload = 2048
shutdown_support = true

[session]
release_all_timeout_ms = 1500

[keepalive]
time_secs = 30
interval_secs = 5
probes = 4

[registry]
sweep_interval_ms = 0

[telemetry]
prometheus_port = 9100
log_level = "debug"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.listen_addr(), "127.0.0.1:9000");
    assert_eq!(config.server.max_payload, 2048);
    assert!(config.server.shutdown_support);
    assert_eq!(config.release_all_timeout(), Duration::from_millis(1500));
    assert_eq!(config.keepalive.probes, 4);
    assert_eq!(config.sweep_interval(), None);
    assert_eq!(config.metrics_addr(), "0.0.0.0:9100");
}

#[test]
fn empty_config_uses_defaults() {
    let file = create_config_file("");
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.listen_addr(), "0.0.0.0:7873");
    assert_eq!(config.server.max_payload, 1024);
    assert_eq!(config.release_all_timeout(), Duration::from_secs(5));
    assert_eq!(config.keepalive.time_secs, 60);
    assert_eq!(config.keepalive.interval_secs, 10);
    assert_eq!(config.keepalive.probes, 10);
    assert_eq!(config.telemetry.prometheus_port, 8000);
}

#[test]
fn validate_rejects_bad_values() {
    for content in [
        "[server]\nmax_payload = 8",
        "[server]\nmax_lock_name_len = 0",
        "[server]\nmax_payload = 64\nmax_lock_name_len = 64",
        "[session]\nrelease_all_timeout_ms = 0",
        "[keepalive]\nprobes = 0",
        "[telemetry]\nlog_level = \"chatty\"",
    ] {
        let file = create_config_file(content);
        assert!(Config::from_file(file.path()).is_err(), "accepted: {}", content);
    }
}

#[test]
fn env_then_cli_precedence() {
    let file = create_config_file("[server]\nport = 9000\n");
    let mut config = Config::from_file(file.path()).unwrap();

    let env: HashMap<&str, &str> = [
        ("LIVELOCK_PORT", "9001"),
        ("LIVELOCK_RELEASE_ALL_TIMEOUT", "0.25"),
        ("LIVELOCK_SHUTDOWN_SUPPORT", "true"),
        ("LIVELOCK_TCP_KEEPALIVE_PROBES", "3"),
    ]
    .into_iter()
    .collect();
    config
        .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
        .unwrap();
    assert_eq!(config.server.port, 9001);
    assert_eq!(config.session.release_all_timeout_ms, 250);
    assert!(config.server.shutdown_support);
    assert_eq!(config.keepalive.probes, 3);

    config.apply_overrides(&ConfigOverrides {
        port: Some(9002),
        log_level: Some("warn".to_string()),
        ..Default::default()
    });
    assert_eq!(config.server.port, 9002);
    assert_eq!(config.telemetry.log_level, "warn");
    assert!(config.validate().is_ok());
}

#[test]
fn env_rejects_garbage() {
    let mut config = Config::default();
    assert!(config
        .apply_env_from(|key| (key == "LIVELOCK_PORT").then(|| "seventy".to_string()))
        .is_err());
}

#[test]
fn config_toml_round_trip() {
    let mut config = Config::default();
    config.server.port = 7000;
    config.session.release_all_timeout_ms = 1234;
    let parsed = Config::from_toml(&config.to_toml().unwrap()).unwrap();
    assert_eq!(parsed.server.port, 7000);
    assert_eq!(parsed.session.release_all_timeout_ms, 1234);
}

// ============================================================================
// Error mapping tests
// ============================================================================

#[test]
fn error_prefixes() {
    assert_eq!(
        RespErrorMapping::to_error_prefix(&LivelockError::already_held(b"x")),
        "LOCKED"
    );
    assert_eq!(
        RespErrorMapping::to_error_prefix(&LivelockError::InvalidTtl),
        "ERR"
    );
    let (prefix, message) = RespErrorMapping::to_error_line(&LivelockError::InvalidTtl);
    assert_eq!((prefix, message.as_str()), ("ERR", "invalid ttl"));
}

// ============================================================================
// Clock tests
// ============================================================================

#[test]
fn manual_clock_is_deterministic() {
    let clock = ManualClock::new(1_000);
    assert_eq!(clock.now(), Timestamp::from_millis(1_000));
    clock.advance(Duration::from_millis(500));
    assert_eq!(clock.now().as_secs_f64(), 1.5);
    clock.set(10);
    assert_eq!(clock.now().ms, 10);
}

#[test]
fn system_clock_is_unix_time() {
    // 2020-01-01T00:00:00Z
    assert!(SystemClock.now().ms > 1_577_836_800_000);
}
