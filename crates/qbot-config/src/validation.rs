// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Covers constraints serde cannot express: URL schemes, positive
//! timeouts, ordered backoff bounds, and keys required by the chosen
//! transport. All problems are collected; validation does not fail fast.

use qbot_core::TransportKind;

use crate::diagnostic::ConfigError;
use crate::model::QbotConfig;

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &QbotConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    check_scheme(&mut errors, "socket.url", &config.socket.url, &["ws", "wss"]);
    check_scheme(&mut errors, "sse.url", &config.sse.url, &["http", "https"]);
    check_scheme(
        &mut errors,
        "token.endpoint",
        &config.token.endpoint,
        &["http", "https"],
    );

    if !config.socket.path.starts_with('/') {
        errors.push(ConfigError::validation(format!(
            "socket.path must start with `/`, got `{}`",
            config.socket.path
        )));
    }

    if config.client.send_timeout_secs == 0 {
        errors.push(ConfigError::validation(
            "client.send_timeout_secs must be greater than 0",
        ));
    }
    if config.token.timeout_secs == 0 {
        errors.push(ConfigError::validation(
            "token.timeout_secs must be greater than 0",
        ));
    }

    if config.socket.reconnect_delay_ms == 0 {
        errors.push(ConfigError::validation(
            "socket.reconnect_delay_ms must be greater than 0",
        ));
    }
    if config.socket.reconnect_delay_max_ms < config.socket.reconnect_delay_ms {
        errors.push(ConfigError::validation(format!(
            "socket.reconnect_delay_max_ms ({}) must not be below socket.reconnect_delay_ms ({})",
            config.socket.reconnect_delay_max_ms, config.socket.reconnect_delay_ms
        )));
    }

    if config.client.access == TransportKind::EventStream
        && config.sse.bot_app_key.trim().is_empty()
    {
        errors.push(ConfigError::validation(
            "sse.bot_app_key is required when client.access = \"sse\"",
        ));
    }

    if config.storage.snapshot_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.snapshot_path must not be empty",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_scheme(errors: &mut Vec<ConfigError>, key: &str, value: &str, allowed: &[&str]) {
    let scheme = value.split_once("://").map(|(s, _)| s);
    let host_present = value
        .split_once("://")
        .is_some_and(|(_, rest)| !rest.trim().is_empty());
    match scheme {
        Some(s) if allowed.contains(&s) && host_present => {}
        _ => errors.push(ConfigError::validation(format!(
            "{key} `{value}` must be a URL with scheme {}",
            allowed.join(" or ")
        ))),
    }
}
