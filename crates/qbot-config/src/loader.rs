// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./qbot.toml` > `~/.config/qbot/qbot.toml` > `/etc/qbot/qbot.toml`
//! with environment variable overrides via `QBOT_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::QbotConfig;

/// Config sections addressable from environment variables.
const SECTIONS: &[&str] = &["client", "socket", "sse", "token", "bot", "storage"];

const SYSTEM_CONFIG: &str = "/etc/qbot/qbot.toml";
const LOCAL_CONFIG: &str = "qbot.toml";

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/qbot/qbot.toml` (system-wide)
/// 3. `~/.config/qbot/qbot.toml` (user XDG config)
/// 4. `./qbot.toml` (local directory)
/// 5. `QBOT_*` environment variables
pub fn load_config() -> Result<QbotConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<QbotConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(QbotConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<QbotConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(QbotConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(QbotConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

/// Path of the per-user config file, if a config dir exists.
pub fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("qbot/qbot.toml"))
}

/// Every config file location in merge order, for diagnostics.
pub fn config_paths() -> Vec<std::path::PathBuf> {
    let mut paths = vec![std::path::PathBuf::from(SYSTEM_CONFIG)];
    if let Some(user) = user_config_path() {
        paths.push(user);
    }
    paths.push(
        std::env::current_dir()
            .map(|d| d.join(LOCAL_CONFIG))
            .unwrap_or_else(|_| LOCAL_CONFIG.into()),
    );
    paths
}

/// Environment variable provider mapping `QBOT_<SECTION>_<KEY>` to `section.key`.
///
/// Only the leading section name is split off, so `QBOT_SSE_BOT_APP_KEY`
/// maps to `sse.bot_app_key` and `QBOT_BOT_BOT_BIZ_ID` to `bot.bot_biz_id`.
fn env_provider() -> Env {
    Env::prefixed("QBOT_").map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
