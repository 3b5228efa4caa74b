// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session identity and bot metadata.
//!
//! The backend and embedders describe the bot with several naming schemes;
//! [`normalize`] folds them into [`BotConfig`]. The current config is
//! persisted through a [`SnapshotStore`] on every change and published on
//! the bus as [`BusEvent::ConfigChanged`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use qbot_bus::{BusEvent, EventBus};
use qbot_core::{BotConfig, QbotError};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub const DEFAULT_BOT_NAME: &str = "测试机器人";
pub const DEFAULT_BOT_AVATAR: &str = "https://qbot-1251316161.cos.ap-nanjing.myqcloud.com/avatar.png";
pub const DEFAULT_BOT_BIZ_ID: &str = "1664519736704069632";

/// Persistence key of the snapshot, also used as the default file stem.
pub const SNAPSHOT_KEY: &str = "qbot_config";

/// Where the last-known bot config survives restarts.
pub trait SnapshotStore: Send + Sync {
    /// Returns the stored snapshot, or `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<Value>, QbotError>;

    fn save(&self, snapshot: &Value) -> Result<(), QbotError>;
}

/// JSON file snapshot.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    path: PathBuf,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

fn persistence(e: impl std::error::Error + Send + Sync + 'static) -> QbotError {
    QbotError::Persistence {
        source: Box::new(e),
    }
}

impl SnapshotStore for FileSnapshot {
    fn load(&self) -> Result<Option<Value>, QbotError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence(e)),
        };
        serde_json::from_str(&raw).map(Some).map_err(persistence)
    }

    fn save(&self, snapshot: &Value) -> Result<(), QbotError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(persistence)?;
        }
        let body = serde_json::to_string_pretty(snapshot).map_err(persistence)?;
        std::fs::write(&self.path, body).map_err(persistence)
    }
}

/// In-memory snapshot for tests and embedders without a filesystem.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    slot: Mutex<Option<Value>>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Value) -> Self {
        Self {
            slot: Mutex::new(Some(value)),
        }
    }

    pub fn current(&self) -> Option<Value> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SnapshotStore for MemorySnapshot {
    fn load(&self) -> Result<Option<Value>, QbotError> {
        Ok(self.current())
    }

    fn save(&self, snapshot: &Value) -> Result<(), QbotError> {
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot.clone());
        Ok(())
    }
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    fn load(&self) -> Result<Option<Value>, QbotError> {
        (**self).load()
    }

    fn save(&self, snapshot: &Value) -> Result<(), QbotError> {
        (**self).save(snapshot)
    }
}

/// The fields a payload actually carried, after alias resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotPatch {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub is_available: Option<bool>,
    pub bot_biz_id: Option<String>,
    pub extra: Map<String, Value>,
}

impl BotPatch {
    /// Applies only the carried fields to `config`.
    pub fn apply_to(self, config: &mut BotConfig) {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(avatar) = self.avatar {
            config.avatar = avatar;
        }
        if let Some(available) = self.is_available {
            config.is_available = available;
        }
        if let Some(id) = self.bot_biz_id {
            config.bot_biz_id = id;
        }
        config.extra.extend(self.extra);
    }

    /// Builds a full config; absent fields take empty values, availability defaults to true.
    pub fn into_config(self) -> BotConfig {
        let mut config = BotConfig {
            is_available: true,
            ..BotConfig::default()
        };
        self.apply_to(&mut config);
        config
    }
}

/// First alias holding a non-empty string (numbers are accepted as ids).
fn first_text(src: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match src.get(*k) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Resolves field aliases in a bot metadata payload.
///
/// Accepts the payload itself or one wrapped in `data` / `payload`.
/// Returns `None` for anything that is not an object.
pub fn normalize(input: &Value) -> Option<BotPatch> {
    let outer = input.as_object()?;
    let src = ["data", "payload"]
        .iter()
        .find_map(|k| outer.get(*k).filter(|v| is_truthy(v)))
        .unwrap_or(input)
        .as_object()?;

    let is_available = match src.get("is_available") {
        Some(Value::Bool(b)) => Some(*b),
        _ => src.get("enable").filter(|v| !v.is_null()).map(is_truthy),
    };

    let extra = match src.get("extra") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    Some(BotPatch {
        name: first_text(src, &["name", "bot_name", "title"]),
        avatar: first_text(src, &["avatar", "avatar_url", "icon"]),
        is_available,
        bot_biz_id: first_text(src, &["bot_biz_id", "biz_id", "app_id", "botId"]),
        extra,
    })
}

/// Stored form of a config. Extras are nested under `extra`, where
/// [`normalize`] reads them back.
pub fn snapshot_value(config: &BotConfig) -> Value {
    serde_json::json!({
        "name": config.name,
        "avatar": config.avatar,
        "is_available": config.is_available,
        "bot_biz_id": config.bot_biz_id,
        "session_id": config.session_id,
        "extra": config.extra,
    })
}

/// Config used when neither an injected value nor a snapshot is available.
pub fn default_bot_config() -> BotConfig {
    BotConfig {
        name: DEFAULT_BOT_NAME.to_string(),
        avatar: DEFAULT_BOT_AVATAR.to_string(),
        is_available: true,
        bot_biz_id: DEFAULT_BOT_BIZ_ID.to_string(),
        ..BotConfig::default()
    }
}

/// Hand-off to a human agent, as last reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferState {
    pub active: bool,
    pub avatar: Option<String>,
}

/// Owns the session id and the normalized bot config.
pub struct SessionStore {
    config: BotConfig,
    transfer: TransferState,
    snapshot: Box<dyn SnapshotStore>,
    bus: Arc<EventBus>,
}

impl SessionStore {
    pub fn new(snapshot: Box<dyn SnapshotStore>, bus: Arc<EventBus>) -> Self {
        Self {
            config: BotConfig::default(),
            transfer: TransferState::default(),
            snapshot,
            bus,
        }
    }

    /// Starts a new session.
    ///
    /// The bot config comes from `injected` if it normalizes, else from the
    /// stored snapshot, else from the built-in default.
    pub fn initialize(&mut self, injected: Option<&Value>) -> &BotConfig {
        let session_id = uuid::Uuid::new_v4().to_string();

        let from_injected = injected.and_then(|v| {
            let patch = normalize(v);
            if patch.is_none() {
                warn!("injected bot config is not an object, ignoring");
            }
            patch.map(|p| (p, "injected"))
        });
        let source = from_injected.or_else(|| match self.snapshot.load() {
            Ok(Some(stored)) => normalize(&stored).map(|p| (p, "snapshot")),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to read bot config snapshot");
                None
            }
        });

        let mut config = match source {
            Some((patch, origin)) => {
                debug!(origin, "bot config source selected");
                patch.into_config()
            }
            None => {
                debug!(origin = "default", "bot config source selected");
                default_bot_config()
            }
        };
        config.session_id = session_id;
        self.config = config;
        info!(session_id = %self.config.session_id, bot = %self.config.name, "session initialized");
        self.persist_and_publish();
        &self.config
    }

    /// Merges a partial config pushed mid-session.
    ///
    /// Returns `false` if the payload could not be normalized.
    pub fn apply_update(&mut self, partial: &Value) -> bool {
        let Some(patch) = normalize(partial) else {
            debug!("config-like event could not be normalized, ignoring");
            return false;
        };
        let session_id = self.config.session_id.clone();
        patch.apply_to(&mut self.config);
        self.config.session_id = session_id;
        debug!(bot = %self.config.name, "bot config updated from stream");
        self.persist_and_publish();
        true
    }

    fn persist_and_publish(&self) {
        if let Err(e) = self.snapshot.save(&snapshot_value(&self.config)) {
            warn!(error = %e, "failed to persist bot config snapshot");
        }
        self.bus.publish(BusEvent::ConfigChanged(self.config.clone()));
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    /// True when `candidate` names the current session.
    pub fn is_current(&self, candidate: Option<&str>) -> bool {
        !self.config.session_id.is_empty() && candidate == Some(self.config.session_id.as_str())
    }

    pub fn set_transfer(&mut self, active: bool, avatar: Option<String>) {
        info!(active, "human transfer state changed");
        self.transfer = TransferState { active, avatar };
    }

    pub fn transfer(&self) -> &TransferState {
        &self.transfer
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.config)
            .field("transfer", &self.transfer)
            .finish()
    }
}
