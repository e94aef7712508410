use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::session::{GameProfile, RewardConfig};

pub const HOME_ENV: &str = "ARCADE_REWARDS_HOME";
pub const SINK_URL_ENV: &str = "ARCADE_REWARDS_SINK_URL";
pub const DEBUG_ENV: &str = "ARCADE_REWARDS_DEBUG";

const DEFAULT_SINK_URL: &str = "http://localhost:3000";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    reward_sink_url: String,
    request_timeout_ms: u64,
    user_id: Option<String>,
    profiles: HashMap<String, RewardConfig>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            reward_sink_url: DEFAULT_SINK_URL.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            user_id: None,
            profiles: HashMap::new(),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid settings in {}", path.display()))?
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// `$ARCADE_REWARDS_HOME`, falling back to `~/.arcade-rewards`.
    pub fn data_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os(HOME_ENV) {
            return PathBuf::from(dir);
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".arcade-rewards")
    }

    pub fn reward_sink_url(&self) -> String {
        std::env::var(SINK_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.read().reward_sink_url.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.read().request_timeout_ms.max(1))
    }

    pub fn user_id(&self) -> Option<String> {
        self.read().user_id.clone()
    }

    pub fn debug_mode() -> bool {
        std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Stored override for the game, else the built-in preset.
    pub fn reward_config(&self, profile: GameProfile) -> RewardConfig {
        self.read()
            .profiles
            .get(profile.as_str())
            .cloned()
            .unwrap_or_else(|| profile.reward_config())
    }

    pub fn update_user_id(&self, user_id: Option<String>) -> Result<()> {
        let mut guard = self.write();
        guard.user_id = user_id;
        self.persist(&guard)
    }

    pub fn update_profile(&self, profile: GameProfile, config: RewardConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self.write();
        guard.profiles.insert(profile.as_str().to_string(), config);
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
