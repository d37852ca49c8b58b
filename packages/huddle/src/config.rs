use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use room_session::ReconnectPolicy;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [backend]
//                    base_url = "http://chat.example.com"
//
//   env var:         HUDDLE_BACKEND__BASE_URL=...   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub user: UserFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Backend endpoints (lives under `[backend]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Stream endpoint. Derived from `base_url` when not set.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub token: String,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: None,
            token: String::new(),
        }
    }
}

impl BackendFileConfig {
    /// The stream endpoint: explicit `ws_url` if set, otherwise `base_url`
    /// with the scheme swapped to ws/wss.
    pub fn ws_url(&self) -> String {
        match &self.ws_url {
            Some(url) => url.clone(),
            None => {
                if let Some(rest) = self.base_url.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = self.base_url.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    self.base_url.clone()
                }
            }
        }
    }
}

/// Identity of the signed-in user (lives under `[user]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserFileConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

/// Chat tuning knobs (lives under `[chat]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// 0 disables automatic reconnect.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl ChatFileConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:4600".to_string()
}
fn default_history_limit() -> usize {
    50
}
fn default_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_base_ms() -> u64 {
    500
}
fn default_reconnect_max_ms() -> u64 {
    15000
}

/// Build a figment that layers: defaults → config.toml → HUDDLE_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `HUDDLE_BACKEND__TOKEN=abc`  →  `backend.token = "abc"`
///   `HUDDLE_CHAT__HISTORY_LIMIT=100`  →  `chat.history_limit = 100`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("HUDDLE_").split("__"))
}

// =============================================================================
// Directory layout (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct HuddleConfig {
    pub data_dir: PathBuf,
}

impl HuddleConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("could not find home directory")?
                .join(".huddle"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {:?}", data_dir))?;

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
