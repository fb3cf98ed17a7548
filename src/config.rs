use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PatchOpsError, Result};
use crate::models::TrustEntry;
use crate::utils::file::write_atomic;
use crate::utils::paths::{
    detect_steam_root, find_game_dir, has_game_executable, resolve_cache_dir, resolve_data_dir,
    resolve_log_dir, resolve_root_dir,
};

pub const SETTINGS_FILE: &str = "patchops_settings.json";
pub const TRUST_STORE_FILE: &str = "trust_store.json";
pub const STATE_DIR_NAME: &str = ".patchops";
pub const STATE_FILE_NAME: &str = "state.json";
pub const DEFAULT_APP_ID: &str = "311210";
pub const DEFAULT_COMPAT_TOOL: &str = "proton_experimental";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub connect_timeout_secs: u64,
    pub chunk_timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 1000,
            connect_timeout_secs: 10,
            chunk_timeout_secs: 60,
        }
    }
}

impl FetchSettings {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs.max(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TearFree {
    True,
    False,
    Auto,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DxvkSettings {
    pub enable_async: bool,
    pub gpl_async_cache: bool,
    pub num_compiler_threads: u32,
    pub max_frame_rate: u32,
    pub max_frame_latency: u32,
    pub tear_free: TearFree,
    pub show_hud: bool,
}

impl Default for DxvkSettings {
    fn default() -> Self {
        Self {
            enable_async: true,
            gpl_async_cache: true,
            num_compiler_threads: 0,
            max_frame_rate: 0,
            max_frame_latency: 1,
            tear_free: TearFree::True,
            show_hud: false,
        }
    }
}

/// Replaces the built-in locations of one asset.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetOverride {
    pub release_index: Option<String>,
    pub urls: Vec<String>,
    pub backup_urls: Vec<String>,
    pub sha256: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub game_directory: Option<PathBuf>,
    pub steam_root: Option<PathBuf>,
    pub steam_user_id: Option<String>,
    pub app_id: String,
    pub compat_tool: String,
    pub offline: bool,
    pub fetch: FetchSettings,
    pub dxvk: DxvkSettings,
    pub asset_overrides: BTreeMap<String, AssetOverride>,
    pub trusted_hashes: Vec<TrustEntry>,
    #[serde(skip)]
    pub root_dir: PathBuf,
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(skip)]
    pub cache_dir: PathBuf,
    #[serde(skip)]
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            game_directory: None,
            steam_root: None,
            steam_user_id: None,
            app_id: DEFAULT_APP_ID.to_string(),
            compat_tool: DEFAULT_COMPAT_TOOL.to_string(),
            offline: false,
            fetch: FetchSettings::default(),
            dxvk: DxvkSettings::default(),
            asset_overrides: BTreeMap::new(),
            trusted_hashes: Vec::new(),
            root_dir: PathBuf::from("."),
            data_dir: PathBuf::from("config"),
            cache_dir: PathBuf::from("mod_files"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl AppConfig {
    /// Loads settings from the resolved root and applies environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(resolve_root_dir())
    }

    pub fn load_from(root: PathBuf) -> Result<Self> {
        let data_dir = resolve_data_dir(&root);
        let settings_path = data_dir.join(SETTINGS_FILE);
        let mut config = if settings_path.exists() {
            let raw = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<AppConfig>(&raw).map_err(|err| {
                PatchOpsError::Config(format!("{}: {}", settings_path.display(), err))
            })?
        } else {
            AppConfig::default()
        };
        config.cache_dir = resolve_cache_dir(&root);
        config.log_dir = resolve_log_dir(&root);
        config.data_dir = data_dir;
        config.root_dir = root;
        config.apply_env();
        Ok(config)
    }

    /// Config rooted in `root` with defaults only, no environment applied.
    pub fn rooted(root: &Path) -> Self {
        Self {
            root_dir: root.to_path_buf(),
            data_dir: root.join("config"),
            cache_dir: root.join("mod_files"),
            log_dir: root.join("logs"),
            ..Self::default()
        }
    }

    fn apply_env(&mut self) {
        if let Some(value) = env_string("PATCHOPS_GAME_DIR") {
            self.game_directory = Some(PathBuf::from(value));
        }
        if let Some(value) = env_string("PATCHOPS_STEAM_ROOT") {
            self.steam_root = Some(PathBuf::from(value));
        }
        if let Some(value) = env_string("PATCHOPS_STEAM_USER") {
            self.steam_user_id = Some(value);
        }
        if let Some(retries) = env_usize("PATCHOPS_FETCH_RETRIES") {
            self.fetch.max_retries = retries.min(10) as u32;
        }
        self.offline = env_truthy("PATCHOPS_OFFLINE", self.offline);
    }

    pub fn save(&self) -> Result<()> {
        let raw = serde_json::to_vec_pretty(self)?;
        write_atomic(&self.data_dir.join(SETTINGS_FILE), &raw)?;
        Ok(())
    }

    pub fn trust_store_path(&self) -> PathBuf {
        self.data_dir.join(TRUST_STORE_FILE)
    }

    pub fn state_path(game_dir: &Path) -> PathBuf {
        game_dir.join(STATE_DIR_NAME).join(STATE_FILE_NAME)
    }

    pub fn steam_root(&self) -> Option<PathBuf> {
        self.steam_root.clone().or_else(detect_steam_root)
    }

    pub fn resolve_game_dir(&self) -> Result<PathBuf> {
        let game_dir = match &self.game_directory {
            Some(dir) => dir.clone(),
            None => self
                .steam_root()
                .and_then(|root| find_game_dir(&root, &self.app_id))
                .ok_or_else(|| {
                    PatchOpsError::NotFound(
                        "game directory not configured and not found in Steam libraries"
                            .to_string(),
                    )
                })?,
        };
        if !game_dir.is_dir() {
            return Err(PatchOpsError::NotFound(format!(
                "game directory {} does not exist",
                game_dir.display()
            )));
        }
        if !has_game_executable(&game_dir) {
            tracing::warn!(
                "{} does not contain BlackOps3.exe or BlackOpsIII.exe",
                game_dir.display()
            );
        }
        Ok(game_dir)
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

fn env_truthy(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}
