//! Edits the two Steam documents PatchOps shares with Steam: per-user
//! `localconfig.vdf` (launch options) and global `config.vdf` (compatibility
//! tool mapping).
//!
//! Each mutation reloads the document from disk, changes only the leaves
//! PatchOps owns and writes the full tree back. The value a key held before
//! PatchOps first touched it is kept in the state document so `clear_*`
//! can put it back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sysinfo::System;

use crate::config::AppConfig;
use crate::errors::{PatchOpsError, Result};
use crate::services::backups::backup_path;
use crate::services::manifest_store::{ManifestStore, PriorRecord};
use crate::utils::file::{copy_durable, write_atomic};
use crate::utils::paths::{config_vdf_path, find_steam_user_id, localconfig_path};
use crate::utils::vdf::{self, VdfNode};

const COMMAND_PLACEHOLDER: &str = "%command%";
const LAUNCH_OPTIONS_KEY: &str = "LaunchOptions";
const LOCALCONFIG_ROOT: &str = "UserLocalConfigStore";
const CONFIG_ROOT: &str = "InstallConfigStore";
const APPS_PATH: [&str; 4] = ["Software", "Valve", "Steam", "apps"];
const COMPAT_PATH: [&str; 4] = ["Software", "Valve", "Steam", "CompatToolMapping"];
const COMPAT_LEAVES: [&str; 3] = ["name", "config", "priority"];
const COMPAT_PRIORITY: &str = "250";
const STEAM_PROCESSES: [&str; 3] = ["steam", "steam.exe", "steamwebhelper"];

pub fn steam_is_running() -> bool {
    let mut system = System::new();
    system.refresh_processes();
    system.processes().values().any(|process| {
        let name = process.name().to_ascii_lowercase();
        STEAM_PROCESSES.iter().any(|candidate| *candidate == name)
    })
}

/// Removes every copy of `token` and normalizes whitespace.
pub fn strip_token(options: &str, token: &str) -> String {
    options
        .replace(token, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Puts `token` directly before `%command%`, adding the placeholder when the
/// user's options lack one.
pub fn merge_token(options: Option<&str>, token: &str) -> String {
    let rest = strip_token(options.unwrap_or_default(), token);
    if rest.is_empty() {
        format!("{} {}", token, COMMAND_PLACEHOLDER)
    } else if rest.contains(COMMAND_PLACEHOLDER) {
        rest.replacen(
            COMMAND_PLACEHOLDER,
            &format!("{} {}", token, COMMAND_PLACEHOLDER),
            1,
        )
    } else {
        format!("{} {} {}", token, COMMAND_PLACEHOLDER, rest)
    }
}

fn launch_prior_key(user_id: &str, app_id: &str) -> String {
    format!("launch-options/{}/{}", user_id, app_id)
}

fn compat_prior_key(app_id: &str) -> String {
    format!("compat-tool/{}", app_id)
}

fn unavailable(path: &Path, reason: impl std::fmt::Display) -> PatchOpsError {
    PatchOpsError::ConfigUnavailable(format!("{}: {}", path.display(), reason))
}

/// Loads a Steam document, insisting on its expected root block so an empty
/// or foreign file is never treated as an empty config.
fn load_document(path: &Path, root_key: &str) -> Result<VdfNode> {
    let raw = std::fs::read_to_string(path).map_err(|err| unavailable(path, err))?;
    let document = vdf::parse(&raw).map_err(|err| unavailable(path, err))?;
    if document.node(root_key).is_none() {
        return Err(unavailable(path, format!("missing '{}' block", root_key)));
    }
    Ok(document)
}

fn save_document(path: &Path, document: &VdfNode) -> Result<()> {
    copy_durable(path, &backup_path(path))?;
    write_atomic(path, vdf::to_string(document).as_bytes())?;
    tracing::info!("updated {}", path.display());
    Ok(())
}

#[derive(Clone, Debug)]
pub struct SteamConfigMutator {
    steam_root: PathBuf,
    user_id: Option<String>,
    store: ManifestStore,
}

impl SteamConfigMutator {
    pub fn new(steam_root: PathBuf, user_id: Option<String>, store: ManifestStore) -> Self {
        Self {
            steam_root,
            user_id,
            store,
        }
    }

    pub fn from_config(config: &AppConfig, store: ManifestStore) -> Result<Self> {
        let steam_root = config.steam_root().ok_or_else(|| {
            PatchOpsError::ConfigUnavailable("Steam installation not found".to_string())
        })?;
        Ok(Self::new(steam_root, config.steam_user_id.clone(), store))
    }

    fn user_id(&self) -> Result<String> {
        self.user_id
            .clone()
            .or_else(|| find_steam_user_id(&self.steam_root))
            .ok_or_else(|| {
                PatchOpsError::ConfigUnavailable(format!(
                    "no Steam user under {}",
                    self.steam_root.join("userdata").display()
                ))
            })
    }

    fn localconfig(&self) -> Result<(String, PathBuf)> {
        let user_id = self.user_id()?;
        let path = localconfig_path(&self.steam_root, &user_id);
        Ok((user_id, path))
    }

    fn warn_if_steam_running(&self) {
        if steam_is_running() {
            tracing::warn!("Steam is running; it may overwrite launch options when it exits");
        }
    }

    pub fn launch_options(&self, app_id: &str) -> Result<Option<String>> {
        let (_, path) = self.localconfig()?;
        let document = load_document(&path, LOCALCONFIG_ROOT)?;
        Ok(read_launch_options(&document, app_id))
    }

    fn write_launch_options(&self, path: &Path, app_id: &str, value: Option<&str>) -> Result<()> {
        let mut document = load_document(path, LOCALCONFIG_ROOT)?;
        let root = document
            .node_mut(LOCALCONFIG_ROOT)
            .ok_or_else(|| unavailable(path, "missing root block"))?;
        match value {
            Some(value) => {
                let app = root
                    .ensure_path(&APPS_PATH)
                    .and_then(|apps| apps.ensure_node(app_id))
                    .map_err(|err| unavailable(path, err))?;
                app.set_text(LAUNCH_OPTIONS_KEY, value);
            }
            None => {
                let app_path = [APPS_PATH[0], APPS_PATH[1], APPS_PATH[2], APPS_PATH[3], app_id];
                match root.node_at_mut(&app_path) {
                    Some(app) => {
                        app.remove(LAUNCH_OPTIONS_KEY);
                    }
                    None => return Ok(()),
                }
            }
        }
        save_document(path, &document)
    }

    pub fn set_launch_options(&self, app_id: &str, value: &str) -> Result<()> {
        let (user_id, path) = self.localconfig()?;
        self.warn_if_steam_running();
        let current = read_launch_options(&load_document(&path, LOCALCONFIG_ROOT)?, app_id);
        self.record_launch_prior(&user_id, app_id, current)?;
        self.write_launch_options(&path, app_id, Some(value))
    }

    /// Keeps the first value seen; later calls never overwrite it.
    fn record_launch_prior(&self, user_id: &str, app_id: &str, current: Option<String>) -> Result<()> {
        self.store.update(|document| {
            document
                .config_priors
                .entry(launch_prior_key(user_id, app_id))
                .or_insert_with(|| PriorRecord {
                    value: current,
                    fields: BTreeMap::new(),
                    recorded_at: Some(Utc::now()),
                });
        })
    }

    /// Restores the value recorded before PatchOps first set the options, or
    /// removes the key when nothing was recorded.
    pub fn clear_launch_options(&self, app_id: &str) -> Result<()> {
        let (user_id, path) = self.localconfig()?;
        self.warn_if_steam_running();
        let key = launch_prior_key(&user_id, app_id);
        let prior = self.store.load()?.config_priors.get(&key).cloned();
        let restored = prior.and_then(|record| record.value);
        self.write_launch_options(&path, app_id, restored.as_deref())?;
        self.store.update(|document| {
            document.config_priors.remove(&key);
        })
    }

    pub fn add_launch_token(&self, app_id: &str, token: &str) -> Result<String> {
        let current = self.launch_options(app_id)?;
        let merged = merge_token(current.as_deref(), token);
        if current.as_deref() == Some(merged.as_str()) {
            // Already wired by hand: that value is the prior.
            let (user_id, _) = self.localconfig()?;
            self.record_launch_prior(&user_id, app_id, current)?;
        } else {
            self.set_launch_options(app_id, &merged)?;
        }
        Ok(merged)
    }

    /// Strips `token`. Returns the options left in place afterwards.
    pub fn remove_launch_token(&self, app_id: &str, token: &str) -> Result<Option<String>> {
        let Some(current) = self.launch_options(app_id)? else {
            return Ok(None);
        };
        if !current.contains(token) {
            return Ok(Some(current));
        }
        let (user_id, path) = self.localconfig()?;
        let key = launch_prior_key(&user_id, app_id);
        let stripped = strip_token(&current, token);
        let prior = self.store.load()?.config_priors.get(&key).cloned();

        let back_to_prior = match &prior {
            Some(record) => {
                merge_token(record.value.as_deref(), token) == merge_token(Some(&stripped), token)
            }
            None => stripped == COMMAND_PLACEHOLDER || stripped.is_empty(),
        };
        if back_to_prior {
            self.clear_launch_options(app_id)?;
            return self.launch_options(app_id);
        }

        self.warn_if_steam_running();
        self.write_launch_options(&path, app_id, Some(&stripped))?;
        self.store.update(|document| {
            document.config_priors.remove(&key);
        })?;
        Ok(Some(stripped))
    }

    fn config_path(&self) -> PathBuf {
        config_vdf_path(&self.steam_root)
    }

    pub fn compat_mapping(&self, app_id: &str) -> Result<Option<String>> {
        let path = self.config_path();
        let document = load_document(&path, CONFIG_ROOT)?;
        Ok(read_compat_leaves(&document, app_id)
            .and_then(|leaves| leaves.get("name").cloned())
            .filter(|name| !name.is_empty()))
    }

    pub fn set_compat_mapping(&self, app_id: &str, tool: &str) -> Result<()> {
        let path = self.config_path();
        self.warn_if_steam_running();
        let mut document = load_document(&path, CONFIG_ROOT)?;
        let current = read_compat_leaves(&document, app_id);
        self.store.update(|state| {
            state
                .config_priors
                .entry(compat_prior_key(app_id))
                .or_insert_with(|| PriorRecord {
                    value: current
                        .as_ref()
                        .map(|leaves| leaves.get("name").cloned().unwrap_or_default()),
                    fields: current.clone().unwrap_or_default(),
                    recorded_at: Some(Utc::now()),
                });
        })?;

        let root = document
            .node_mut(CONFIG_ROOT)
            .ok_or_else(|| unavailable(&path, "missing root block"))?;
        let mapping = root
            .ensure_path(&COMPAT_PATH)
            .and_then(|mapping| mapping.ensure_node(app_id))
            .map_err(|err| unavailable(&path, err))?;
        mapping.set_text("name", tool);
        mapping.set_text("config", "");
        mapping.set_text("priority", COMPAT_PRIORITY);
        save_document(&path, &document)
    }

    pub fn clear_compat_mapping(&self, app_id: &str) -> Result<()> {
        let path = self.config_path();
        self.warn_if_steam_running();
        let mut document = load_document(&path, CONFIG_ROOT)?;
        let key = compat_prior_key(app_id);
        let prior = self.store.load()?.config_priors.get(&key).cloned();

        let root = document
            .node_mut(CONFIG_ROOT)
            .ok_or_else(|| unavailable(&path, "missing root block"))?;
        if let Some(mapping) = root.node_at_mut(&COMPAT_PATH) {
            match prior.filter(|record| record.value.is_some()) {
                Some(record) => {
                    let entry = mapping
                        .ensure_node(app_id)
                        .map_err(|err| unavailable(&path, err))?;
                    for leaf in COMPAT_LEAVES {
                        match record.fields.get(leaf) {
                            Some(value) => entry.set_text(leaf, value.clone()),
                            None => {
                                entry.remove(leaf);
                            }
                        }
                    }
                }
                None => {
                    mapping.remove(app_id);
                }
            }
            save_document(&path, &document)?;
        }
        self.store.update(|state| {
            state.config_priors.remove(&key);
        })
    }
}

fn read_launch_options(document: &VdfNode, app_id: &str) -> Option<String> {
    document
        .node(LOCALCONFIG_ROOT)
        .and_then(|root| root.node_at(&APPS_PATH))
        .and_then(|apps| apps.node(app_id))
        .and_then(|app| app.text(LAUNCH_OPTIONS_KEY))
        .map(str::to_string)
}

fn read_compat_leaves(document: &VdfNode, app_id: &str) -> Option<BTreeMap<String, String>> {
    let mapping = document
        .node(CONFIG_ROOT)
        .and_then(|root| root.node_at(&COMPAT_PATH))
        .and_then(|mapping| mapping.node(app_id))?;
    Some(
        COMPAT_LEAVES
            .iter()
            .filter_map(|leaf| {
                mapping
                    .text(leaf)
                    .map(|value| (leaf.to_string(), value.to_string()))
            })
            .collect(),
    )
}
