use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::errors::{PatchOpsError, Result};
use crate::models::{ComponentId, InstallManifest};
use crate::utils::file::write_atomic;

pub const STATE_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub version: Option<String>,
    pub sha256: String,
    pub size: u64,
    pub recorded_at: DateTime<Utc>,
}

/// What an owned external-config key held before PatchOps first changed it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorRecord {
    /// Prior scalar value; `None` when the key did not exist.
    pub value: Option<String>,
    /// Prior leaves of an owned block; empty when the block did not exist.
    pub fields: BTreeMap<String, String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDocument {
    pub version: u32,
    pub components: BTreeMap<ComponentId, InstallManifest>,
    pub checksums: BTreeMap<String, ChecksumRecord>,
    pub config_priors: BTreeMap<String, PriorRecord>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            components: BTreeMap::new(),
            checksums: BTreeMap::new(),
            config_priors: BTreeMap::new(),
            updated_at: None,
        }
    }
}

impl StateDocument {
    pub fn manifest(&self, id: ComponentId) -> Option<&InstallManifest> {
        self.components
            .get(&id)
            .filter(|manifest| !manifest.is_empty())
    }
}

/// Per-install-root persistence of manifests, the checksum cache and
/// external-config priors. Every mutation reloads the file under the lock,
/// applies the change and rewrites the whole document atomically.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ManifestStore {
    pub fn for_game_dir(game_dir: &Path) -> Self {
        Self::at(AppConfig::state_path(game_dir))
    }

    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StateDocument> {
        if !self.path.exists() {
            return Ok(StateDocument::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(StateDocument::default());
        }
        // A corrupt state file still may be the only record of backups, so it
        // is surfaced instead of being replaced with an empty document.
        serde_json::from_str(&raw).map_err(|err| {
            PatchOpsError::Config(format!("{} is corrupt: {}", self.path.display(), err))
        })
    }

    pub fn load(&self) -> Result<StateDocument> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PatchOpsError::Config("state lock poisoned".to_string()))?;
        self.read()
    }

    pub fn manifest(&self, id: ComponentId) -> Result<InstallManifest> {
        Ok(self.load()?.components.remove(&id).unwrap_or_default())
    }

    /// Read-modify-write of the state document. The write is durable before
    /// this returns.
    pub fn update<T>(&self, apply: impl FnOnce(&mut StateDocument) -> T) -> Result<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PatchOpsError::Config("state lock poisoned".to_string()))?;
        let mut document = self.read()?;
        let result = apply(&mut document);
        document.components.retain(|_, manifest| !manifest.is_empty());
        document.updated_at = Some(Utc::now());
        let raw = serde_json::to_vec_pretty(&document)?;
        write_atomic(&self.path, &raw)?;
        Ok(result)
    }

    pub fn update_manifest<T>(
        &self,
        id: ComponentId,
        apply: impl FnOnce(&mut InstallManifest) -> T,
    ) -> Result<T> {
        self.update(|document| {
            let manifest = document.components.entry(id).or_default();
            let result = apply(manifest);
            manifest.updated_at = Some(Utc::now());
            result
        })
    }

    pub fn record_checksum(
        &self,
        asset: &str,
        version: Option<String>,
        sha256: &str,
        size: u64,
    ) -> Result<()> {
        self.update(|document| {
            document.checksums.insert(
                asset.to_string(),
                ChecksumRecord {
                    version,
                    sha256: sha256.to_ascii_lowercase(),
                    size,
                    recorded_at: Utc::now(),
                },
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryOrigin, EntryStatus, ManifestEntry};
    use crate::test_support::temp_dir;

    fn entry(path: &str) -> ManifestEntry {
        ManifestEntry {
            path: path.to_string(),
            origin: EntryOrigin::NewlyCreated,
            installed_at: Utc::now(),
            source_sha256: "00".repeat(32),
            status: EntryStatus::Pending,
            protected: false,
        }
    }

    #[test]
    fn updates_persist_and_empty_manifests_are_dropped() {
        let dir = temp_dir("state");
        let store = ManifestStore::for_game_dir(&dir);
        assert_eq!(store.load().expect("empty state"), StateDocument::default());

        store
            .update_manifest(ComponentId::DxvkGplasync, |manifest| {
                manifest.entries.push(entry("dxgi.dll"));
            })
            .expect("write manifest");
        store
            .record_checksum("dxvk-archive", Some("v2.6".into()), "ABCD", 42)
            .expect("record checksum");

        let reopened = ManifestStore::for_game_dir(&dir);
        let document = reopened.load().expect("reload");
        assert_eq!(
            document
                .manifest(ComponentId::DxvkGplasync)
                .and_then(|manifest| manifest.entry("DXGI.dll"))
                .map(|entry| entry.status),
            Some(EntryStatus::Pending)
        );
        assert_eq!(document.checksums["dxvk-archive"].sha256, "abcd");

        reopened
            .update_manifest(ComponentId::DxvkGplasync, |manifest| {
                manifest.remove("dxgi.dll")
            })
            .expect("remove entry");
        assert!(reopened
            .load()
            .expect("reload")
            .components
            .is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_state_is_an_error_not_a_reset() {
        let dir = temp_dir("state");
        let store = ManifestStore::for_game_dir(&dir);
        std::fs::create_dir_all(store.path().parent().expect("parent")).expect("state dir");
        std::fs::write(store.path(), b"{ not json").expect("write corrupt state");
        assert!(store.load().is_err());
        assert!(store.update(|_| ()).is_err());
        assert_eq!(
            std::fs::read(store.path()).expect("still there"),
            b"{ not json".to_vec()
        );
        let _ = std::fs::remove_dir_all(dir);
    }
}
