use std::path::Path;

use crate::errors::{PatchOpsError, Result};
use crate::models::{ComponentId, TrustEntry, TrustScope};

/// SHA-256 of the `BlackOps3.exe` shipped by Steam.
pub const STOCK_EXECUTABLE_SHA256: &str =
    "9ba98dba41e18ef47de6c63937340f8eae7cb251f8fbc2e78d70047b64aa15b5";

#[derive(Clone, Debug, Default)]
pub struct TrustStore {
    entries: Vec<TrustEntry>,
}

fn normalize_hash(value: &str) -> String {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_prefix("sha256:")
        .unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

impl TrustStore {
    pub fn builtin() -> Self {
        let mut store = Self::default();
        store.add(TrustEntry {
            sha256: STOCK_EXECUTABLE_SHA256.to_string(),
            label: "steam-stock-blackops3".to_string(),
            scope: TrustScope::BinaryReplacement,
            component: None,
        });
        store
    }

    pub fn with_entries(entries: impl IntoIterator<Item = TrustEntry>) -> Self {
        let mut store = Self::default();
        for entry in entries {
            store.add(entry);
        }
        store
    }

    /// Built-in entries, then the JSON list at `path` if present, then `extra`.
    pub fn load(path: &Path, extra: &[TrustEntry]) -> Result<Self> {
        let mut store = Self::builtin();
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let entries: Vec<TrustEntry> = serde_json::from_str(&raw).map_err(|err| {
                PatchOpsError::Config(format!("{}: {}", path.display(), err))
            })?;
            for entry in entries {
                store.add(entry);
            }
        }
        for entry in extra {
            store.add(entry.clone());
        }
        tracing::debug!("trust store loaded with {} entries", store.entries.len());
        Ok(store)
    }

    pub fn add(&mut self, mut entry: TrustEntry) {
        entry.sha256 = normalize_hash(&entry.sha256);
        if entry.sha256.len() != 64 || !entry.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            tracing::warn!("ignoring malformed trust entry '{}'", entry.label);
            return;
        }
        let duplicate = self
            .entries
            .iter()
            .any(|existing| existing.sha256 == entry.sha256 && existing.scope == entry.scope);
        if !duplicate {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[TrustEntry] {
        &self.entries
    }

    pub fn lookup<'a>(&'a self, sha256: &str) -> impl Iterator<Item = &'a TrustEntry> {
        let wanted = normalize_hash(sha256);
        self.entries
            .iter()
            .filter(move |entry| entry.sha256 == wanted)
    }

    pub fn replacement_entry(&self, sha256: &str) -> Option<&TrustEntry> {
        self.lookup(sha256)
            .find(|entry| entry.scope == TrustScope::BinaryReplacement)
    }

    /// Only a binary-replacement entry may authorise overwriting a protected
    /// executable; advisory entries never do.
    pub fn verify_replacement(&self, target: &str, sha256: &str) -> Result<&TrustEntry> {
        self.replacement_entry(sha256)
            .ok_or_else(|| PatchOpsError::ChecksumMismatch {
                label: target.to_string(),
                expected: "a trusted binary-replacement checksum".to_string(),
                actual: normalize_hash(sha256),
            })
    }

    pub fn component_for(&self, sha256: &str) -> Option<ComponentId> {
        self.replacement_entry(sha256).and_then(|entry| entry.component)
    }

    /// Advisory checksum recorded for a cached asset.
    pub fn advisory_for(&self, label: &str) -> Option<&TrustEntry> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.scope == TrustScope::Advisory && entry.label == label)
    }
}
