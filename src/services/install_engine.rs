//! Applies validated packages onto the game directory and reverses them.
//!
//! Every replaced file goes through the same write-ahead sequence: a
//! `Pending` manifest entry is made durable, the original is copied to its
//! backup, the new bytes are renamed into place and only then is the entry
//! marked `Complete`. A crash at any point leaves the manifest describing
//! every file that may have changed.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{PatchOpsError, Result};
use crate::models::{
    CancelToken, EntryOrigin, EntryStatus, InstallReport, ManifestEntry, Package, UninstallReport,
};
use crate::services::backups::{backup_path, existing_backup};
use crate::services::catalog::ComponentSpec;
use crate::services::manifest_store::ManifestStore;
use crate::utils::file::{
    normalize_relative, replace_atomic, sha256_bytes, sha256_file, write_atomic,
};

/// Reports `(current_file, done, total)` after each file.
pub type FileProgress<'a> = &'a (dyn Fn(&str, usize, usize) + Send + Sync);

#[derive(Clone, Debug)]
enum Payload {
    Staged(PathBuf),
    Generated(Vec<u8>),
}

#[derive(Clone, Debug)]
struct PlannedFile {
    target: String,
    payload: Payload,
    sha256: String,
}

/// Files produced by PatchOps itself, such as `dxvk.conf`.
#[derive(Clone, Debug)]
pub struct GeneratedFile {
    pub target: String,
    pub contents: Vec<u8>,
}

pub struct InstallEngine<'a> {
    store: &'a ManifestStore,
    target_dir: &'a Path,
}

fn relative_string(target_dir: &Path, path: &Path) -> String {
    path.strip_prefix(target_dir)
        .map(|relative| relative.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| path.to_string_lossy().to_string())
}

impl<'a> InstallEngine<'a> {
    pub fn new(store: &'a ManifestStore, target_dir: &'a Path) -> Self {
        Self { store, target_dir }
    }

    fn plan(
        &self,
        spec: &ComponentSpec,
        packages: &[Package],
        generated: &[GeneratedFile],
    ) -> Result<Vec<PlannedFile>> {
        let mut planned: Vec<PlannedFile> = Vec::new();
        let staged = packages.iter().flat_map(|package| package.installable());
        for entry in staged {
            let (Some(target), Some(path), Some(sha256)) =
                (&entry.target, &entry.staged, &entry.sha256)
            else {
                continue;
            };
            planned.push(PlannedFile {
                target: target.clone(),
                payload: Payload::Staged(path.clone()),
                sha256: sha256.clone(),
            });
        }
        for file in generated {
            planned.push(PlannedFile {
                target: file.target.clone(),
                payload: Payload::Generated(file.contents.clone()),
                sha256: sha256_bytes(&file.contents),
            });
        }

        let mut seen = std::collections::HashSet::new();
        let mut unique = Vec::with_capacity(planned.len());
        for file in planned {
            let target = normalize_relative(&file.target).ok_or_else(|| {
                PatchOpsError::ContentRejected(format!("unsafe target path {}", file.target))
            })?;
            if !spec.permits(&target) {
                return Err(PatchOpsError::ContentRejected(format!(
                    "{} is outside the {} whitelist",
                    target, spec.id
                )));
            }
            if seen.insert(target.to_ascii_lowercase()) {
                unique.push(PlannedFile { target, ..file });
            }
        }
        Ok(unique)
    }

    fn ensure_no_conflict(&self, spec: &ComponentSpec) -> Result<()> {
        let document = self.store.load()?;
        for other in spec.conflicts {
            if document.manifest(*other).is_some() {
                return Err(PatchOpsError::Conflict(spec.id, *other));
            }
        }
        Ok(())
    }

    pub fn install(
        &self,
        spec: &ComponentSpec,
        packages: &[Package],
        generated: &[GeneratedFile],
        version: Option<String>,
        cancel: &CancelToken,
        progress: FileProgress<'_>,
    ) -> Result<InstallReport> {
        self.ensure_no_conflict(spec)?;
        let planned = self.plan(spec, packages, generated)?;
        let manifest = self.store.manifest(spec.id)?;
        let total = planned.len();
        let mut report = InstallReport::default();

        for (index, file) in planned.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    "{} install cancelled after {} of {} files",
                    spec.id,
                    index,
                    total
                );
                return Err(PatchOpsError::Cancelled);
            }

            let dest = self.target_dir.join(&file.target);
            let known = manifest.entry(&file.target).cloned();

            if dest.exists() && spec.preserves_existing(&file.target) {
                tracing::info!("keeping existing {}", file.target);
                report.files_preserved += 1;
                progress(&file.target, index + 1, total);
                continue;
            }

            let backed_up = self.install_file(spec, file, &dest, known)?;
            if backed_up {
                report.files_backed_up += 1;
            }
            report.files_installed += 1;
            progress(&file.target, index + 1, total);
        }

        self.store
            .update_manifest(spec.id, |manifest| manifest.version = version.clone())?;
        report.message = format!(
            "{} installed {} file(s), {} backed up, {} preserved",
            spec.display_name, report.files_installed, report.files_backed_up, report.files_preserved
        );
        tracing::info!("{}", report.message);
        Ok(report)
    }

    /// One write-ahead replace. Returns whether a new backup was made.
    fn install_file(
        &self,
        spec: &ComponentSpec,
        file: &PlannedFile,
        dest: &Path,
        known: Option<ManifestEntry>,
    ) -> Result<bool> {
        let origin = match &known {
            // Installed before, or interrupted: the recorded origin stands.
            Some(entry) => entry.origin.clone(),
            None if dest.exists() => {
                let backup = existing_backup(dest).unwrap_or_else(|| backup_path(dest));
                EntryOrigin::Backup {
                    path: relative_string(self.target_dir, &backup),
                }
            }
            None => EntryOrigin::NewlyCreated,
        };

        if known.is_none() {
            let entry = ManifestEntry {
                path: file.target.clone(),
                origin: origin.clone(),
                installed_at: Utc::now(),
                source_sha256: file.sha256.clone(),
                status: EntryStatus::Pending,
                protected: spec.is_protected(&file.target),
            };
            self.store
                .update_manifest(spec.id, |manifest| manifest.entries.push(entry))?;
        } else {
            self.store.update_manifest(spec.id, |manifest| {
                if let Some(entry) = manifest.entry_mut(&file.target) {
                    entry.status = EntryStatus::Pending;
                }
            })?;
        }

        let mut backed_up = false;
        if let EntryOrigin::Backup { path } = &origin {
            let backup = self.target_dir.join(path);
            if !backup.exists() && dest.exists() {
                if live_file_is_original(known.as_ref(), dest, &file.sha256) {
                    crate::utils::file::copy_durable(dest, &backup)?;
                    tracing::debug!("backed up {} to {}", file.target, path);
                    backed_up = true;
                } else {
                    tracing::warn!(
                        "backup {} is missing and {} is no longer the original; not replacing it",
                        path,
                        file.target
                    );
                }
            }
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match &file.payload {
            Payload::Staged(source) => replace_atomic(source, dest)?,
            Payload::Generated(contents) => write_atomic(dest, contents)?,
        }

        let sha256 = file.sha256.clone();
        self.store.update_manifest(spec.id, |manifest| {
            if let Some(entry) = manifest.entry_mut(&file.target) {
                entry.status = EntryStatus::Complete;
                entry.source_sha256 = sha256;
                entry.installed_at = Utc::now();
            }
        })?;
        Ok(backed_up)
    }

    pub fn uninstall(
        &self,
        spec: &ComponentSpec,
        cancel: &CancelToken,
        progress: FileProgress<'_>,
    ) -> Result<UninstallReport> {
        let manifest = self.store.manifest(spec.id)?;
        let mut report = UninstallReport::default();
        if manifest.is_empty() {
            report.message = format!("{} is not installed", spec.display_name);
            return Ok(report);
        }

        let total = manifest.entries.len();
        for (index, entry) in manifest.entries.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    "{} uninstall cancelled after {} of {} files",
                    spec.id,
                    index,
                    total
                );
                return Err(PatchOpsError::Cancelled);
            }

            if let Some(refusal) = self.revert_entry(entry, &mut report)? {
                tracing::warn!("{}", refusal);
                report.refused.push(refusal);
            } else {
                self.store
                    .update_manifest(spec.id, |manifest| manifest.remove(&entry.path))?;
            }
            progress(&entry.path, index + 1, total);
        }

        report.message = if report.refused.is_empty() {
            format!(
                "{} removed: {} restored, {} deleted",
                spec.display_name, report.files_restored, report.files_removed
            )
        } else {
            format!(
                "{} partially removed: {} restored, {} deleted, {} refused",
                spec.display_name,
                report.files_restored,
                report.files_removed,
                report.refused.len()
            )
        };
        tracing::info!("{}", report.message);
        Ok(report)
    }

    /// Reverts one entry. Returns a refusal message when the entry must stay.
    fn revert_entry(
        &self,
        entry: &ManifestEntry,
        report: &mut UninstallReport,
    ) -> Result<Option<String>> {
        let dest = self.target_dir.join(&entry.path);
        let backup = match &entry.origin {
            EntryOrigin::Backup { path } => {
                let recorded = self.target_dir.join(path);
                if recorded.is_file() {
                    Some(recorded)
                } else {
                    existing_backup(&dest)
                }
            }
            EntryOrigin::NewlyCreated => None,
        };

        if let Some(backup) = backup {
            fs::rename(&backup, &dest)?;
            tracing::debug!("restored {}", entry.path);
            report.files_restored += 1;
            return Ok(None);
        }

        if entry.protected {
            return Ok(Some(
                PatchOpsError::ProtectedFileWithoutBackup(entry.path.clone()).to_string(),
            ));
        }

        let original_untouched = matches!(entry.origin, EntryOrigin::Backup { .. })
            && entry.status == EntryStatus::Pending;
        if original_untouched {
            // Interrupted before the backup existed, so the live file was
            // never replaced.
            return Ok(None);
        }
        if matches!(entry.origin, EntryOrigin::Backup { .. }) {
            tracing::warn!("backup for {} is gone, deleting installed copy", entry.path);
        }
        if dest.exists() {
            fs::remove_file(&dest)?;
            report.files_removed += 1;
        }
        self.prune_empty_parents(&dest);
        Ok(None)
    }

    fn prune_empty_parents(&self, dest: &Path) {
        let mut current = dest.parent();
        while let Some(dir) = current {
            if dir == self.target_dir || !dir.starts_with(self.target_dir) {
                break;
            }
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

/// Whether the file at `dest` can still be the pre-install original. A
/// completed entry means the original was replaced; a pending one only if
/// the live bytes are already ours.
fn live_file_is_original(known: Option<&ManifestEntry>, dest: &Path, payload_sha256: &str) -> bool {
    let Some(entry) = known else {
        return true;
    };
    if entry.status == EntryStatus::Complete {
        return false;
    }
    match sha256_file(dest) {
        Ok(live) => {
            !live.eq_ignore_ascii_case(&entry.source_sha256)
                && !live.eq_ignore_ascii_case(payload_sha256)
        }
        Err(err) => {
            tracing::warn!("cannot hash {}: {}", dest.display(), err);
            false
        }
    }
}
