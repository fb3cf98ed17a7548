use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::STATE_DIR_NAME;
use crate::errors::Result;
use crate::services::catalog::components;

pub const BACKUP_SUFFIX: &str = ".patchops.bak";
pub const LEGACY_BACKUP_SUFFIX: &str = ".bak";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn backup_path(target: &Path) -> PathBuf {
    with_suffix(target, BACKUP_SUFFIX)
}

pub fn legacy_backup_path(target: &Path) -> PathBuf {
    with_suffix(target, LEGACY_BACKUP_SUFFIX)
}

/// The backup that already holds the original of `target`, if any.
pub fn existing_backup(target: &Path) -> Option<PathBuf> {
    [backup_path(target), legacy_backup_path(target)]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionAction {
    Planned,
    Renamed,
    SkippedExisting,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupConversion {
    pub from: PathBuf,
    pub to: PathBuf,
    pub action: ConversionAction,
}

fn is_managed_path(relative: &str) -> bool {
    components().iter().any(|spec| spec.permits(relative))
}

fn collect_legacy(root: &Path, dir: &Path, found: &mut Vec<(PathBuf, PathBuf)>) -> Result<()> {
    let mut children: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .collect();
    children.sort();
    for child in children {
        let name = child
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if child.is_dir() {
            if name != STATE_DIR_NAME {
                collect_legacy(root, &child, found)?;
            }
            continue;
        }
        if name.ends_with(BACKUP_SUFFIX) || !name.ends_with(LEGACY_BACKUP_SUFFIX) {
            continue;
        }
        let original = child.with_file_name(&name[..name.len() - LEGACY_BACKUP_SUFFIX.len()]);
        let relative = original
            .strip_prefix(root)
            .map(|path| path.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        if is_managed_path(&relative) {
            found.push((child.clone(), backup_path(&original)));
        }
    }
    Ok(())
}

/// Renames legacy `<file>.bak` backups of managed files to
/// `<file>.patchops.bak`. With `apply == false` only the plan is returned.
pub fn convert_legacy_backups(target_dir: &Path, apply: bool) -> Result<Vec<BackupConversion>> {
    let mut found = Vec::new();
    collect_legacy(target_dir, target_dir, &mut found)?;

    let mut report = Vec::with_capacity(found.len());
    for (from, to) in found {
        let action = if to.exists() {
            ConversionAction::SkippedExisting
        } else if apply {
            fs::rename(&from, &to)?;
            tracing::info!("converted {} -> {}", from.display(), to.display());
            ConversionAction::Renamed
        } else {
            ConversionAction::Planned
        };
        report.push(BackupConversion { from, to, action });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;

    #[test]
    fn existing_backup_prefers_current_suffix() {
        let dir = temp_dir("backups");
        let target = dir.join("dsound.dll");
        assert!(existing_backup(&target).is_none());
        fs::write(legacy_backup_path(&target), b"legacy").expect("legacy");
        assert_eq!(existing_backup(&target), Some(dir.join("dsound.dll.bak")));
        fs::write(backup_path(&target), b"current").expect("current");
        assert_eq!(existing_backup(&target), Some(dir.join("dsound.dll.patchops.bak")));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn conversion_plans_then_renames_managed_backups_only() {
        let dir = temp_dir("backups");
        fs::write(dir.join("dxgi.dll.bak"), b"orig dxgi").expect("dxgi");
        fs::write(dir.join("d3d11.dll.bak"), b"orig d3d11").expect("d3d11");
        fs::write(dir.join("d3d11.dll.patchops.bak"), b"newer").expect("existing");
        fs::write(dir.join("savegame.bak"), b"user data").expect("unrelated");
        fs::create_dir_all(dir.join("LPC")).expect("lpc");
        fs::write(dir.join("LPC").join("core_mp.ff.bak"), b"ff").expect("ff");

        let plan = convert_legacy_backups(&dir, false).expect("dry run");
        assert_eq!(plan.len(), 3);
        assert!(dir.join("dxgi.dll.bak").exists());
        let skipped: Vec<_> = plan
            .iter()
            .filter(|item| item.action == ConversionAction::SkippedExisting)
            .collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].from.ends_with("d3d11.dll.bak"));

        let applied = convert_legacy_backups(&dir, true).expect("apply");
        assert_eq!(
            applied
                .iter()
                .filter(|item| item.action == ConversionAction::Renamed)
                .count(),
            2
        );
        assert_eq!(fs::read(dir.join("dxgi.dll.patchops.bak")).expect("converted"), b"orig dxgi");
        assert!(dir.join("LPC").join("core_mp.ff.patchops.bak").exists());
        assert_eq!(fs::read(dir.join("d3d11.dll.patchops.bak")).expect("kept"), b"newer");
        assert!(dir.join("savegame.bak").exists());
        let _ = fs::remove_dir_all(dir);
    }
}
