use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use zip::ZipArchive;

use crate::errors::{PatchOpsError, Result};
use crate::models::{EntryRole, Package, PackageEntry};
use crate::services::catalog::{AssetKind, AssetSpec, ComponentSpec, Layout};
use crate::services::trust_store::TrustStore;
use crate::utils::file::{file_name_of, is_ignored_archive_path, normalize_relative, sha256_file};
use crate::utils::vdf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarZst,
    TarXz,
    TarBz2,
    Executable,
    Directory,
}

#[derive(Clone, Debug)]
struct RawEntry {
    path: String,
    size: u64,
}

fn rejected(message: impl Into<String>) -> PatchOpsError {
    PatchOpsError::ContentRejected(message.into())
}

pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    if path.is_dir() {
        return Ok(ArchiveFormat::Directory);
    }
    let mut magic = [0u8; 6];
    let mut file = File::open(path)?;
    let read = file.read(&mut magic)?;
    let magic = &magic[..read];
    if magic.starts_with(b"PK\x03\x04") || magic.starts_with(b"PK\x05\x06") {
        Ok(ArchiveFormat::Zip)
    } else if magic.starts_with(&[0x1f, 0x8b]) {
        Ok(ArchiveFormat::TarGz)
    } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        Ok(ArchiveFormat::TarZst)
    } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        Ok(ArchiveFormat::TarXz)
    } else if magic.starts_with(b"BZh") {
        Ok(ArchiveFormat::TarBz2)
    } else if magic.starts_with(b"MZ") {
        Ok(ArchiveFormat::Executable)
    } else {
        Err(rejected(format!(
            "{} is not a recognised archive",
            path.display()
        )))
    }
}

fn is_executable_name(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".exe") || lower.ends_with(".dll")
}

fn is_manifest_name(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    [".json", ".vdf", ".acf", ".conf", ".cfg", ".ini"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Rejects descriptor files that do not parse.
pub fn parse_manifest(name: &str, bytes: &[u8]) -> Result<()> {
    let lower = name.to_ascii_lowercase();
    let text = std::str::from_utf8(bytes)
        .map_err(|_| rejected(format!("{} is not valid UTF-8", name)))?;
    if lower.ends_with(".json") {
        serde_json::from_str::<serde_json::Value>(text)
            .map_err(|err| rejected(format!("{}: {}", name, err)))?;
    } else if lower.ends_with(".vdf") || lower.ends_with(".acf") {
        vdf::parse(text).map_err(|err| rejected(format!("{}: {}", name, err)))?;
    } else {
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            let is_comment = line.starts_with('#') || line.starts_with(';') || line.starts_with("//");
            let is_section = line.starts_with('[') && line.ends_with(']');
            if line.is_empty() || is_comment || is_section {
                continue;
            }
            if !line.contains('=') {
                return Err(rejected(format!(
                    "{} line {}: expected key=value",
                    name,
                    number + 1
                )));
            }
        }
    }
    Ok(())
}

fn safe_entry_path(raw: &str) -> Result<String> {
    normalize_relative(raw).ok_or_else(|| rejected(format!("unsafe path in archive: {}", raw)))
}

fn list_entries(path: &Path, format: ArchiveFormat, spec: &AssetSpec) -> Result<Vec<RawEntry>> {
    let mut entries = Vec::new();
    match format {
        ArchiveFormat::Executable => {
            let name = match spec.layout {
                Layout::Single(name) => name.to_string(),
                Layout::Flatten { .. } => file_name_of(&path.to_string_lossy()).to_string(),
            };
            entries.push(RawEntry {
                path: name,
                size: fs::metadata(path)?.len(),
            });
        }
        _ => {
            visit_entries(path, format, &mut |name: &str, size: u64, _: &mut dyn Read| {
                entries.push(RawEntry {
                    path: name.to_string(),
                    size,
                });
                Ok(())
            })?;
        }
    }
    Ok(entries)
}

type Visitor<'a> = dyn FnMut(&str, u64, &mut dyn Read) -> Result<()> + 'a;

/// Streams every regular, non-litter entry. Paths are normalized and any
/// path escaping the archive root rejects the whole archive.
fn visit_entries(path: &Path, format: ArchiveFormat, visit: &mut Visitor<'_>) -> Result<()> {
    match format {
        ArchiveFormat::Zip => {
            let mut archive = ZipArchive::new(File::open(path)?)?;
            for i in 0..archive.len() {
                let mut file = archive.by_index(i)?;
                if file.is_dir() {
                    continue;
                }
                let name = safe_entry_path(file.name())?;
                if is_ignored_archive_path(&name) {
                    continue;
                }
                let size = file.size();
                visit(&name, size, &mut file)?;
            }
        }
        ArchiveFormat::TarGz => {
            let decoder = flate2::read::GzDecoder::new(File::open(path)?);
            visit_tar(tar::Archive::new(decoder), visit)?;
        }
        ArchiveFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(File::open(path)?)?;
            visit_tar(tar::Archive::new(decoder), visit)?;
        }
        ArchiveFormat::TarXz => {
            let decoder = xz2::read::XzDecoder::new(File::open(path)?);
            visit_tar(tar::Archive::new(decoder), visit)?;
        }
        ArchiveFormat::TarBz2 => {
            let decoder = bzip2::read::BzDecoder::new(File::open(path)?);
            visit_tar(tar::Archive::new(decoder), visit)?;
        }
        ArchiveFormat::Directory => visit_dir(path, path, visit)?,
        ArchiveFormat::Executable => {
            let size = fs::metadata(path)?.len();
            let name = file_name_of(&path.to_string_lossy()).to_string();
            visit(&name, size, &mut File::open(path)?)?;
        }
    }
    Ok(())
}

fn visit_tar<R: Read>(mut archive: tar::Archive<R>, visit: &mut Visitor<'_>) -> Result<()> {
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw = entry.path()?.to_string_lossy().to_string();
        let name = safe_entry_path(&raw)?;
        if is_ignored_archive_path(&name) {
            continue;
        }
        let size = entry.size();
        visit(&name, size, &mut entry)?;
    }
    Ok(())
}

fn visit_dir(root: &Path, dir: &Path, visit: &mut Visitor<'_>) -> Result<()> {
    let mut children: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .collect();
    children.sort();
    for child in children {
        let file_type = fs::symlink_metadata(&child)?.file_type();
        if file_type.is_dir() {
            visit_dir(root, &child, visit)?;
        } else if file_type.is_file() {
            let relative = child
                .strip_prefix(root)
                .map_err(|_| rejected(format!("{} escapes source", child.display())))?;
            let name = safe_entry_path(&relative.to_string_lossy())?;
            if is_ignored_archive_path(&name) {
                continue;
            }
            let size = fs::metadata(&child)?.len();
            visit(&name, size, &mut File::open(&child)?)?;
        }
    }
    Ok(())
}

/// Maps archive paths to target-relative paths according to the layout.
fn plan_targets(entries: &[RawEntry], layout: Layout) -> HashMap<String, String> {
    let mut plan = HashMap::new();
    match layout {
        Layout::Single(name) => {
            if let Some(entry) = entries.first() {
                plan.insert(entry.path.clone(), name.to_string());
            }
        }
        Layout::Flatten { into, prefer_dir } => {
            let mut winners: HashMap<String, (u8, usize, usize)> = HashMap::new();
            for (index, entry) in entries.iter().enumerate() {
                let parts: Vec<&str> = entry.path.split('/').collect();
                let dirs = &parts[..parts.len() - 1];
                let preferred = prefer_dir
                    .map(|wanted| dirs.iter().any(|dir| dir.eq_ignore_ascii_case(wanted)))
                    .unwrap_or(false);
                let score = (u8::from(!preferred), dirs.len(), index);
                let key = file_name_of(&entry.path).to_ascii_lowercase();
                let replace = winners.get(&key).map_or(true, |best| score < *best);
                if replace {
                    winners.insert(key, score);
                }
            }
            for (_, (_, _, index)) in winners {
                let entry = &entries[index];
                let name = file_name_of(&entry.path);
                let target = match into {
                    Some(dir) => format!("{}/{}", dir, name),
                    None => name.to_string(),
                };
                plan.insert(entry.path.clone(), target);
            }
        }
    }
    plan
}

/// Structurally validates a downloaded asset and stages its installable
/// entries under `staging_dir`. Nothing outside `staging_dir` is written.
pub fn validate(
    spec: &AssetSpec,
    component: &ComponentSpec,
    source: &Path,
    version: Option<String>,
    trust: &TrustStore,
    staging_dir: &Path,
) -> Result<Package> {
    let format = detect_format(source)?;
    match (spec.kind, format) {
        (AssetKind::Executable, ArchiveFormat::Executable) => {}
        (AssetKind::Executable, other) => {
            return Err(rejected(format!(
                "{} should be an executable, found {:?}",
                spec.name, other
            )))
        }
        (AssetKind::Archive, ArchiveFormat::Executable) => {
            return Err(rejected(format!(
                "{} should be an archive, found an executable",
                spec.name
            )))
        }
        (AssetKind::Archive, _) => {}
    }

    let entries = list_entries(source, format, spec)?;
    let total: u64 = if format == ArchiveFormat::Directory {
        entries.iter().map(|entry| entry.size).sum()
    } else {
        fs::metadata(source)?.len()
    };
    if total < spec.min_archive_bytes {
        return Err(rejected(format!(
            "{} is {} bytes, below the {} byte minimum",
            spec.name, total, spec.min_archive_bytes
        )));
    }

    let missing: Vec<&str> = spec
        .required
        .iter()
        .filter(|requirement| !entries.iter().any(|entry| requirement.satisfied_by(&entry.path)))
        .map(|requirement| requirement.describe())
        .collect();
    if !missing.is_empty() {
        return Err(rejected(format!(
            "{} is missing required entries: {}",
            spec.name,
            missing.join(", ")
        )));
    }

    let plan: HashMap<String, String> = plan_targets(&entries, spec.layout)
        .into_iter()
        .filter(|(_, target)| spec.permits(target) && component.permits(target))
        .collect();

    fs::create_dir_all(staging_dir)?;
    let mut staged: HashMap<String, (PathBuf, String, u64)> = HashMap::new();

    let mut stage = |name: &str, size: u64, reader: &mut dyn Read| -> Result<()> {
        let Some(target) = plan.get(name) else {
            return Ok(());
        };
        let staged_path = staging_dir.join(target);
        if let Some(parent) = staged_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut head = Vec::new();
        let mut out = File::create(&staged_path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 65536];
        let mut written = 0u64;
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            if head.len() < 2 {
                head.extend_from_slice(&buffer[..read.min(2)]);
            }
            hasher.update(&buffer[..read]);
            out.write_all(&buffer[..read])?;
            written += read as u64;
        }
        out.sync_all()?;

        if written != size {
            return Err(rejected(format!(
                "{} extracted {} of {} bytes",
                name, written, size
            )));
        }
        if is_executable_name(target) {
            if written < spec.min_executable_bytes {
                return Err(rejected(format!(
                    "{} is {} bytes, looks truncated",
                    target, written
                )));
            }
            if !head.starts_with(b"MZ") {
                return Err(rejected(format!("{} is not a PE image", target)));
            }
        }
        if is_manifest_name(target) {
            parse_manifest(target, &fs::read(&staged_path)?)?;
        }

        let sha256 = hex::encode(hasher.finalize());
        if component.is_protected(target) {
            let entry = trust.verify_replacement(target, &sha256)?;
            tracing::info!("{} matches trusted binary '{}'", target, entry.label);
        }
        staged.insert(name.to_string(), (staged_path, sha256, written));
        Ok(())
    };

    if format == ArchiveFormat::Executable {
        let size = fs::metadata(source)?.len();
        let name = entries
            .first()
            .map(|entry| entry.path.clone())
            .unwrap_or_default();
        stage(&name, size, &mut File::open(source)?)?;
    } else {
        visit_entries(source, format, &mut stage)?;
    }

    let archive_sha256 = if format == ArchiveFormat::Directory {
        let mut digest = Sha256::new();
        let mut names: Vec<&String> = staged.keys().collect();
        names.sort();
        for name in names {
            digest.update(name.as_bytes());
            digest.update(staged[name].1.as_bytes());
        }
        hex::encode(digest.finalize())
    } else {
        sha256_file(source)?
    };

    let package_entries = entries
        .into_iter()
        .map(|entry| {
            let target = plan.get(&entry.path).cloned();
            let staged_entry = staged.get(&entry.path);
            let role = match &target {
                Some(target) if is_manifest_name(target) => EntryRole::ManifestFile,
                Some(_) => EntryRole::PayloadFile,
                None => EntryRole::Ignorable,
            };
            PackageEntry {
                path: entry.path,
                target,
                size: entry.size,
                role,
                sha256: staged_entry.map(|(_, sha, _)| sha.clone()),
                staged: staged_entry.map(|(path, _, _)| path.clone()),
            }
        })
        .collect::<Vec<_>>();

    let installable = package_entries
        .iter()
        .filter(|entry| entry.staged.is_some())
        .count();
    if installable == 0 {
        return Err(rejected(format!("{} contains nothing to install", spec.name)));
    }

    tracing::info!(
        "validated {} ({} entries, {} installable, sha256 {})",
        spec.name,
        package_entries.len(),
        installable,
        archive_sha256
    );

    Ok(Package {
        asset: spec.name.to_string(),
        version,
        archive_sha256,
        entries: package_entries,
    })
}

/// Extra check used by `verify`: confirms the file at `path` still hashes
/// to `expected`.
pub fn verify_file(path: &Path, expected: &str) -> io::Result<bool> {
    Ok(sha256_file(path)?.eq_ignore_ascii_case(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentId, TrustEntry, TrustScope};
    use crate::services::catalog::component;
    use crate::test_support::{
        fake_pe, tar_bz2_bytes, tar_gz_bytes, tar_xz_bytes, temp_dir, zip_bytes,
    };
    use crate::utils::file::sha256_bytes;

    fn asset(id: ComponentId, name: &str) -> (&'static ComponentSpec, &'static AssetSpec) {
        let spec = component(id);
        (spec, spec.asset(name).expect("asset in catalog"))
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).expect("write fixture");
        path
    }

    #[test]
    fn t7_archive_prefers_linux_copies_and_drops_unlisted_files() {
        let dir = temp_dir("validator");
        let archive = write(
            &dir,
            "t7.zip",
            &zip_bytes(&[
                ("linux/t7patch.dll", &fake_pe(1)),
                ("linux/dsound.dll", &fake_pe(2)),
                ("linux/t7patchloader.dll", &fake_pe(3)),
                ("linux/t7patch.conf", b"playername=Unknown Soldier\nisfriendsonly=0\n"),
                ("windows/dsound.dll", &fake_pe(9)),
                ("README.txt", b"read me"),
                ("__MACOSX/linux/._dsound.dll", b"junk"),
            ]),
        );
        let (spec, asset) = asset(ComponentId::T7Patch, "t7patch-archive");

        let package = validate(asset, spec, &archive, None, &TrustStore::builtin(), &dir.join("stage"))
            .expect("valid t7 archive");

        let dsound = package
            .entries
            .iter()
            .find(|entry| entry.target.as_deref() == Some("dsound.dll"))
            .expect("dsound planned");
        assert_eq!(dsound.path, "linux/dsound.dll");
        assert_eq!(dsound.sha256.as_deref(), Some(sha256_bytes(&fake_pe(2)).as_str()));
        let conf = package
            .entries
            .iter()
            .find(|entry| entry.path == "linux/t7patch.conf")
            .expect("conf listed");
        assert_eq!(conf.role, EntryRole::ManifestFile);
        let readme = package
            .entries
            .iter()
            .find(|entry| entry.path == "README.txt")
            .expect("readme listed");
        assert_eq!(readme.role, EntryRole::Ignorable);
        assert!(readme.staged.is_none());
        assert!(!package.entries.iter().any(|entry| entry.path.contains("__MACOSX")));
        assert_eq!(package.installable().count(), 4);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_required_entry_rejects_package() {
        let dir = temp_dir("validator");
        let archive = write(
            &dir,
            "dxvk.zip",
            &zip_bytes(&[("dxvk/x64/dxgi.dll", &fake_pe(1)), ("dxvk/README", &[0u8; 2048])]),
        );
        let (spec, asset) = asset(ComponentId::DxvkGplasync, "dxvk-archive");
        let err = validate(asset, spec, &archive, None, &TrustStore::builtin(), &dir.join("stage"))
            .expect_err("d3d11.dll is required");
        assert!(err.to_string().contains("d3d11.dll"), "{}", err);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn truncated_executable_is_rejected() {
        let dir = temp_dir("validator");
        let archive = write(
            &dir,
            "dxvk.zip",
            &zip_bytes(&[
                ("x64/dxgi.dll", &fake_pe(1)),
                ("x64/d3d11.dll", b"MZ-short"),
                ("padding.bin", &[0u8; 4096]),
            ]),
        );
        let (spec, asset) = asset(ComponentId::DxvkGplasync, "dxvk-archive");
        let err = validate(asset, spec, &archive, None, &TrustStore::builtin(), &dir.join("stage"))
            .expect_err("truncated dll");
        assert!(matches!(err, PatchOpsError::ContentRejected(_)));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unparsable_manifest_is_rejected() {
        let dir = temp_dir("validator");
        let archive = write(
            &dir,
            "t7.zip",
            &zip_bytes(&[
                ("linux/t7patch.dll", &fake_pe(1)),
                ("linux/dsound.dll", &fake_pe(2)),
                ("linux/t7patchloader.dll", &fake_pe(3)),
                ("linux/t7patch.conf", b"playername=x\nthis line is garbage\n"),
            ]),
        );
        let (spec, asset) = asset(ComponentId::T7Patch, "t7patch-archive");
        let err = validate(asset, spec, &archive, None, &TrustStore::builtin(), &dir.join("stage"))
            .expect_err("broken conf");
        assert!(err.to_string().contains("t7patch.conf"), "{}", err);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn dxvk_tarball_takes_x64_binaries() {
        let dir = temp_dir("validator");
        let archive = write(
            &dir,
            "dxvk.tar.gz",
            &tar_gz_bytes(&[
                ("dxvk-gplasync-v2.6/x32/dxgi.dll", &fake_pe(32)),
                ("dxvk-gplasync-v2.6/x32/d3d11.dll", &fake_pe(32)),
                ("dxvk-gplasync-v2.6/x64/dxgi.dll", &fake_pe(64)),
                ("dxvk-gplasync-v2.6/x64/d3d11.dll", &fake_pe(64)),
            ]),
        );
        let (spec, asset) = asset(ComponentId::DxvkGplasync, "dxvk-archive");
        let package = validate(asset, spec, &archive, Some("v2.6".into()), &TrustStore::builtin(), &dir.join("stage"))
            .expect("valid tarball");
        let staged: Vec<&PackageEntry> = package.installable().collect();
        assert_eq!(staged.len(), 2);
        for entry in staged {
            assert!(entry.path.contains("/x64/"), "{}", entry.path);
            let bytes = fs::read(entry.staged.as_ref().expect("staged")).expect("read staged");
            assert_eq!(bytes, fake_pe(64));
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn xz_and_bzip2_tarballs_are_detected_and_read() {
        let dir = temp_dir("validator");
        let files: [(&str, &[u8]); 2] = [
            ("dxvk-gplasync-v2.5/x64/dxgi.dll", &fake_pe(64)),
            ("dxvk-gplasync-v2.5/x64/d3d11.dll", &fake_pe(65)),
        ];
        let (spec, asset) = asset(ComponentId::DxvkGplasync, "dxvk-archive");
        for (name, bytes, format) in [
            ("dxvk.tar.xz", tar_xz_bytes(&files), ArchiveFormat::TarXz),
            ("dxvk.tar.bz2", tar_bz2_bytes(&files), ArchiveFormat::TarBz2),
        ] {
            let archive = write(&dir, name, &bytes);
            assert_eq!(detect_format(&archive).expect("format"), format);
            let package = validate(
                asset,
                spec,
                &archive,
                Some("v2.5".into()),
                &TrustStore::builtin(),
                &dir.join(format!("stage-{}", name)),
            )
            .expect("valid tarball");
            let mut targets: Vec<&str> = package
                .installable()
                .filter_map(|entry| entry.target.as_deref())
                .collect();
            targets.sort();
            assert_eq!(targets, vec!["d3d11.dll", "dxgi.dll"]);
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn protected_executable_requires_trusted_hash() {
        let dir = temp_dir("validator");
        let exe = write(&dir, "BlackOps3-reforged.exe", &fake_pe(7));
        let (spec, asset) = asset(ComponentId::Reforged, "reforged-exe");

        let err = validate(asset, spec, &exe, None, &TrustStore::builtin(), &dir.join("stage"))
            .expect_err("untrusted replacement");
        assert!(matches!(err, PatchOpsError::ChecksumMismatch { .. }));

        let trust = TrustStore::with_entries([TrustEntry {
            sha256: sha256_bytes(&fake_pe(7)),
            label: "reforged".to_string(),
            scope: TrustScope::BinaryReplacement,
            component: Some(ComponentId::Reforged),
        }]);
        let package = validate(asset, spec, &exe, None, &trust, &dir.join("stage"))
            .expect("trusted replacement");
        let entry = package.installable().next().expect("exe staged");
        assert_eq!(entry.target.as_deref(), Some("BlackOps3.exe"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn html_saved_as_archive_is_rejected() {
        let dir = temp_dir("validator");
        let bogus = write(&dir, "LPC.zip", b"<html><body>gone</body></html>");
        let (spec, asset) = asset(ComponentId::T7Patch, "lpc-archive");
        assert!(matches!(
            validate(asset, spec, &bogus, None, &TrustStore::builtin(), &dir.join("stage")),
            Err(PatchOpsError::ContentRejected(_))
        ));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn directory_dump_is_accepted() {
        let dir = temp_dir("validator");
        let dump = dir.join("dump");
        fs::create_dir_all(dump.join("DUMP")).expect("dump dir");
        fs::write(dump.join("DUMP").join("BlackOps3.exe"), fake_pe(5)).expect("exe");
        fs::write(dump.join("DUMP").join("MicrosoftGame.config"), b"<Game/>").expect("config");
        fs::write(dump.join("DUMP").join("XCurl.dll"), fake_pe(6)).expect("xcurl");
        let trust = TrustStore::with_entries([TrustEntry {
            sha256: sha256_bytes(&fake_pe(5)),
            label: "uwp-dump".to_string(),
            scope: TrustScope::BinaryReplacement,
            component: Some(ComponentId::Bo3Enhanced),
        }]);
        let (spec, asset) = asset(ComponentId::Bo3Enhanced, "enhanced-dump");
        let package = validate(asset, spec, &dump, None, &trust, &dir.join("stage"))
            .expect("valid dump directory");
        let mut targets: Vec<String> = package
            .installable()
            .filter_map(|entry| entry.target.clone())
            .collect();
        targets.sort();
        assert_eq!(targets, vec!["BlackOps3.exe", "MicrosoftGame.config", "XCurl.dll"]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn manifest_parsers_cover_json_and_vdf() {
        assert!(parse_manifest("players/T7.json", br#"{"network_pass":"x"}"#).is_ok());
        assert!(parse_manifest("players/T7.json", b"{broken").is_err());
        assert!(parse_manifest("app.vdf", b"\"a\" { \"b\" \"c\" }").is_ok());
        assert!(parse_manifest("app.vdf", b"\"a\" {").is_err());
        assert!(parse_manifest("dxvk.conf", b"# comment\n[section]\ndxvk.hud=fps\n").is_ok());
    }
}
