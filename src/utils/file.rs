use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

const TEMP_SUFFIX: &str = ".patchops.tmp";

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("file"));
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Writes `contents` next to `path`, fsyncs, then renames over it.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = temp_sibling(path);
    if let Some(parent) = temp_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

/// Same as [`write_atomic`] but streams from an existing file.
pub fn replace_atomic(source: &Path, dest: &Path) -> io::Result<()> {
    let temp_path = temp_sibling(dest);
    if let Some(parent) = temp_path.parent() {
        fs::create_dir_all(parent)?;
    }
    copy_durable(source, &temp_path)?;
    if let Err(err) = fs::rename(&temp_path, dest) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

/// Copies and fsyncs the destination so a backup survives a crash.
pub fn copy_durable(source: &Path, dest: &Path) -> io::Result<u64> {
    let mut input = File::open(source)?;
    let mut output = File::create(dest)?;
    let copied = io::copy(&mut input, &mut output)?;
    output.sync_all()?;
    Ok(copied)
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn is_safe_relative_path(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => return false,
            _ => {}
        }
    }
    true
}

/// Normalizes an archive or manifest path to `/`-separated form, rejecting
/// anything that could escape the destination root.
pub fn normalize_relative(raw: &str) -> Option<String> {
    let unified = raw.replace('\\', "/");
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            other => parts.push(other),
        }
    }
    if parts.is_empty() || unified.starts_with('/') || parts[0].contains(':') {
        return None;
    }
    Some(parts.join("/"))
}

pub fn is_ignored_archive_path(path: &str) -> bool {
    path.split('/').any(|part| {
        let lower = part.to_ascii_lowercase();
        lower == "__macosx" || lower == ".ds_store" || lower == "thumbs.db"
    })
}

pub fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn normalize_rejects_escaping_paths() {
        assert_eq!(normalize_relative("linux\\t7patch.dll").as_deref(), Some("linux/t7patch.dll"));
        assert_eq!(normalize_relative("./LPC/core.ff").as_deref(), Some("LPC/core.ff"));
        assert!(normalize_relative("../evil.dll").is_none());
        assert!(normalize_relative("/etc/passwd").is_none());
        assert!(normalize_relative("C:/Windows/evil.dll").is_none());
        assert!(normalize_relative("").is_none());
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = std::env::temp_dir().join(format!("patchops-file-test-{}", Uuid::new_v4()));
        let path = dir.join("state.json");
        write_atomic(&path, b"first").expect("first write");
        write_atomic(&path, b"second").expect("second write");
        assert_eq!(fs::read(&path).expect("read back"), b"second");
        assert!(!temp_sibling(&path).exists(), "temp file should be renamed away");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn ignores_finder_and_explorer_litter() {
        assert!(is_ignored_archive_path("__MACOSX/dxgi.dll"));
        assert!(is_ignored_archive_path("x64/Thumbs.db"));
        assert!(!is_ignored_archive_path("x64/dxgi.dll"));
    }
}
