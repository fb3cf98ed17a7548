use std::path::{Path, PathBuf};

use crate::utils::vdf;

pub const GAME_EXECUTABLES: [&str; 2] = ["BlackOps3.exe", "BlackOpsIII.exe"];

fn ensure_dir(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if std::fs::create_dir_all(path).is_ok() {
        return Some(path.to_path_buf());
    }
    None
}

fn env_path(name: &str) -> Option<PathBuf> {
    let value = std::env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn is_portable_root(path: &Path) -> bool {
    path.join("portable.config.json").exists()
}

pub fn resolve_root_dir() -> PathBuf {
    if let Some(path) = env_path("PATCHOPS_ROOT_DIR") {
        if let Some(dir) = ensure_dir(&path) {
            return dir;
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if is_portable_root(dir) {
                return dir.to_path_buf();
            }
        }
    }

    if let Some(data) = dirs::data_dir() {
        if let Some(found) = ensure_dir(&data.join("PatchOpsIII")) {
            return found;
        }
    }

    PathBuf::from(".")
}

pub fn resolve_data_dir(root: &Path) -> PathBuf {
    let config = root.join("config");
    ensure_dir(&config).unwrap_or_else(|| root.to_path_buf())
}

/// Downloaded archives live here and double as the cached-local mirror.
pub fn resolve_cache_dir(root: &Path) -> PathBuf {
    let cache = root.join("mod_files");
    ensure_dir(&cache).unwrap_or(cache)
}

pub fn resolve_log_dir(root: &Path) -> PathBuf {
    if let Some(path) = env_path("PATCHOPS_LOG_DIR") {
        if let Some(dir) = ensure_dir(&path) {
            return dir;
        }
    }

    let root_logs = root.join("logs");
    if let Some(found) = ensure_dir(&root_logs) {
        return found;
    }

    PathBuf::from("logs")
}

pub fn has_game_executable(game_dir: &Path) -> bool {
    GAME_EXECUTABLES
        .iter()
        .any(|name| game_dir.join(name).is_file())
}

fn steam_root_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if cfg!(windows) {
        if let Some(program_files) = env_path("ProgramFiles(x86)") {
            candidates.push(program_files.join("Steam"));
        }
        candidates.push(PathBuf::from("C:\\Program Files (x86)\\Steam"));
        candidates.push(PathBuf::from("C:\\Program Files\\Steam"));
    } else if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".steam").join("steam"));
        candidates.push(home.join(".local").join("share").join("Steam"));
        candidates.push(
            home.join(".var")
                .join("app")
                .join("com.valvesoftware.Steam")
                .join(".local")
                .join("share")
                .join("Steam"),
        );
    }
    candidates
}

pub fn detect_steam_root() -> Option<PathBuf> {
    if let Some(path) = env_path("PATCHOPS_STEAM_ROOT") {
        return Some(path);
    }
    steam_root_candidates()
        .into_iter()
        .find(|candidate| candidate.join("userdata").is_dir() || candidate.join("config").is_dir())
}

/// First all-digit directory under `userdata`, in sorted order.
pub fn find_steam_user_id(steam_root: &Path) -> Option<String> {
    let mut ids: Vec<String> = std::fs::read_dir(steam_root.join("userdata"))
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) && name != "0")
        .collect();
    ids.sort();
    ids.into_iter().next()
}

pub fn localconfig_path(steam_root: &Path, user_id: &str) -> PathBuf {
    steam_root
        .join("userdata")
        .join(user_id)
        .join("config")
        .join("localconfig.vdf")
}

pub fn config_vdf_path(steam_root: &Path) -> PathBuf {
    steam_root.join("config").join("config.vdf")
}

/// Finds the game's install directory through Steam's library folders.
pub fn find_game_dir(steam_root: &Path, app_id: &str) -> Option<PathBuf> {
    let mut libraries = vec![steam_root.to_path_buf()];
    let folders = steam_root.join("steamapps").join("libraryfolders.vdf");
    if let Ok(content) = std::fs::read_to_string(&folders) {
        if let Ok(doc) = vdf::parse(&content) {
            if let Some(root) = doc.node("libraryfolders") {
                for key in root.keys() {
                    if let Some(path) = root.node(key).and_then(|lib| lib.text("path")) {
                        libraries.push(PathBuf::from(path));
                    }
                }
            }
        }
    }

    for library in libraries {
        let manifest = library
            .join("steamapps")
            .join(format!("appmanifest_{}.acf", app_id));
        let Ok(content) = std::fs::read_to_string(&manifest) else {
            continue;
        };
        let Ok(doc) = vdf::parse(&content) else {
            continue;
        };
        if let Some(install_dir) = doc.node("AppState").and_then(|state| state.text("installdir")) {
            let game_dir = library.join("steamapps").join("common").join(install_dir);
            if game_dir.is_dir() {
                return Some(game_dir);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("patchops-{}-{}", tag, Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn picks_first_numeric_user_directory() {
        let root = temp_dir("steam-users");
        for name in ["anonymous", "90210", "12345", "0"] {
            std::fs::create_dir_all(root.join("userdata").join(name)).expect("create user dir");
        }
        assert_eq!(find_steam_user_id(&root).as_deref(), Some("12345"));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn locates_game_through_library_folders() {
        let steam = temp_dir("steam-root");
        let library = temp_dir("steam-library");
        std::fs::create_dir_all(steam.join("steamapps")).expect("steamapps");
        std::fs::write(
            steam.join("steamapps").join("libraryfolders.vdf"),
            format!(
                "\"libraryfolders\"\n{{\n\t\"1\"\n\t{{\n\t\t\"path\"\t\t\"{}\"\n\t}}\n}}\n",
                library.display().to_string().replace('\\', "\\\\")
            ),
        )
        .expect("write libraryfolders");
        let apps = library.join("steamapps");
        std::fs::create_dir_all(apps.join("common").join("Call of Duty Black Ops III"))
            .expect("game dir");
        std::fs::write(
            apps.join("appmanifest_311210.acf"),
            "\"AppState\"\n{\n\t\"installdir\"\t\t\"Call of Duty Black Ops III\"\n}\n",
        )
        .expect("write appmanifest");

        let found = find_game_dir(&steam, "311210").expect("game dir found");
        assert!(found.ends_with("Call of Duty Black Ops III"));
        let _ = std::fs::remove_dir_all(steam);
        let _ = std::fs::remove_dir_all(library);
    }
}
