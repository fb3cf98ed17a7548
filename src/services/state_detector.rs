use std::path::Path;

use crate::models::{ComponentId, ComponentState, ExecutableVariant, Platform};
use crate::services::catalog::{Activation, ComponentSpec, Marker};
use crate::services::steam_config::SteamConfigMutator;
use crate::services::trust_store::{TrustStore, STOCK_EXECUTABLE_SHA256};
use crate::utils::file::sha256_file;

const GAME_EXECUTABLE: &str = "BlackOps3.exe";

/// Classifies components from what is on disk right now. Nothing is cached
/// and nothing is written.
pub struct StateDetector<'a> {
    target_dir: &'a Path,
    trust: &'a TrustStore,
    platform: Platform,
    steam: Option<&'a SteamConfigMutator>,
    app_id: &'a str,
}

impl<'a> StateDetector<'a> {
    pub fn new(
        target_dir: &'a Path,
        trust: &'a TrustStore,
        platform: Platform,
        steam: Option<&'a SteamConfigMutator>,
        app_id: &'a str,
    ) -> Self {
        Self {
            target_dir,
            trust,
            platform,
            steam,
            app_id,
        }
    }

    fn marker_present(&self, spec: &ComponentSpec, marker: &Marker) -> bool {
        match marker {
            Marker::File(name) => self.target_dir.join(name).is_file(),
            Marker::TrustedExecutable(name) => {
                let path = self.target_dir.join(name);
                if !path.is_file() {
                    return false;
                }
                match sha256_file(&path) {
                    Ok(sha256) => self.trust.component_for(&sha256) == Some(spec.id),
                    Err(err) => {
                        tracing::debug!("cannot hash {}: {}", path.display(), err);
                        false
                    }
                }
            }
        }
    }

    pub fn files_present(&self, spec: &ComponentSpec) -> bool {
        !spec.markers.is_empty()
            && spec
                .markers
                .iter()
                .all(|marker| self.marker_present(spec, marker))
    }

    fn is_wired(&self, spec: &ComponentSpec) -> bool {
        if self.platform == Platform::Windows {
            return true;
        }
        let Some(steam) = self.steam else {
            return matches!(spec.linux_activation, Activation::Always);
        };
        let wired = match spec.linux_activation {
            Activation::Always => return true,
            Activation::LaunchToken(token) => steam
                .launch_options(self.app_id)
                .map(|options| options.map_or(false, |options| options.contains(token))),
            Activation::CompatTool => steam
                .compat_mapping(self.app_id)
                .map(|tool| tool.is_some()),
        };
        wired.unwrap_or_else(|err| {
            tracing::debug!("{} activation unknown: {}", spec.id, err);
            false
        })
    }

    pub fn detect(&self, spec: &ComponentSpec) -> ComponentState {
        if !self.files_present(spec) {
            ComponentState::NotInstalled
        } else if self.is_wired(spec) {
            ComponentState::InstalledActive
        } else {
            ComponentState::InstalledInactive
        }
    }

    pub fn executable_variant(&self) -> ExecutableVariant {
        detect_executable_variant(self.target_dir, self.trust)
    }
}

pub fn detect_executable_variant(target_dir: &Path, trust: &TrustStore) -> ExecutableVariant {
    let path = target_dir.join(GAME_EXECUTABLE);
    if !path.is_file() {
        return ExecutableVariant::Missing;
    }
    let Ok(sha256) = sha256_file(&path) else {
        return ExecutableVariant::Custom;
    };
    if sha256 == STOCK_EXECUTABLE_SHA256 {
        return ExecutableVariant::Stock;
    }
    match trust.component_for(&sha256) {
        Some(ComponentId::Reforged) => ExecutableVariant::Reforged,
        Some(ComponentId::Bo3Enhanced) => ExecutableVariant::Enhanced,
        _ => ExecutableVariant::Custom,
    }
}
