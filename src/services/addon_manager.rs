use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{PatchOpsError, Result};
use crate::models::{
    Asset, CancelToken, ComponentId, ComponentState, DownloadStatus, EntryStatus, ExecutableVariant,
    InstallReport, MirrorId, OperationControl, OperationProgress, OperationStatus, Package, Platform,
    SizeRange, TrustEntry, TrustScope, UninstallReport,
};
use crate::services::archive_validator::{self, ArchiveFormat};
use crate::services::backups::{self, BackupConversion};
use crate::services::catalog::{component, Activation, AssetSpec, ComponentSpec, DXVK_CONF};
use crate::services::component_lock::ComponentLocks;
use crate::services::dxvk_conf;
use crate::services::fetcher::{FetchProgress, Fetcher};
use crate::services::install_engine::{GeneratedFile, InstallEngine};
use crate::services::manifest_store::{ChecksumRecord, ManifestStore};
use crate::services::mirror_resolver::MirrorResolver;
use crate::services::state_detector::{detect_executable_variant, StateDetector};
use crate::services::steam_config::SteamConfigMutator;
use crate::services::trust_store::TrustStore;
use crate::utils::file::sha256_file;

#[derive(Clone, Debug, Default)]
pub struct InstallOptions {
    /// User-supplied dump (zip or directory) for components that need one.
    pub dump: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub id: ComponentId,
    pub display_name: String,
    pub state: ComponentState,
    pub version: Option<String>,
    pub busy: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCheck {
    Intact,
    Modified,
    Missing,
    Pending,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyEntry {
    pub component: ComponentId,
    pub path: String,
    pub check: FileCheck,
}

/// Runs install and uninstall pipelines for the add-ons of one game
/// directory and keeps their progress and cancel handles.
#[derive(Clone)]
pub struct AddonManager {
    config: Arc<AppConfig>,
    game_dir: PathBuf,
    platform: Platform,
    fetcher: Fetcher,
    resolver: MirrorResolver,
    store: ManifestStore,
    trust: Arc<Mutex<TrustStore>>,
    locks: ComponentLocks,
    registry: Arc<Mutex<HashMap<ComponentId, watch::Sender<OperationControl>>>>,
    progress_cache: Arc<Mutex<HashMap<ComponentId, OperationProgress>>>,
}

impl AddonManager {
    pub fn new(config: AppConfig, game_dir: PathBuf) -> Result<Self> {
        let fetcher = Fetcher::new(&config.fetch, config.offline)?;
        let resolver = MirrorResolver::new(config.cache_dir.clone(), config.asset_overrides.clone());
        let store = ManifestStore::for_game_dir(&game_dir);

        let mut trust = TrustStore::load(&config.trust_store_path(), &config.trusted_hashes)?;
        match store.load() {
            Ok(state) => {
                for (asset, record) in state.checksums {
                    trust.add(TrustEntry {
                        sha256: record.sha256,
                        label: asset,
                        scope: TrustScope::Advisory,
                        component: None,
                    });
                }
            }
            Err(err) => tracing::warn!("checksum cache unavailable: {}", err),
        }

        Ok(Self {
            config: Arc::new(config),
            game_dir,
            platform: Platform::current(),
            fetcher,
            resolver,
            store,
            trust: Arc::new(Mutex::new(trust)),
            locks: ComponentLocks::new(),
            registry: Arc::new(Mutex::new(HashMap::new())),
            progress_cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn game_dir(&self) -> &Path {
        &self.game_dir
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    fn trust_snapshot(&self) -> TrustStore {
        self.trust
            .lock()
            .map(|trust| trust.clone())
            .unwrap_or_else(|_| TrustStore::builtin())
    }

    pub fn steam(&self) -> Result<SteamConfigMutator> {
        SteamConfigMutator::from_config(&self.config, self.store.clone())
    }

    pub fn refresh_state(&self, id: ComponentId) -> ComponentState {
        let trust = self.trust_snapshot();
        let steam = self.steam().ok();
        StateDetector::new(
            &self.game_dir,
            &trust,
            self.platform,
            steam.as_ref(),
            &self.config.app_id,
        )
        .detect(component(id))
    }

    pub fn status(&self) -> Vec<ComponentStatus> {
        let versions = self.store.load().map(|state| state.components).unwrap_or_default();
        ComponentId::ALL
            .into_iter()
            .map(|id| ComponentStatus {
                id,
                display_name: component(id).display_name.to_string(),
                state: self.refresh_state(id),
                version: versions.get(&id).and_then(|manifest| manifest.version.clone()),
                busy: self.locks.is_locked(id),
            })
            .collect()
    }

    pub fn executable_variant(&self) -> ExecutableVariant {
        detect_executable_variant(&self.game_dir, &self.trust_snapshot())
    }

    pub fn get_progress(&self, id: ComponentId) -> Option<OperationProgress> {
        self.progress_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&id).cloned())
    }

    /// Asks a running operation to stop at its next checkpoint.
    pub fn cancel(&self, id: ComponentId) -> bool {
        let registry = match self.registry.lock() {
            Ok(registry) => registry,
            Err(_) => return false,
        };
        match registry.get(&id) {
            Some(sender) => sender.send(OperationControl::Cancelled).is_ok(),
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        if let Ok(registry) = self.registry.lock() {
            for sender in registry.values() {
                let _ = sender.send(OperationControl::Cancelled);
            }
        }
    }

    fn update_progress(&self, progress: OperationProgress) {
        if let Ok(mut cache) = self.progress_cache.lock() {
            cache.insert(progress.component, progress);
        }
    }

    fn set_status(&self, id: ComponentId, status: OperationStatus) {
        if let Ok(mut cache) = self.progress_cache.lock() {
            cache
                .entry(id)
                .or_insert_with(|| OperationProgress::pending(id))
                .status = status;
        }
    }

    fn register(&self, id: ComponentId) -> Result<CancelToken> {
        let (tx, rx) = watch::channel(OperationControl::Running);
        self.registry
            .lock()
            .map_err(|_| PatchOpsError::Config("registry locked".to_string()))?
            .insert(id, tx);
        self.update_progress(OperationProgress::pending(id));
        Ok(CancelToken::new(rx))
    }

    fn finish(&self, id: ComponentId, failed: Option<&PatchOpsError>) {
        self.registry.lock().ok().and_then(|mut map| map.remove(&id));
        let status = match failed {
            None => OperationStatus::Completed,
            Some(PatchOpsError::Cancelled) => OperationStatus::Cancelled,
            Some(_) => OperationStatus::Failed,
        };
        self.set_status(id, status);
    }

    pub async fn install(&self, id: ComponentId, options: InstallOptions) -> Result<InstallReport> {
        let _guard = self.locks.try_acquire(id)?;
        let cancel = self.register(id)?;
        tracing::info!("installing {}", id);

        let staging = self
            .config
            .cache_dir
            .join(format!("staging-{}-{}", id, Uuid::new_v4()));
        let result = self.run_install(component(id), &options, &staging, cancel).await;
        let _ = tokio::fs::remove_dir_all(&staging).await;

        match &result {
            Ok(report) => tracing::info!("{}: {}", id, report.message),
            Err(err) => tracing::error!("install of {} failed: {}", id, err),
        }
        self.finish(id, result.as_ref().err());
        result
    }

    async fn run_install(
        &self,
        spec: &'static ComponentSpec,
        options: &InstallOptions,
        staging: &Path,
        cancel: CancelToken,
    ) -> Result<InstallReport> {
        let mut packages = Vec::with_capacity(spec.assets.len());
        let mut version = None;
        for asset in spec.assets {
            let (path, asset_version) = self.acquire(spec, asset, options, &cancel).await?;
            if version.is_none() {
                version = asset_version.clone();
            }

            self.set_status(spec.id, OperationStatus::Validating);
            let trust = self.trust_snapshot();
            let asset_staging = staging.join(asset.name);
            let cached = self.resolver.cached_path(asset);
            let source = path.clone();
            let validated = tokio::task::spawn_blocking(move || {
                archive_validator::validate(asset, spec, &source, asset_version, &trust, &asset_staging)
            })
            .await
            .map_err(|e| PatchOpsError::Config(format!("validation worker failed: {}", e)))?;
            match validated {
                Ok(package) => packages.push(package),
                Err(err) => {
                    // Rejected cache copies must not satisfy the next attempt.
                    if err.is_terminal() && path == cached {
                        tracing::warn!("discarding rejected cache copy {}", cached.display());
                        let _ = tokio::fs::remove_file(&cached).await;
                    }
                    return Err(err);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(PatchOpsError::Cancelled);
        }

        let generated = self.generated_files(spec, &packages, version.as_deref());

        self.set_status(spec.id, OperationStatus::Installing);
        let store = self.store.clone();
        let game_dir = self.game_dir.clone();
        let manager = self.clone();
        let worker_cancel = cancel.clone();
        let mut report = tokio::task::spawn_blocking(move || {
            let progress = |file: &str, done: usize, total: usize| {
                let mut current = manager
                    .get_progress(spec.id)
                    .unwrap_or_else(|| OperationProgress::pending(spec.id));
                current.status = OperationStatus::Installing;
                current.current_file = Some(file.to_string());
                current.progress_percent = done as f64 / total.max(1) as f64 * 100.0;
                manager.update_progress(current);
            };
            InstallEngine::new(&store, &game_dir).install(
                spec,
                &packages,
                &generated,
                version,
                &worker_cancel,
                &progress,
            )
        })
        .await
        .map_err(|e| PatchOpsError::Config(format!("install worker failed: {}", e)))??;

        self.set_status(spec.id, OperationStatus::Activating);
        report.activated = self.activate(spec);
        Ok(report)
    }

    fn generated_files(
        &self,
        spec: &ComponentSpec,
        packages: &[Package],
        version: Option<&str>,
    ) -> Vec<GeneratedFile> {
        let version = version.or_else(|| packages.iter().find_map(|p| p.version.as_deref()));
        spec.generated
            .iter()
            .filter_map(|name| match *name {
                DXVK_CONF => Some(GeneratedFile {
                    target: DXVK_CONF.to_string(),
                    contents: dxvk_conf::render(&self.config.dxvk, version).into_bytes(),
                }),
                other => {
                    tracing::warn!("no generator for {}", other);
                    None
                }
            })
            .collect()
    }

    /// Produces a local path holding the asset's verified bytes.
    async fn acquire(
        &self,
        spec: &ComponentSpec,
        asset: &'static AssetSpec,
        options: &InstallOptions,
        cancel: &CancelToken,
    ) -> Result<(PathBuf, Option<String>)> {
        self.set_status(spec.id, OperationStatus::Resolving);
        let user_source = if asset.local_only {
            options.dump.as_deref()
        } else {
            None
        };
        if let Some(dir) = user_source.filter(|path| path.is_dir()) {
            return Ok((dir.to_path_buf(), None));
        }

        let release_index = match self.resolver.release_index_url(asset) {
            Some(url) if !self.config.offline => match self.fetcher.fetch_json(&url, cancel).await {
                Ok(index) => Some(index),
                Err(PatchOpsError::Cancelled) => return Err(PatchOpsError::Cancelled),
                Err(err) => {
                    tracing::warn!("release index for {} unavailable: {}", asset.name, err);
                    None
                }
            },
            _ => None,
        };
        let resolved = self
            .resolver
            .resolve(asset, self.platform, release_index.as_ref(), user_source);

        if resolved.sources.is_empty() {
            return Err(PatchOpsError::NotFound(if asset.local_only {
                format!("{} needs a local file; pass --dump", asset.name)
            } else {
                format!("no sources for {}", asset.name)
            }));
        }
        if asset.require_digest && resolved.sha256.is_none() {
            return Err(PatchOpsError::ContentRejected(format!(
                "{} has no published SHA-256 digest",
                asset.name
            )));
        }

        let destination = self.resolver.cached_path(asset);
        if user_source.is_none() {
            if let Some(version) = self.reusable_cache(asset, &resolved, &destination) {
                tracing::info!("using cached {} ({})", asset.name, destination.display());
                return Ok((destination, version));
            }
        }

        self.set_status(spec.id, OperationStatus::Downloading);
        let manager = self.clone();
        let id = spec.id;
        let on_progress = move |update: FetchProgress| {
            let total = update.total.unwrap_or(0);
            let speed = update.speed_bps();
            let remaining = total.saturating_sub(update.downloaded);
            manager.update_progress(OperationProgress {
                component: id,
                status: OperationStatus::Downloading,
                progress_percent: if total > 0 {
                    update.downloaded as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
                downloaded_bytes: update.downloaded,
                total_bytes: total,
                speed_bps: speed,
                eta_seconds: if speed > 0 { remaining / speed } else { 0 },
                current_file: Some(update.asset),
            });
        };
        let record = self
            .fetcher
            .fetch(
                &resolved,
                &destination,
                Some(SizeRange::at_least(asset.min_archive_bytes)),
                &on_progress,
                cancel,
            )
            .await;

        let detail = record.detail.clone().unwrap_or_default();
        match record.status {
            DownloadStatus::Ok => {}
            DownloadStatus::Cancelled => return Err(PatchOpsError::Cancelled),
            DownloadStatus::ChecksumMismatch => {
                return Err(PatchOpsError::ChecksumMismatch {
                    label: asset.name.to_string(),
                    expected: record.expected_sha256.unwrap_or_default(),
                    actual: record.computed_sha256.unwrap_or_default(),
                })
            }
            DownloadStatus::ContentTypeRejected => {
                return Err(PatchOpsError::ContentRejected(detail))
            }
            DownloadStatus::Exhausted => return Err(PatchOpsError::SourceUnavailable(detail)),
        }

        let from_cache = record
            .source
            .as_ref()
            .map_or(false, |source| source.mirror == MirrorId::CachedLocal);
        if from_cache {
            // Every remote failed; the cached bytes keep the version they were fetched as.
            let version = self.recorded_checksum(asset).and_then(|record| record.version);
            tracing::warn!(
                "{} served from cache as {}",
                asset.name,
                version.as_deref().unwrap_or("unknown version")
            );
            return Ok((destination, version));
        }
        if let Some(sha256) = &record.computed_sha256 {
            self.remember_checksum(asset, resolved.version.clone(), sha256, record.bytes_transferred);
        }
        Ok((destination, resolved.version))
    }

    fn recorded_checksum(&self, asset: &AssetSpec) -> Option<ChecksumRecord> {
        self.store
            .load()
            .ok()
            .and_then(|state| state.checksums.get(asset.name).cloned())
    }

    /// Version of the cached copy when it can stand in for `resolved`.
    /// A declared digest must match; otherwise the recorded checksum must
    /// match and be for the same release.
    fn reusable_cache(&self, asset: &AssetSpec, resolved: &Asset, cached: &Path) -> Option<Option<String>> {
        if !cached.is_file() {
            return None;
        }
        let actual = sha256_file(cached).ok()?;
        if let Some(declared) = &resolved.sha256 {
            return actual
                .eq_ignore_ascii_case(declared)
                .then(|| resolved.version.clone());
        }

        let recorded = self.recorded_checksum(asset);
        let recorded_version = recorded.as_ref().and_then(|record| record.version.clone());
        if let Some(wanted) = &resolved.version {
            if recorded_version.as_deref() != Some(wanted.as_str()) {
                tracing::info!(
                    "cached {} is {}, release is {}",
                    asset.name,
                    recorded_version.as_deref().unwrap_or("unknown"),
                    wanted
                );
                return None;
            }
        }
        let expected = recorded.map(|record| record.sha256).or_else(|| {
            self.trust_snapshot()
                .advisory_for(asset.name)
                .map(|entry| entry.sha256.clone())
        })?;
        actual
            .eq_ignore_ascii_case(&expected)
            .then(|| recorded_version.or_else(|| resolved.version.clone()))
    }

    fn remember_checksum(&self, asset: &AssetSpec, version: Option<String>, sha256: &str, size: u64) {
        if let Err(err) = self.store.record_checksum(asset.name, version, sha256, size) {
            tracing::warn!("could not record checksum for {}: {}", asset.name, err);
        }
        if let Ok(mut trust) = self.trust.lock() {
            trust.add(TrustEntry {
                sha256: sha256.to_string(),
                label: asset.name.to_string(),
                scope: TrustScope::Advisory,
                component: None,
            });
        }
    }

    /// Wires the component into the Linux launch path. Failures leave the
    /// files installed and report the component inactive.
    fn activate(&self, spec: &ComponentSpec) -> bool {
        if self.platform == Platform::Windows {
            return true;
        }
        let outcome = match spec.linux_activation {
            Activation::Always => return true,
            Activation::LaunchToken(token) => self
                .steam()
                .and_then(|steam| steam.add_launch_token(&self.config.app_id, token))
                .map(|_| ()),
            Activation::CompatTool => self.steam().and_then(|steam| {
                steam.set_compat_mapping(&self.config.app_id, &self.config.compat_tool)
            }),
        };
        match outcome {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("{} installed but not activated: {}", spec.id, err);
                false
            }
        }
    }

    fn deactivate(&self, spec: &ComponentSpec) -> bool {
        if self.platform == Platform::Windows {
            return true;
        }
        let outcome = match spec.linux_activation {
            Activation::Always => return true,
            Activation::LaunchToken(token) => self
                .steam()
                .and_then(|steam| steam.remove_launch_token(&self.config.app_id, token))
                .map(|_| ()),
            Activation::CompatTool => self
                .steam()
                .and_then(|steam| steam.clear_compat_mapping(&self.config.app_id)),
        };
        match outcome {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("could not deactivate {}: {}", spec.id, err);
                false
            }
        }
    }

    pub async fn uninstall(&self, id: ComponentId) -> Result<UninstallReport> {
        let _guard = self.locks.try_acquire(id)?;
        let cancel = self.register(id)?;
        let spec = component(id);
        tracing::info!("uninstalling {}", id);

        self.set_status(id, OperationStatus::Uninstalling);
        let deactivated = if self.store.manifest(id)?.is_empty() {
            false
        } else {
            self.deactivate(spec)
        };

        let store = self.store.clone();
        let game_dir = self.game_dir.clone();
        let manager = self.clone();
        let result = tokio::task::spawn_blocking(move || {
            let progress = |file: &str, done: usize, total: usize| {
                let mut current = manager
                    .get_progress(id)
                    .unwrap_or_else(|| OperationProgress::pending(id));
                current.current_file = Some(file.to_string());
                current.progress_percent = done as f64 / total.max(1) as f64 * 100.0;
                manager.update_progress(current);
            };
            InstallEngine::new(&store, &game_dir).uninstall(spec, &cancel, &progress)
        })
        .await
        .map_err(|e| PatchOpsError::Config(format!("uninstall worker failed: {}", e)))
        .and_then(|result| result)
        .map(|mut report| {
            report.deactivated = deactivated;
            report
        });

        match &result {
            Ok(report) => tracing::info!("{}: {}", id, report.message),
            Err(err) => tracing::error!("uninstall of {} failed: {}", id, err),
        }
        self.finish(id, result.as_ref().err());
        result
    }

    /// Re-hashes every installed file against its manifest entry.
    pub fn verify(&self) -> Result<Vec<VerifyEntry>> {
        let state = self.store.load()?;
        let mut results = Vec::new();
        for (id, manifest) in &state.components {
            for entry in &manifest.entries {
                let path = self.game_dir.join(&entry.path);
                let check = if entry.status == EntryStatus::Pending {
                    FileCheck::Pending
                } else if !path.is_file() {
                    FileCheck::Missing
                } else if archive_validator::verify_file(&path, &entry.source_sha256)? {
                    FileCheck::Intact
                } else {
                    FileCheck::Modified
                };
                results.push(VerifyEntry {
                    component: *id,
                    path: entry.path.clone(),
                    check,
                });
            }
        }
        Ok(results)
    }

    pub fn convert_legacy_backups(&self, apply: bool) -> Result<Vec<BackupConversion>> {
        backups::convert_legacy_backups(&self.game_dir, apply)
    }

    /// Format sniffing for a user-supplied dump before an install.
    pub fn inspect_dump(&self, path: &Path) -> Result<ArchiveFormat> {
        archive_validator::detect_format(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssetOverride;
    use crate::test_support::{fake_pe, temp_dir, zip_bytes};
    use httpmock::prelude::*;
    use std::fs;
    use std::time::Duration;

    fn t7_zip() -> Vec<u8> {
        zip_bytes(&[
            ("linux/t7patch.dll", &fake_pe(1)),
            ("linux/dsound.dll", &fake_pe(2)),
            ("linux/t7patchloader.dll", &fake_pe(3)),
            ("linux/t7patch.conf", b"playername=Unknown Soldier\n"),
        ])
    }

    fn lpc_zip() -> Vec<u8> {
        zip_bytes(&[("LPC/core_mp.ff", &fake_pe(4)), ("LPC/zm_mod.ff", &fake_pe(5))])
    }

    fn manager_for(server: &MockServer, root: &Path) -> AddonManager {
        let game = root.join("game");
        fs::create_dir_all(&game).expect("game dir");
        fs::write(game.join("BlackOps3.exe"), fake_pe(0)).expect("game exe");
        let mut config = AppConfig::rooted(root);
        config.steam_root = Some(root.join("no-steam"));
        config.fetch.base_backoff_ms = 5;
        config.fetch.chunk_timeout_secs = 5;
        for (asset, path) in [("t7patch-archive", "/t7.zip"), ("lpc-archive", "/lpc.zip")] {
            config.asset_overrides.insert(
                asset.to_string(),
                AssetOverride {
                    urls: vec![server.url(path)],
                    ..AssetOverride::default()
                },
            );
        }
        AddonManager::new(config, game).expect("manager")
    }

    #[tokio::test]
    async fn t7_install_and_uninstall_through_the_pipeline() {
        let server = MockServer::start_async().await;
        let t7 = server
            .mock_async(|when, then| {
                when.method(GET).path("/t7.zip");
                then.status(200)
                    .header("content-type", "application/zip")
                    .body(t7_zip());
            })
            .await;
        let lpc = server
            .mock_async(|when, then| {
                when.method(GET).path("/lpc.zip");
                then.status(200).body(lpc_zip());
            })
            .await;
        let root = temp_dir("manager");
        let manager = manager_for(&server, &root);

        let report = manager
            .install(ComponentId::T7Patch, InstallOptions::default())
            .await
            .expect("install t7");
        t7.assert_async().await;
        lpc.assert_async().await;
        assert_eq!(report.files_installed, 6);
        assert!(manager.game_dir().join("LPC").join("zm_mod.ff").exists());
        assert!(manager.refresh_state(ComponentId::T7Patch).is_installed());
        assert_eq!(
            manager.get_progress(ComponentId::T7Patch).map(|p| p.status),
            Some(OperationStatus::Completed)
        );
        assert!(manager
            .verify()
            .expect("verify")
            .iter()
            .all(|entry| entry.check == FileCheck::Intact));

        // Second install reuses the cached archives.
        manager
            .install(ComponentId::T7Patch, InstallOptions::default())
            .await
            .expect("reinstall");
        t7.assert_calls_async(1).await;

        manager.uninstall(ComponentId::T7Patch).await.expect("uninstall");
        assert!(!manager.game_dir().join("dsound.dll").exists());
        assert!(!manager.game_dir().join("LPC").exists());
        assert_eq!(
            manager.refresh_state(ComponentId::T7Patch),
            ComponentState::NotInstalled
        );
        let _ = fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn concurrent_install_of_same_component_is_busy() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/t7.zip");
                then.status(200)
                    .delay(Duration::from_millis(600))
                    .body(t7_zip());
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/lpc.zip");
                then.status(200).body(lpc_zip());
            })
            .await;
        let root = temp_dir("manager");
        let manager = manager_for(&server, &root);

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .install(ComponentId::T7Patch, InstallOptions::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        let second = manager
            .install(ComponentId::T7Patch, InstallOptions::default())
            .await;
        assert!(matches!(second, Err(PatchOpsError::Busy(ComponentId::T7Patch))));

        first
            .await
            .expect("join first install")
            .expect("first install completes");
        assert!(manager.game_dir().join("dsound.dll").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn invalid_package_never_touches_the_game_dir() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/t7.zip");
                then.status(200).body(zip_bytes(&[
                    ("linux/t7patch.dll", &fake_pe(1)),
                    ("linux/readme.txt", &fake_pe(9)),
                ]));
            })
            .await;
        let root = temp_dir("manager");
        let manager = manager_for(&server, &root);
        fs::write(manager.game_dir().join("dsound.dll"), b"someone else's dll").expect("dsound");

        let err = manager
            .install(ComponentId::T7Patch, InstallOptions::default())
            .await
            .expect_err("missing dsound.dll and loader");
        assert!(matches!(err, PatchOpsError::ContentRejected(_)));
        assert!(!manager.game_dir().join("t7patch.dll").exists());
        assert_eq!(
            fs::read(manager.game_dir().join("dsound.dll")).expect("untouched"),
            b"someone else's dll"
        );
        assert!(manager.store().manifest(ComponentId::T7Patch).expect("manifest").is_empty());
        let t7_asset = component(ComponentId::T7Patch)
            .asset("t7patch-archive")
            .expect("t7 asset");
        assert!(!manager.resolver.cached_path(t7_asset).exists());
        assert_eq!(
            manager.get_progress(ComponentId::T7Patch).map(|p| p.status),
            Some(OperationStatus::Failed)
        );
        let _ = fs::remove_dir_all(root);
    }

    fn dxvk_zip(tag: u8) -> Vec<u8> {
        zip_bytes(&[
            ("dxvk/x64/dxgi.dll", &fake_pe(tag)),
            ("dxvk/x64/d3d11.dll", &fake_pe(tag + 1)),
        ])
    }

    fn gitlab_index(server: &MockServer, tag: &str, path: &str) -> serde_json::Value {
        serde_json::json!([{
            "tag_name": tag,
            "assets": { "links": [{ "name": format!("dxvk-gplasync-{}.zip", tag), "url": server.url(path) }] }
        }])
    }

    #[tokio::test]
    async fn newer_release_replaces_cached_archive() {
        let server = MockServer::start_async().await;
        let mut index = server
            .mock_async(|when, then| {
                when.method(GET).path("/releases");
                then.status(200).json_body(gitlab_index(&server, "v2.6", "/v26.zip"));
            })
            .await;
        let v26 = server
            .mock_async(|when, then| {
                when.method(GET).path("/v26.zip");
                then.status(200).body(dxvk_zip(26));
            })
            .await;
        let v27 = server
            .mock_async(|when, then| {
                when.method(GET).path("/v27.zip");
                then.status(200).body(dxvk_zip(27));
            })
            .await;
        let root = temp_dir("manager");
        let mut manager = manager_for(&server, &root);
        let mut config = (*manager.config).clone();
        config.asset_overrides.insert(
            "dxvk-archive".to_string(),
            AssetOverride {
                release_index: Some(server.url("/releases")),
                ..AssetOverride::default()
            },
        );
        manager.resolver = MirrorResolver::new(config.cache_dir.clone(), config.asset_overrides.clone());
        manager.config = Arc::new(config);

        manager
            .install(ComponentId::DxvkGplasync, InstallOptions::default())
            .await
            .expect("install v2.6");
        let conf = manager.game_dir().join(DXVK_CONF);
        assert!(fs::read_to_string(&conf).expect("conf").contains("gplAsyncCache"));

        // Same release again: the cache satisfies it.
        manager
            .install(ComponentId::DxvkGplasync, InstallOptions::default())
            .await
            .expect("reinstall v2.6");
        v26.assert_calls_async(1).await;

        index.delete_async().await;
        index = server
            .mock_async(|when, then| {
                when.method(GET).path("/releases");
                then.status(200).json_body(gitlab_index(&server, "v2.7", "/v27.zip"));
            })
            .await;
        manager
            .install(ComponentId::DxvkGplasync, InstallOptions::default())
            .await
            .expect("install v2.7");
        index.assert_async().await;
        v27.assert_calls_async(1).await;
        assert_eq!(fs::read(manager.game_dir().join("dxgi.dll")).expect("dxgi"), fake_pe(27));
        assert!(!fs::read_to_string(&conf).expect("conf").contains("gplAsyncCache"));
        assert_eq!(
            manager
                .store()
                .manifest(ComponentId::DxvkGplasync)
                .expect("manifest")
                .version
                .as_deref(),
            Some("v2.7")
        );
        let _ = fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn enhanced_refuses_release_without_digest() {
        let server = MockServer::start_async().await;
        let index = server
            .mock_async(|when, then| {
                when.method(GET).path("/latest");
                then.status(200).json_body(serde_json::json!({
                    "tag_name": "v1.0",
                    "assets": [{
                        "name": "BO3Enhanced.zip",
                        "browser_download_url": "https://example.invalid/BO3Enhanced.zip"
                    }]
                }));
            })
            .await;
        let root = temp_dir("manager");
        let mut manager = manager_for(&server, &root);
        let mut config = (*manager.config).clone();
        config.asset_overrides.insert(
            "enhanced-archive".to_string(),
            AssetOverride {
                release_index: Some(server.url("/latest")),
                ..AssetOverride::default()
            },
        );
        manager.resolver = MirrorResolver::new(config.cache_dir.clone(), config.asset_overrides.clone());
        manager.config = Arc::new(config);

        let dump = root.join("dump");
        fs::create_dir_all(dump.join("DUMP")).expect("dump");
        fs::write(dump.join("DUMP").join("BlackOps3.exe"), fake_pe(6)).expect("dump exe");
        fs::write(dump.join("DUMP").join("MicrosoftGame.config"), b"<Game/>").expect("config");
        manager.trust.lock().expect("trust").add(TrustEntry {
            sha256: crate::utils::file::sha256_bytes(&fake_pe(6)),
            label: "uwp".to_string(),
            scope: TrustScope::BinaryReplacement,
            component: Some(ComponentId::Bo3Enhanced),
        });

        let err = manager
            .install(
                ComponentId::Bo3Enhanced,
                InstallOptions {
                    dump: Some(dump.clone()),
                },
            )
            .await
            .expect_err("no digest");
        index.assert_async().await;
        assert!(matches!(err, PatchOpsError::ContentRejected(_)), "{}", err);
        assert_eq!(
            fs::read(manager.game_dir().join("BlackOps3.exe")).expect("exe"),
            fake_pe(0)
        );
        let _ = fs::remove_dir_all(root);
    }
}
