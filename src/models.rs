use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentId {
    T7Patch,
    DxvkGplasync,
    Bo3Enhanced,
    Reforged,
}

impl ComponentId {
    pub const ALL: [ComponentId; 4] = [
        ComponentId::T7Patch,
        ComponentId::DxvkGplasync,
        ComponentId::Bo3Enhanced,
        ComponentId::Reforged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentId::T7Patch => "t7-patch",
            ComponentId::DxvkGplasync => "dxvk-gplasync",
            ComponentId::Bo3Enhanced => "bo3-enhanced",
            ComponentId::Reforged => "reforged",
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        ComponentId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| format!("unknown component '{}'", value))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Windows,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentState {
    NotInstalled,
    InstalledInactive,
    InstalledActive,
}

impl ComponentState {
    pub fn is_installed(&self) -> bool {
        !matches!(self, ComponentState::NotInstalled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MirrorId {
    Primary,
    Backup,
    CachedLocal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "location")]
pub enum SourceLocation {
    Remote(String),
    Local(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub mirror: MirrorId,
    pub location: SourceLocation,
}

impl Source {
    pub fn remote(mirror: MirrorId, url: impl Into<String>) -> Self {
        Self {
            mirror,
            location: SourceLocation::Remote(url.into()),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            mirror: MirrorId::CachedLocal,
            location: SourceLocation::Local(path.into()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            SourceLocation::Remote(url) => write!(f, "{:?} {}", self.mirror, url),
            SourceLocation::Local(path) => write!(f, "{:?} {}", self.mirror, path.display()),
        }
    }
}

/// A logical asset resolved for one operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub version: Option<String>,
    pub sha256: Option<String>,
    pub size: Option<u64>,
    pub sources: Vec<Source>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: u64,
    pub max: Option<u64>,
}

impl SizeRange {
    pub fn at_least(min: u64) -> Self {
        Self { min, max: None }
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.min && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadStatus {
    Ok,
    ChecksumMismatch,
    ContentTypeRejected,
    Exhausted,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub asset: String,
    pub destination: PathBuf,
    pub expected_size: Option<SizeRange>,
    pub expected_sha256: Option<String>,
    pub computed_sha256: Option<String>,
    pub source: Option<Source>,
    pub bytes_transferred: u64,
    pub status: DownloadStatus,
    pub detail: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryRole {
    PayloadFile,
    ManifestFile,
    Ignorable,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Path inside the archive, `/`-separated.
    pub path: String,
    /// Target-relative destination, present for entries that get installed.
    pub target: Option<String>,
    pub size: u64,
    pub role: EntryRole,
    pub sha256: Option<String>,
    #[serde(skip)]
    pub staged: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Package {
    pub asset: String,
    pub version: Option<String>,
    pub archive_sha256: String,
    pub entries: Vec<PackageEntry>,
}

impl Package {
    pub fn installable(&self) -> impl Iterator<Item = &PackageEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.target.is_some() && entry.staged.is_some())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustScope {
    BinaryReplacement,
    Advisory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEntry {
    pub sha256: String,
    pub label: String,
    pub scope: TrustScope,
    #[serde(default)]
    pub component: Option<ComponentId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EntryOrigin {
    Backup { path: String },
    NewlyCreated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Complete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub origin: EntryOrigin,
    pub installed_at: DateTime<Utc>,
    pub source_sha256: String,
    pub status: EntryStatus,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest {
    pub version: Option<String>,
    pub entries: Vec<ManifestEntry>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstallManifest {
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries
            .iter()
            .find(|entry| entry.path.eq_ignore_ascii_case(path))
    }

    pub fn entry_mut(&mut self, path: &str) -> Option<&mut ManifestEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.path.eq_ignore_ascii_case(path))
    }

    pub fn remove(&mut self, path: &str) {
        self.entries
            .retain(|entry| !entry.path.eq_ignore_ascii_case(path));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Resolving,
    Downloading,
    Validating,
    Installing,
    Uninstalling,
    Activating,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationProgress {
    pub component: ComponentId,
    pub status: OperationStatus,
    pub progress_percent: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed_bps: u64,
    pub eta_seconds: u64,
    pub current_file: Option<String>,
}

impl OperationProgress {
    pub fn pending(component: ComponentId) -> Self {
        Self {
            component,
            status: OperationStatus::Pending,
            progress_percent: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed_bps: 0,
            eta_seconds: 0,
            current_file: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstallReport {
    pub files_installed: u32,
    pub files_backed_up: u32,
    pub files_preserved: u32,
    pub activated: bool,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UninstallReport {
    pub files_restored: u32,
    pub files_removed: u32,
    pub refused: Vec<String>,
    pub deactivated: bool,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutableVariant {
    Missing,
    Stock,
    Reforged,
    Enhanced,
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationControl {
    Running,
    Cancelled,
}

/// Receiving side of an operation's cancel channel.
#[derive(Clone)]
pub struct CancelToken {
    control: watch::Receiver<OperationControl>,
}

impl CancelToken {
    pub fn new(control: watch::Receiver<OperationControl>) -> Self {
        Self { control }
    }

    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(OperationControl::Running);
        Self { control: rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.control.borrow() == OperationControl::Cancelled
    }

    /// Resolves once the operation is cancelled. Pends forever if the sender
    /// goes away without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            if self.control.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
