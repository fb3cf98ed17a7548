//! Static description of every add-on PatchOps manages: where its assets
//! come from, what the archives must contain, and which target paths the
//! component may touch.

use crate::models::ComponentId;
use crate::utils::file::file_name_of;

pub const MIN_ARCHIVE_BYTES: u64 = 1024;
pub const MIN_EXECUTABLE_BYTES: u64 = 4096;
pub const DXVK_CONF: &str = "dxvk.conf";
pub const T7_LAUNCH_TOKEN: &str = "WINEDLLOVERRIDES=\"dsound=n,b\"";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    /// zip, tar.gz, tar.zst or a directory; detected from content.
    Archive,
    /// A bare PE image installed under `Layout::Single`.
    Executable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseIndexFormat {
    GitHubLatest,
    GitLabReleases,
}

#[derive(Clone, Copy, Debug)]
pub struct ReleaseIndexSpec {
    pub url: &'static str,
    pub format: ReleaseIndexFormat,
    pub preferred_suffixes: &'static [&'static str],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// Every entry lands under `into` by file name. When two entries share a
    /// name, the one below a directory called `prefer_dir` wins, then the
    /// shallowest.
    Flatten {
        into: Option<&'static str>,
        prefer_dir: Option<&'static str>,
    },
    /// The asset is one file installed at the given name.
    Single(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WhitelistRule {
    Exact(&'static str),
    /// Any file directly inside `dir` ending in `.ext`.
    DirExtension {
        dir: &'static str,
        ext: &'static str,
    },
}

impl WhitelistRule {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            WhitelistRule::Exact(name) => path.eq_ignore_ascii_case(name),
            WhitelistRule::DirExtension { dir, ext } => {
                let Some((parent, name)) = path.split_once('/') else {
                    return false;
                };
                parent.eq_ignore_ascii_case(dir)
                    && !name.contains('/')
                    && name.len() > ext.len() + 1
                    && name
                        .to_ascii_lowercase()
                        .ends_with(&format!(".{}", ext.to_ascii_lowercase()))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    Name(&'static str),
    Suffix(&'static str),
}

impl Requirement {
    pub fn satisfied_by(&self, archive_path: &str) -> bool {
        let lower = archive_path.to_ascii_lowercase();
        match self {
            Requirement::Name(name) => file_name_of(&lower) == name.to_ascii_lowercase(),
            Requirement::Suffix(suffix) => lower.ends_with(&suffix.to_ascii_lowercase()),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Requirement::Name(name) | Requirement::Suffix(name) => name,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AssetSpec {
    pub name: &'static str,
    pub kind: AssetKind,
    pub release_index: Option<ReleaseIndexSpec>,
    pub primary_urls: &'static [&'static str],
    pub cache_file: &'static str,
    /// Never fetched; supplied by the user or the cache.
    pub local_only: bool,
    /// Refuse to download without a published SHA-256.
    pub require_digest: bool,
    pub required: &'static [Requirement],
    pub layout: Layout,
    pub whitelist: &'static [WhitelistRule],
    pub min_archive_bytes: u64,
    pub min_executable_bytes: u64,
}

impl AssetSpec {
    pub fn permits(&self, target: &str) -> bool {
        self.whitelist.iter().any(|rule| rule.matches(target))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Always,
    LaunchToken(&'static str),
    CompatTool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    File(&'static str),
    /// Present and hashed to a binary-replacement trust entry for this component.
    TrustedExecutable(&'static str),
}

#[derive(Debug)]
pub struct ComponentSpec {
    pub id: ComponentId,
    pub display_name: &'static str,
    pub assets: &'static [AssetSpec],
    pub generated: &'static [&'static str],
    pub protected: &'static [&'static str],
    pub preserve_existing: &'static [&'static str],
    pub markers: &'static [Marker],
    pub linux_activation: Activation,
    /// Components replacing the same files; they share a lock and may not be
    /// installed side by side.
    pub conflicts: &'static [ComponentId],
}

impl ComponentSpec {
    pub fn permits(&self, target: &str) -> bool {
        self.generated
            .iter()
            .any(|name| name.eq_ignore_ascii_case(target))
            || self.assets.iter().any(|asset| asset.permits(target))
    }

    pub fn is_protected(&self, target: &str) -> bool {
        self.protected
            .iter()
            .any(|name| name.eq_ignore_ascii_case(target))
    }

    pub fn preserves_existing(&self, target: &str) -> bool {
        self.preserve_existing
            .iter()
            .any(|name| name.eq_ignore_ascii_case(target))
    }

    pub fn asset(&self, name: &str) -> Option<&'static AssetSpec> {
        self.assets.iter().find(|asset| asset.name == name)
    }

    /// Lock key shared by this component and everything it conflicts with.
    pub fn lock_key(&self) -> ComponentId {
        self.conflicts
            .iter()
            .copied()
            .chain(std::iter::once(self.id))
            .min()
            .unwrap_or(self.id)
    }
}

const T7_FILES: &[WhitelistRule] = &[
    WhitelistRule::Exact("t7patch.dll"),
    WhitelistRule::Exact("t7patch.conf"),
    WhitelistRule::Exact("discord_game_sdk.dll"),
    WhitelistRule::Exact("dsound.dll"),
    WhitelistRule::Exact("t7patchloader.dll"),
    WhitelistRule::Exact("zbr2.dll"),
];

const LPC_FILES: &[WhitelistRule] = &[WhitelistRule::DirExtension {
    dir: "LPC",
    ext: "ff",
}];

const DXVK_FILES: &[WhitelistRule] = &[
    WhitelistRule::Exact("dxgi.dll"),
    WhitelistRule::Exact("d3d11.dll"),
];

const ENHANCED_RULES: &[WhitelistRule] = &[
    WhitelistRule::Exact("T7WSBootstrapper.dll"),
    WhitelistRule::Exact("T7InternalWS.dll"),
    WhitelistRule::Exact("steam_api65.dll"),
    WhitelistRule::Exact("WindowsCodecs.dll"),
];

const DUMP_RULES: &[WhitelistRule] = &[
    WhitelistRule::Exact("BlackOps3.exe"),
    WhitelistRule::Exact("MicrosoftGame.config"),
    WhitelistRule::Exact("Party.dll"),
    WhitelistRule::Exact("PartyXboxLive.dll"),
    WhitelistRule::Exact("PlayFabMultiplayerGDK.dll"),
    WhitelistRule::Exact("libScePad.dll"),
    WhitelistRule::Exact("XCurl.dll"),
];

const DXVK_SUFFIXES: &[&str] = &[
    ".zip", ".tar.xz", ".tar.gz", ".tgz", ".tar.bz2", ".tar.zst", ".tzst",
];

static COMPONENTS: [ComponentSpec; 4] = [
    ComponentSpec {
        id: ComponentId::T7Patch,
        display_name: "T7 Patch",
        assets: &[
            AssetSpec {
                name: "t7patch-archive",
                kind: AssetKind::Archive,
                release_index: None,
                primary_urls: &["https://github.com/shiversoftdev/t7patch/releases/download/Current/Linux.Steamdeck.and.Manual.Windows.Install.zip"],
                cache_file: "T7Patch.zip",
                local_only: false,
                require_digest: false,
                required: &[
                    Requirement::Name("t7patch.dll"),
                    Requirement::Name("dsound.dll"),
                    Requirement::Name("t7patchloader.dll"),
                ],
                layout: Layout::Flatten {
                    into: None,
                    prefer_dir: Some("linux"),
                },
                whitelist: T7_FILES,
                min_archive_bytes: MIN_ARCHIVE_BYTES,
                min_executable_bytes: MIN_EXECUTABLE_BYTES,
            },
            AssetSpec {
                name: "lpc-archive",
                kind: AssetKind::Archive,
                release_index: None,
                primary_urls: &["https://github.com/shiversoftdev/t7patch/releases/download/Current/LPC.1.zip"],
                cache_file: "LPC.zip",
                local_only: false,
                require_digest: false,
                required: &[Requirement::Suffix(".ff")],
                layout: Layout::Flatten {
                    into: Some("LPC"),
                    prefer_dir: Some("LPC"),
                },
                whitelist: LPC_FILES,
                min_archive_bytes: MIN_ARCHIVE_BYTES,
                min_executable_bytes: MIN_EXECUTABLE_BYTES,
            },
        ],
        generated: &[],
        protected: &[],
        preserve_existing: &["t7patch.conf"],
        markers: &[Marker::File("dsound.dll"), Marker::File("t7patchloader.dll")],
        linux_activation: Activation::LaunchToken(T7_LAUNCH_TOKEN),
        conflicts: &[],
    },
    ComponentSpec {
        id: ComponentId::DxvkGplasync,
        display_name: "DXVK-GPLAsync",
        assets: &[AssetSpec {
            name: "dxvk-archive",
            kind: AssetKind::Archive,
            release_index: Some(ReleaseIndexSpec {
                url: "https://gitlab.com/api/v4/projects/Ph42oN%2Fdxvk-gplasync/releases",
                format: ReleaseIndexFormat::GitLabReleases,
                preferred_suffixes: DXVK_SUFFIXES,
            }),
            primary_urls: &[],
            cache_file: "dxvk-gplasync.pkg",
            local_only: false,
            require_digest: false,
            required: &[Requirement::Name("dxgi.dll"), Requirement::Name("d3d11.dll")],
            layout: Layout::Flatten {
                into: None,
                prefer_dir: Some("x64"),
            },
            whitelist: DXVK_FILES,
            min_archive_bytes: MIN_ARCHIVE_BYTES,
            min_executable_bytes: MIN_EXECUTABLE_BYTES,
        }],
        generated: &[DXVK_CONF],
        protected: &[],
        preserve_existing: &[],
        markers: &[Marker::File("dxgi.dll"), Marker::File("d3d11.dll")],
        linux_activation: Activation::Always,
        conflicts: &[],
    },
    ComponentSpec {
        id: ComponentId::Bo3Enhanced,
        display_name: "BO3 Enhanced",
        assets: &[
            AssetSpec {
                name: "enhanced-dump",
                kind: AssetKind::Archive,
                release_index: None,
                primary_urls: &[],
                cache_file: "DUMP.zip",
                local_only: true,
                require_digest: false,
                required: &[
                    Requirement::Name("BlackOps3.exe"),
                    Requirement::Name("MicrosoftGame.config"),
                ],
                layout: Layout::Flatten {
                    into: None,
                    prefer_dir: Some("DUMP"),
                },
                whitelist: DUMP_RULES,
                min_archive_bytes: MIN_ARCHIVE_BYTES,
                min_executable_bytes: MIN_EXECUTABLE_BYTES,
            },
            AssetSpec {
                name: "enhanced-archive",
                kind: AssetKind::Archive,
                release_index: Some(ReleaseIndexSpec {
                    url: "https://api.github.com/repos/shiversoftdev/BO3Enhanced/releases/latest",
                    format: ReleaseIndexFormat::GitHubLatest,
                    preferred_suffixes: &[".zip"],
                }),
                primary_urls: &[],
                cache_file: "BO3Enhanced.zip",
                local_only: false,
                require_digest: true,
                required: &[
                    Requirement::Name("T7WSBootstrapper.dll"),
                    Requirement::Name("T7InternalWS.dll"),
                    Requirement::Name("steam_api65.dll"),
                    Requirement::Name("WindowsCodecs.dll"),
                ],
                layout: Layout::Flatten {
                    into: None,
                    prefer_dir: None,
                },
                whitelist: ENHANCED_RULES,
                min_archive_bytes: MIN_ARCHIVE_BYTES,
                min_executable_bytes: MIN_EXECUTABLE_BYTES,
            },
        ],
        generated: &[],
        protected: &["BlackOps3.exe"],
        preserve_existing: &[],
        markers: &[
            Marker::File("T7WSBootstrapper.dll"),
            Marker::File("T7InternalWS.dll"),
            Marker::File("steam_api65.dll"),
            Marker::File("WindowsCodecs.dll"),
        ],
        linux_activation: Activation::CompatTool,
        conflicts: &[ComponentId::Reforged],
    },
    ComponentSpec {
        id: ComponentId::Reforged,
        display_name: "BO3 Reforged",
        assets: &[AssetSpec {
            name: "reforged-exe",
            kind: AssetKind::Executable,
            release_index: None,
            primary_urls: &["https://downloads.bo3reforged.com/BlackOps3.exe"],
            cache_file: "BlackOps3-reforged.exe",
            local_only: false,
            require_digest: false,
            required: &[Requirement::Name("BlackOps3.exe")],
            layout: Layout::Single("BlackOps3.exe"),
            whitelist: &[WhitelistRule::Exact("BlackOps3.exe")],
            min_archive_bytes: MIN_EXECUTABLE_BYTES,
            min_executable_bytes: MIN_EXECUTABLE_BYTES,
        }],
        generated: &[],
        protected: &["BlackOps3.exe"],
        preserve_existing: &[],
        markers: &[Marker::TrustedExecutable("BlackOps3.exe")],
        linux_activation: Activation::Always,
        conflicts: &[ComponentId::Bo3Enhanced],
    },
];

pub fn components() -> &'static [ComponentSpec] {
    &COMPONENTS
}

pub fn component(id: ComponentId) -> &'static ComponentSpec {
    match id {
        ComponentId::T7Patch => &COMPONENTS[0],
        ComponentId::DxvkGplasync => &COMPONENTS[1],
        ComponentId::Bo3Enhanced => &COMPONENTS[2],
        ComponentId::Reforged => &COMPONENTS[3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelists_never_overlap_between_patch_and_shader_layer() {
        for path in ["dsound.dll", "LPC/core_mp.ff", "dxgi.dll", "dxvk.conf"] {
            let owners: Vec<_> = components()
                .iter()
                .filter(|spec| spec.permits(path))
                .map(|spec| spec.id)
                .collect();
            assert_eq!(owners.len(), 1, "{} owned by {:?}", path, owners);
        }
    }

    #[test]
    fn lpc_rule_only_accepts_direct_ff_children() {
        let rule = WhitelistRule::DirExtension { dir: "LPC", ext: "ff" };
        assert!(rule.matches("LPC/core_mp.ff"));
        assert!(rule.matches("lpc/CORE.FF"));
        assert!(!rule.matches("LPC/nested/core.ff"));
        assert!(!rule.matches("LPC/.ff"));
        assert!(!rule.matches("core.ff"));
    }

    #[test]
    fn requirements_match_name_or_suffix() {
        assert!(Requirement::Name("dxgi.dll").satisfied_by("dxvk-2.6/x64/DXGI.dll"));
        assert!(!Requirement::Name("dxgi.dll").satisfied_by("x64/notdxgi.dll"));
        assert!(Requirement::Suffix(".ff").satisfied_by("LPC/core_mp.ff"));
    }

    #[test]
    fn executable_replacers_share_a_lock() {
        assert_eq!(
            component(ComponentId::Reforged).lock_key(),
            component(ComponentId::Bo3Enhanced).lock_key()
        );
        assert_ne!(
            component(ComponentId::T7Patch).lock_key(),
            component(ComponentId::DxvkGplasync).lock_key()
        );
    }

    #[test]
    fn catalog_lookup_is_total() {
        for id in ComponentId::ALL {
            assert_eq!(component(id).id, id);
        }
    }
}
