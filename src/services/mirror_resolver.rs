use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::AssetOverride;
use crate::models::{Asset, MirrorId, Platform, Source, SourceLocation};
use crate::services::catalog::{AssetSpec, ReleaseIndexFormat};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub url: String,
    pub version: Option<String>,
    pub sha256: Option<String>,
    pub size: Option<u64>,
}

fn parse_digest(value: Option<&Value>) -> Option<String> {
    let raw = value?.as_str()?.trim();
    let (algo, hex) = raw.split_once(':')?;
    if !algo.eq_ignore_ascii_case("sha256") {
        return None;
    }
    let hex = hex.trim().to_ascii_lowercase();
    (hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(hex)
}

fn platform_penalty(name: &str, platform: Platform) -> u8 {
    let lower = name.to_ascii_lowercase();
    let mentions_windows = lower.contains("windows") || lower.contains("win64");
    let mentions_linux = lower.contains("linux");
    match platform {
        Platform::Windows if mentions_linux && !mentions_windows => 1,
        Platform::Linux if mentions_windows && !mentions_linux => 1,
        _ => 0,
    }
}

fn suffix_rank(url: &str, preferred: &[&str]) -> usize {
    let lower = url.to_ascii_lowercase();
    preferred
        .iter()
        .position(|suffix| lower.ends_with(suffix))
        .unwrap_or(preferred.len())
}

/// Picks the download from a release index payload. Candidates are ranked by
/// platform fit first, then by position in `preferred`.
pub fn select_release_asset(
    format: ReleaseIndexFormat,
    index: &Value,
    preferred: &[&str],
    platform: Platform,
) -> Option<ReleaseAsset> {
    let (release, candidates) = match format {
        ReleaseIndexFormat::GitHubLatest => {
            let candidates: Vec<ReleaseAsset> = index
                .get("assets")?
                .as_array()?
                .iter()
                .filter_map(|asset| {
                    let url = asset.get("browser_download_url")?.as_str()?.to_string();
                    Some(ReleaseAsset {
                        name: asset
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        url,
                        version: None,
                        sha256: parse_digest(asset.get("digest")),
                        size: asset.get("size").and_then(Value::as_u64),
                    })
                })
                .collect();
            (index, candidates)
        }
        ReleaseIndexFormat::GitLabReleases => {
            let release = index.as_array()?.first()?;
            let assets = release.get("assets")?;
            let links: Vec<ReleaseAsset> = assets
                .get("links")
                .and_then(Value::as_array)
                .map(|links| {
                    links
                        .iter()
                        .filter_map(|link| {
                            let url = link
                                .get("direct_asset_url")
                                .or_else(|| link.get("url"))?
                                .as_str()?
                                .to_string();
                            Some(ReleaseAsset {
                                name: link
                                    .get("name")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                                url,
                                version: None,
                                sha256: None,
                                size: None,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            let candidates = if links.is_empty() {
                assets
                    .get("sources")
                    .and_then(Value::as_array)
                    .map(|sources| {
                        sources
                            .iter()
                            .filter_map(|source| {
                                let url = source.get("url")?.as_str()?.to_string();
                                Some(ReleaseAsset {
                                    name: url.rsplit('/').next().unwrap_or_default().to_string(),
                                    url,
                                    version: None,
                                    sha256: None,
                                    size: None,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            } else {
                links
            };
            (release, candidates)
        }
    };

    let version = release
        .get("tag_name")
        .or_else(|| release.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    candidates
        .into_iter()
        .enumerate()
        .min_by_key(|(index, asset)| {
            (
                platform_penalty(&asset.name, platform),
                suffix_rank(&asset.url, preferred),
                *index,
            )
        })
        .map(|(_, mut asset)| {
            asset.version = version;
            asset
        })
}

/// Turns a catalog asset into an ordered source list:
/// primary, then backup mirrors, then the cached copy.
#[derive(Clone)]
pub struct MirrorResolver {
    cache_dir: PathBuf,
    overrides: BTreeMap<String, AssetOverride>,
}

impl MirrorResolver {
    pub fn new(cache_dir: PathBuf, overrides: BTreeMap<String, AssetOverride>) -> Self {
        Self {
            cache_dir,
            overrides,
        }
    }

    pub fn cached_path(&self, asset: &AssetSpec) -> PathBuf {
        self.cache_dir.join(asset.cache_file)
    }

    pub fn release_index_url(&self, asset: &AssetSpec) -> Option<String> {
        if asset.local_only {
            return None;
        }
        self.overrides
            .get(asset.name)
            .and_then(|o| o.release_index.clone())
            .or_else(|| asset.release_index.map(|index| index.url.to_string()))
    }

    /// Never fails: an asset with nothing reachable resolves to an empty list.
    /// `user_source` is a path the user picked, tried before anything else.
    pub fn resolve(
        &self,
        asset: &AssetSpec,
        platform: Platform,
        release_index: Option<&Value>,
        user_source: Option<&Path>,
    ) -> Asset {
        let overrides = self.overrides.get(asset.name);
        let release = match (asset.release_index, release_index) {
            (Some(spec), Some(index)) => {
                select_release_asset(spec.format, index, spec.preferred_suffixes, platform)
            }
            _ => None,
        };

        let mut sources = Vec::new();
        if let Some(path) = user_source {
            sources.push(Source {
                mirror: MirrorId::Primary,
                location: SourceLocation::Local(path.to_path_buf()),
            });
        }

        if !asset.local_only {
            let override_urls = overrides.map(|o| o.urls.as_slice()).unwrap_or_default();
            if !override_urls.is_empty() {
                sources.extend(override_urls.iter().map(|url| Source::remote(MirrorId::Primary, url)));
            } else {
                if let Some(release) = &release {
                    sources.push(Source::remote(MirrorId::Primary, &release.url));
                }
                sources.extend(
                    asset
                        .primary_urls
                        .iter()
                        .map(|url| Source::remote(MirrorId::Primary, *url)),
                );
            }
            if let Some(overrides) = overrides {
                sources.extend(
                    overrides
                        .backup_urls
                        .iter()
                        .map(|url| Source::remote(MirrorId::Backup, url)),
                );
            }
        }

        let cached = self.cached_path(asset);
        if cached.is_file() {
            sources.push(Source::local(cached));
        }

        let sha256 = overrides
            .and_then(|o| o.sha256.clone())
            .map(|value| value.trim().to_ascii_lowercase())
            .or_else(|| release.as_ref().and_then(|r| r.sha256.clone()));

        tracing::debug!(
            "resolved {} to {} source(s) for {:?}",
            asset.name,
            sources.len(),
            platform
        );

        Asset {
            name: asset.name.to_string(),
            version: release.as_ref().and_then(|r| r.version.clone()),
            sha256,
            size: release.as_ref().and_then(|r| r.size),
            sources,
        }
    }
}
