pub mod addon_manager;
pub mod archive_validator;
pub mod backups;
pub mod catalog;
pub mod component_lock;
pub mod dxvk_conf;
pub mod fetcher;
pub mod install_engine;
pub mod manifest_store;
pub mod mirror_resolver;
pub mod state_detector;
pub mod steam_config;
pub mod trust_store;

pub use addon_manager::{AddonManager, ComponentStatus, InstallOptions, VerifyEntry};
pub use component_lock::ComponentLocks;
pub use fetcher::Fetcher;
pub use install_engine::InstallEngine;
pub use manifest_store::ManifestStore;
pub use mirror_resolver::MirrorResolver;
pub use state_detector::StateDetector;
pub use steam_config::SteamConfigMutator;
pub use trust_store::TrustStore;
