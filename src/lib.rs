pub mod commands;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::services::AddonManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub addons: AddonManager,
}

impl AppState {
    pub fn initialize(config: AppConfig) -> Result<Self> {
        let game_dir = config.resolve_game_dir()?;
        tracing::info!("managing add-ons in {}", game_dir.display());
        let addons = AddonManager::new(config.clone(), game_dir)?;
        Ok(Self {
            config: Arc::new(config),
            addons,
        })
    }
}
