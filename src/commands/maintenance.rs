use crate::services::backups::BackupConversion;
use crate::services::VerifyEntry;
use crate::AppState;

pub fn convert_backups(apply: bool, state: &AppState) -> Result<Vec<BackupConversion>, String> {
    state
        .addons
        .convert_legacy_backups(apply)
        .map_err(|e| e.to_string())
}

pub fn verify_installation(state: &AppState) -> Result<Vec<VerifyEntry>, String> {
    state.addons.verify().map_err(|e| e.to_string())
}
