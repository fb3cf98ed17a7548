use std::path::PathBuf;

use crate::models::{
    ComponentId, ComponentState, ExecutableVariant, InstallReport, OperationProgress,
    UninstallReport,
};
use crate::services::{ComponentStatus, InstallOptions};
use crate::AppState;

fn parse_id(component: &str) -> Result<ComponentId, String> {
    component.parse::<ComponentId>()
}

pub fn list_components(state: &AppState) -> Result<Vec<ComponentStatus>, String> {
    Ok(state.addons.status())
}

pub fn refresh_state(component: &str, state: &AppState) -> Result<ComponentState, String> {
    Ok(state.addons.refresh_state(parse_id(component)?))
}

pub fn executable_variant(state: &AppState) -> Result<ExecutableVariant, String> {
    Ok(state.addons.executable_variant())
}

pub async fn install_component(
    component: &str,
    dump: Option<PathBuf>,
    state: &AppState,
) -> Result<InstallReport, String> {
    let id = parse_id(component)?;
    if let Some(path) = &dump {
        // Fail fast on something that is neither an archive nor a folder.
        state.addons.inspect_dump(path).map_err(|e| e.to_string())?;
    }
    state
        .addons
        .install(id, InstallOptions { dump })
        .await
        .map_err(|e| e.to_string())
}

pub async fn uninstall_component(
    component: &str,
    state: &AppState,
) -> Result<UninstallReport, String> {
    state
        .addons
        .uninstall(parse_id(component)?)
        .await
        .map_err(|e| e.to_string())
}

pub fn get_progress(
    component: &str,
    state: &AppState,
) -> Result<Option<OperationProgress>, String> {
    Ok(state.addons.get_progress(parse_id(component)?))
}

pub fn cancel_operation(component: &str, state: &AppState) -> Result<bool, String> {
    Ok(state.addons.cancel(parse_id(component)?))
}
