use crate::AppState;

pub fn show_launch_options(state: &AppState) -> Result<Option<String>, String> {
    let steam = state.addons.steam().map_err(|e| e.to_string())?;
    steam
        .launch_options(&state.config.app_id)
        .map_err(|e| e.to_string())
}

pub fn set_launch_options(value: &str, state: &AppState) -> Result<(), String> {
    let steam = state.addons.steam().map_err(|e| e.to_string())?;
    steam
        .set_launch_options(&state.config.app_id, value)
        .map_err(|e| e.to_string())
}

pub fn clear_launch_options(state: &AppState) -> Result<(), String> {
    let steam = state.addons.steam().map_err(|e| e.to_string())?;
    steam
        .clear_launch_options(&state.config.app_id)
        .map_err(|e| e.to_string())
}

pub fn set_compat_tool(tool: Option<&str>, state: &AppState) -> Result<String, String> {
    let steam = state.addons.steam().map_err(|e| e.to_string())?;
    let tool = tool.unwrap_or(&state.config.compat_tool);
    steam
        .set_compat_mapping(&state.config.app_id, tool)
        .map_err(|e| e.to_string())?;
    Ok(tool.to_string())
}

pub fn clear_compat_tool(state: &AppState) -> Result<(), String> {
    let steam = state.addons.steam().map_err(|e| e.to_string())?;
    steam
        .clear_compat_mapping(&state.config.app_id)
        .map_err(|e| e.to_string())
}
