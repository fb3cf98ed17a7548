use crate::config::{DxvkSettings, TearFree};

/// `dxvk.gplAsyncCache` was dropped upstream in 2.7. Unknown versions keep it.
pub fn supports_gpl_async_cache(version: Option<&str>) -> bool {
    let Some(version) = version else {
        return true;
    };
    let numbers: Vec<u32> = version
        .trim()
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .split(|c: char| !c.is_ascii_digit())
        .take(2)
        .map_while(|part| part.parse().ok())
        .collect();
    match numbers.as_slice() {
        [major, minor, ..] => (*major, *minor) < (2, 7),
        [major] => *major <= 2,
        [] => true,
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

pub fn render(settings: &DxvkSettings, version: Option<&str>) -> String {
    let mut lines = vec![format!("dxvk.enableAsync = {}", flag(settings.enable_async))];
    if supports_gpl_async_cache(version) {
        lines.push(format!(
            "dxvk.gplAsyncCache = {}",
            flag(settings.gpl_async_cache)
        ));
    }
    lines.push(format!(
        "dxvk.numCompilerThreads = {}",
        settings.num_compiler_threads
    ));
    lines.push(format!("dxgi.maxFrameRate = {}", settings.max_frame_rate));
    lines.push(format!(
        "dxgi.maxFrameLatency = {}",
        settings.max_frame_latency
    ));
    let tear_free = match settings.tear_free {
        TearFree::True => "True",
        TearFree::False => "False",
        TearFree::Auto => "Auto",
    };
    lines.push(format!("dxvk.tearFree = {}", tear_free));
    if settings.show_hud {
        lines.push("dxvk.hud = fps,frametimes,gpuload".to_string());
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}
