use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Control script run by the renderer for every page
///
/// Navigates, waits, and reports the final URL with the status and content type of
/// the main response. Target-site HTTP errors come back as a status, anything else
/// raises so the renderer reports a failed render.
pub const DEFAULT_SCRIPT: &str = r#"
function main(splash, args)
    splash.images_enabled = args.images == 1
    splash.resource_timeout = args.resource_timeout
    if args.user_agent then
        splash:set_user_agent(args.user_agent)
    end

    local ok, reason = splash:go(args.url)
    if not ok then
        local code = reason and tonumber(string.match(reason, "^http(%d+)$"))
        if code then
            return {html = "", url = splash:url(), status = code, content_type = ""}
        end
        error(reason)
    end
    splash:wait(args.wait)

    local status, content_type = 200, "text/html"
    local entries = splash:history()
    local last = entries[#entries]
    if last and last.response then
        status = last.response.status or status
        for _, header in ipairs(last.response.headers or {}) do
            if string.lower(header.name) == "content-type" then
                content_type = header.value
            end
        end
    end

    return {
        html = splash:html(),
        url = splash:url(),
        status = status,
        content_type = content_type,
    }
end
"#;

/// Load the control script, falling back to the built-in one
pub fn load_script(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => {
            let script = fs::read_to_string(path)
                .context(format!("Failed to read script file: {}", path.display()))?;
            if !script.contains("function main") {
                anyhow::bail!("Script {} does not define a main function", path.display());
            }
            info!("Using render script from {}", path.display());
            Ok(script)
        }
        None => Ok(DEFAULT_SCRIPT.to_string()),
    }
}
