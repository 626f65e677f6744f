use anyhow::{bail, Result};
use tracing::debug;

/// Tools from `tools` that cannot be found on PATH.
pub fn missing_tools(tools: &[String]) -> Vec<&str> {
    tools
        .iter()
        .filter(|tool| which::which(tool.as_str()).is_err())
        .map(String::as_str)
        .collect()
}

pub fn check_required_tools(tools: &[String]) -> Result<()> {
    let missing = missing_tools(tools);
    if !missing.is_empty() {
        bail!("Unable to find following tools: {}.", missing.join(", "));
    }
    debug!(?tools, "all required tools found");
    Ok(())
}
