//! Preflight checks for host tool availability.
//!
//! Catches a missing guestfish or docker before any work starts instead
//! of failing halfway through a build.

use anyhow::{bail, Result};

/// Required host tools, as (command, package) pairs.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("guestfish", "libguestfs-tools"),
    ("docker", "docker.io"),
];

/// Check if a command exists in PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that all given tools are available, reporting every missing one.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("  {} (install: {})", tool, package))
        .collect();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }
    Ok(())
}
