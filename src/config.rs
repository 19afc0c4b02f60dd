//! Build recipe configuration.
//!
//! Describes the base image to construct when the caller does not supply
//! one: base OS version, kernel, login, extra packages, services to
//! enable, and files to drop into the tree.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Kernel version to pin, e.g. "5.15.0-76".
    pub kernel: String,
    /// Ubuntu base version, e.g. "22.04".
    pub base_version: String,
    /// `user:password` handed to chpasswd, if a login should exist.
    #[serde(default)]
    pub login: Option<String>,
    /// Extra packages installed on top of the boot essentials.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Systemd units to enable in the image.
    #[serde(default)]
    pub services: Vec<Service>,
    /// Files materialized into the image tree.
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    /// Absolute path inside the image.
    pub path: String,
    /// Octal mode string, "0644" when omitted.
    #[serde(default)]
    pub mode: Option<String>,
    pub content: String,
}

impl BuildConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading build config '{}'", path.display()))?;
        let config: BuildConfig = toml::from_str(&raw)
            .with_context(|| format!("parsing build config '{}'", path.display()))?;
        Ok(config)
    }
}
