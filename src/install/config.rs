use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

use super::InstallPlan;

pub const DEFAULT_INSTALL_SCRIPT_URL: &str = "https://dot.net/v1";
pub const DEFAULT_CHANNEL: &str = "LTS";
pub const DEFAULT_INSTALL_DIR_NAME: &str = ".dotnet";

/// Settings that decide what gets installed and where.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapConfig {
    /// Base URL the installer script is fetched from (no trailing slash).
    pub install_script_url: String,
    pub channel: String,
    /// `None` installs the latest build on the channel.
    pub version: Option<String>,
    /// Always absolute.
    pub install_directory: PathBuf,
}

/// Shape of the optional JSON settings file. Every key may be omitted.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    pub install_script_url: Option<String>,
    pub channel: Option<String>,
    pub version: Option<String>,
    pub install_directory: Option<PathBuf>,
}

/// Values given on the command line (or through the matching environment
/// variables). They win over the settings file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub install_script_url: Option<String>,
    pub channel: Option<String>,
    pub version: Option<String>,
    pub install_directory: Option<PathBuf>,
}

impl BootstrapConfig {
    /// Built-in settings, installing into `<cwd>/.dotnet`.
    pub fn defaults(cwd: &Path) -> Self {
        Self {
            install_script_url: DEFAULT_INSTALL_SCRIPT_URL.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            version: None,
            install_directory: cwd.join(DEFAULT_INSTALL_DIR_NAME),
        }
    }

    /// Layer defaults, the settings file and `overrides`.
    ///
    /// Relative install directories are resolved against the current
    /// directory.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, overrides: &ConfigOverrides) -> Result<Self> {
        let cwd = runtime.current_dir()?;
        let mut config = Self::defaults(&cwd);

        if let Some(path) = &overrides.config_file {
            let file = read_config_file(runtime, path)?;
            config.apply(&cwd, file);
        }

        config.apply(
            &cwd,
            ConfigFile {
                install_script_url: overrides.install_script_url.clone(),
                channel: overrides.channel.clone(),
                version: overrides.version.clone(),
                install_directory: overrides.install_directory.clone(),
            },
        );

        debug!("Effective configuration: {:?}", config);
        Ok(config)
    }

    fn apply(&mut self, cwd: &Path, layer: ConfigFile) {
        if let Some(url) = layer.install_script_url {
            self.install_script_url = url.trim_end_matches('/').to_string();
        }
        if let Some(channel) = layer.channel.filter(|c| !c.trim().is_empty()) {
            self.channel = channel.trim().to_string();
        }
        if let Some(version) = layer.version {
            self.version = normalize_version(Some(&version));
        }
        if let Some(dir) = layer.install_directory {
            self.install_directory = cwd.join(dir);
        }
    }

    /// Build the plan for one install. `requested_version` wins over the
    /// configured version when present.
    pub fn plan(&self, requested_version: Option<&str>) -> InstallPlan {
        let version = normalize_version(requested_version)
            .or_else(|| normalize_version(self.version.as_deref()));

        InstallPlan {
            install_script_url: self.install_script_url.clone(),
            channel: self.channel.clone(),
            version,
            install_directory: self.install_directory.clone(),
        }
    }
}

fn read_config_file<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<ConfigFile> {
    let content = runtime
        .read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Empty or blank versions mean "latest on the channel".
pub fn normalize_version(version: Option<&str>) -> Option<String> {
    version
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
