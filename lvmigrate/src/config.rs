//! Configuration management for lvmigrate.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use lvmigrate_core::{LvmBackend, MigrationOptions, VirshBackend, DEFAULT_DEV_DIR};

use crate::cli::{Args, LogFormatArg};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lvmigrate/lvmigrate.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format
    pub log_format: LogFormat,
    /// External tool locations
    pub tools: ToolsConfig,
    /// Migration behaviour
    pub migration: MigrationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            tools: ToolsConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Resolve the configuration for a run: an explicit `--config` must load,
    /// the default location is optional.
    pub fn resolve(args: &Args) -> Result<(Self, Option<String>)> {
        match &args.config {
            Some(path) => Ok((Self::load(path)?.with_cli_overrides(args), Some(path.clone()))),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Ok((
                Self::load(DEFAULT_CONFIG_PATH)?.with_cli_overrides(args),
                Some(DEFAULT_CONFIG_PATH.to_string()),
            )),
            None => Ok((Self::default().with_cli_overrides(args), None)),
        }
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }

        if let Some(format) = args.log_format {
            self.log_format = match format {
                LogFormatArg::Pretty => LogFormat::Pretty,
                LogFormatArg::Json => LogFormat::Json,
            };
        }

        if let Some(ref uri) = args.connect {
            self.tools.connect_uri = Some(uri.clone());
        }

        if let Some(ref dir) = args.snapshot_dir {
            self.migration.snapshot_dir = dir.clone();
        }

        self
    }

    /// Hypervisor backend described by this configuration.
    pub fn virsh_backend(&self) -> VirshBackend {
        VirshBackend::new()
            .with_virsh(&self.tools.virsh)
            .with_connect_uri(self.tools.connect_uri.clone())
            .with_block_copy_timeout(self.migration.block_copy_timeout_secs.map(Duration::from_secs))
    }

    /// Volume manager backend described by this configuration.
    pub fn lvm_backend(&self) -> LvmBackend {
        LvmBackend::new().with_tools(
            &self.tools.lvdisplay,
            &self.tools.lvcreate,
            &self.tools.lvremove,
        )
    }

    /// Executor options for a run.
    pub fn migration_options(&self, dry_run: bool) -> MigrationOptions {
        MigrationOptions {
            dev_dir: self.migration.dev_dir.clone(),
            strict_cleanup: self.migration.strict_cleanup,
            dry_run,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// External tool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub virsh: String,
    pub lvdisplay: String,
    pub lvcreate: String,
    pub lvremove: String,
    /// Libvirt connection URI, virsh's default when unset
    pub connect_uri: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            virsh: "virsh".to_string(),
            lvdisplay: "lvdisplay".to_string(),
            lvcreate: "lvcreate".to_string(),
            lvremove: "lvremove".to_string(),
            connect_uri: None,
        }
    }
}

/// Migration behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Root of the LVM device namespace
    pub dev_dir: String,
    /// Where snapshot files are written
    pub snapshot_dir: String,
    /// Abort when an old volume cannot be removed
    pub strict_cleanup: bool,
    /// Give up on a block copy after this many seconds (unbounded if unset)
    pub block_copy_timeout_secs: Option<u64>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            dev_dir: DEFAULT_DEV_DIR.to_string(),
            snapshot_dir: ".".to_string(),
            strict_cleanup: false,
            block_copy_timeout_secs: None,
        }
    }
}
