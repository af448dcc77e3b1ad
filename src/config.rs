//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::poll::PollPolicy;

/// Default root under which volumes are mounted by label.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";

/// Default Linode API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.linode.com/v4";

/// Driver configuration merged from defaults, `linvol.toml` and `LINVOL_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "LINVOL",
    discovery(
        app_name = "linvol",
        env_var = "LINVOL_CONFIG_PATH",
        config_file_name = "linvol.toml",
        dotfile_name = ".linvol.toml",
        project_file_name = "linvol.toml"
    )
)]
pub struct DriverConfig {
    /// Personal access token for the Linode API. Required for every
    /// operation that talks to the provider.
    pub token: Option<String>,
    /// Label of this node. Defaults to the hostname; when no instance carries
    /// that label the node is matched by link-local address instead.
    pub node_label: Option<String>,
    /// Region override. Defaults to the region of this node.
    pub region: Option<String>,
    /// Directory under which each volume is mounted by label.
    #[ortho_config(default = DEFAULT_MOUNT_ROOT.to_owned())]
    pub mount_root: String,
    /// Allow taking a volume away from another node. Off by default because
    /// the other node may still be writing to it.
    #[ortho_config(default = false)]
    pub force_attach: bool,
    /// Base URL of the provider API.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    pub api_url: String,
    /// Seconds to wait for the block device to appear after attach.
    #[ortho_config(default = 300)]
    pub device_wait_secs: u64,
    /// Seconds to wait for the provider to confirm an attach.
    #[ortho_config(default = 300)]
    pub attach_wait_secs: u64,
    /// Seconds to wait for the provider to confirm a detach.
    #[ortho_config(default = 180)]
    pub detach_wait_secs: u64,
    /// Seconds to wait for an in-flight lifecycle event to settle.
    #[ortho_config(default = 180)]
    pub event_wait_secs: u64,
    /// Milliseconds between device existence checks.
    #[ortho_config(default = 1000)]
    pub device_poll_millis: u64,
    /// Milliseconds between provider observations.
    #[ortho_config(default = 2000)]
    pub remote_poll_millis: u64,
    /// Path to the `mkfs` executable.
    #[ortho_config(default = "mkfs".to_owned())]
    pub mkfs_bin: String,
    /// Path to the `mount` executable.
    #[ortho_config(default = "mount".to_owned())]
    pub mount_bin: String,
    /// Path to the `umount` executable.
    #[ortho_config(default = "umount".to_owned())]
    pub umount_bin: String,
    /// Path to the `blkid` executable.
    #[ortho_config(default = "blkid".to_owned())]
    pub blkid_bin: String,
    /// Mount table consulted to decide whether a path is mounted.
    #[ortho_config(default = "/proc/self/mounts".to_owned())]
    pub mounts_table: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to linvol.toml",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "invalid {} ({reason}): check {} or {} in linvol.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const TOKEN: FieldMetadata = FieldMetadata::new("Linode API token", "LINVOL_TOKEN", "token");
const MOUNT_ROOT: FieldMetadata =
    FieldMetadata::new("mount root", "LINVOL_MOUNT_ROOT", "mount_root");
const API_URL: FieldMetadata = FieldMetadata::new("API URL", "LINVOL_API_URL", "api_url");

/// Budgets for every bounded wait, derived from configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicies {
    /// Block device appearance.
    pub device: PollPolicy,
    /// Attach confirmation.
    pub attach: PollPolicy,
    /// Detach confirmation.
    pub detach: PollPolicy,
    /// In-flight event settlement.
    pub event: PollPolicy,
}

impl Default for WaitPolicies {
    fn default() -> Self {
        let remote = Duration::from_secs(2);
        Self {
            device: PollPolicy::new(Duration::from_secs(300), Duration::from_secs(1)),
            attach: PollPolicy::new(Duration::from_secs(300), remote),
            detach: PollPolicy::new(Duration::from_secs(180), remote),
            event: PollPolicy::new(Duration::from_secs(180), remote),
        }
    }
}

/// Settings consumed by the lifecycle facade.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DriverSettings {
    /// Directory under which volumes are mounted.
    pub mount_root: Utf8PathBuf,
    /// Whether volumes owned by other nodes may be taken over.
    pub force_attach: bool,
    /// Wait budgets.
    pub waits: WaitPolicies,
}

impl DriverSettings {
    /// Builds settings with default waits and force-attach disabled.
    #[must_use]
    pub fn new(mount_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            force_attach: false,
            waits: WaitPolicies::default(),
        }
    }

    /// Enables or disables force-attach.
    #[must_use]
    pub const fn force_attach(mut self, enabled: bool) -> Self {
        self.force_attach = enabled;
        self
    }

    /// Overrides the wait budgets.
    #[must_use]
    pub const fn waits(mut self, waits: WaitPolicies) -> Self {
        self.waits = waits;
        self
    }
}

impl DriverConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("linvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation of paths and wait budgets.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mount_root = self.mount_root.trim();
        if mount_root.is_empty() {
            return Err(MOUNT_ROOT.missing());
        }
        if !Utf8Path::new(mount_root).is_absolute() {
            return Err(MOUNT_ROOT.invalid("must be an absolute path"));
        }
        if self.api_url.trim().is_empty() {
            return Err(API_URL.missing());
        }
        for (value, field) in [
            (self.mkfs_bin.as_str(), "mkfs_bin"),
            (self.mount_bin.as_str(), "mount_bin"),
            (self.umount_bin.as_str(), "umount_bin"),
            (self.blkid_bin.as_str(), "blkid_bin"),
            (self.mounts_table.as_str(), "mounts_table"),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "missing {field}: set LINVOL_{} or add {field} to linvol.toml",
                    field.to_uppercase()
                )));
            }
        }
        for (value, field) in [
            (self.device_poll_millis, "device_poll_millis"),
            (self.remote_poll_millis, "remote_poll_millis"),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// Returns the API token.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no token is configured.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| TOKEN.missing())
    }

    /// Builds the wait budgets.
    #[must_use]
    pub const fn wait_policies(&self) -> WaitPolicies {
        let remote = Duration::from_millis(self.remote_poll_millis);
        WaitPolicies {
            device: PollPolicy::new(
                Duration::from_secs(self.device_wait_secs),
                Duration::from_millis(self.device_poll_millis),
            ),
            attach: PollPolicy::new(Duration::from_secs(self.attach_wait_secs), remote),
            detach: PollPolicy::new(Duration::from_secs(self.detach_wait_secs), remote),
            event: PollPolicy::new(Duration::from_secs(self.event_wait_secs), remote),
        }
    }

    /// Builds the facade settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn driver_settings(&self) -> Result<DriverSettings, ConfigError> {
        self.validate()?;
        Ok(DriverSettings::new(self.mount_root.trim())
            .force_attach(self.force_attach)
            .waits(self.wait_policies()))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
