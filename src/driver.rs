//! Lifecycle facade: the operations a storage orchestrator calls by volume
//! name.
//!
//! Mutating operations (create, remove, mount, unmount) are serialised by a
//! single process-wide lock, so at most one of them is reconciling remote and
//! local state at any time. Read-only operations never take the lock.

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::attach::Attacher;
use crate::config::DriverSettings;
use crate::error::VolumeError;
use crate::identity::NodeIdentity;
use crate::mount::{MountOrchestrator, mount_path, validate_name};
use crate::provider::{Provider, Volume, VolumeSpec};
use crate::resolve::Resolver;
use crate::tags;
use crate::tools::LocalTools;

const GIB: u64 = 1024 * 1024 * 1024;

/// Options accepted by [`VolumeDriver::create`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateOptions {
    /// Requested size in gigabytes; `None` leaves the provider default.
    pub size_gb: Option<u64>,
    /// Filesystem to create on first mount.
    pub filesystem: Option<String>,
    /// Delete the remote volume when it is removed.
    pub delete_on_remove: bool,
}

impl CreateOptions {
    /// Parses `key=value` options. Unknown keys are logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidOption`] when a known key carries an
    /// unusable value.
    pub fn parse<'a, I>(options: I) -> Result<Self, VolumeError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut parsed = Self::default();
        for (key, value) in options {
            match key {
                "size" => {
                    let size = value.trim().parse::<u64>().map_err(|_| invalid(
                        key,
                        format!("{value:?} is not a whole number of gigabytes"),
                    ))?;
                    parsed.size_gb = Some(size);
                }
                "filesystem" => {
                    let fs_type = value.trim();
                    tags::validate_filesystem(fs_type)?;
                    parsed.filesystem = Some(fs_type.to_owned());
                }
                "delete-on-remove" => {
                    parsed.delete_on_remove = parse_bool(value)
                        .ok_or_else(|| invalid(key, format!("{value:?} is not a boolean")))?;
                }
                other => warn!(option = other, "ignoring unknown create option"),
            }
        }
        Ok(parsed)
    }

    /// Tags recording these options on the remote volume.
    #[must_use]
    pub fn tags(&self) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();
        if let Some(fs_type) = self.filesystem.as_deref() {
            tags.insert(tags::filesystem_tag(fs_type));
        }
        if self.delete_on_remove {
            tags.insert(tags::DELETE_ON_REMOVE_TAG.to_owned());
        }
        tags
    }
}

fn invalid(option: &str, reason: String) -> VolumeError {
    VolumeError::InvalidOption {
        option: option.to_owned(),
        reason,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Read-only description of a volume as reported to callers.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumeInfo {
    /// Caller-facing name.
    pub name: String,
    /// Where the volume is (or would be) mounted on this node.
    pub mountpoint: String,
    /// Provider creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Provider-side details.
    pub status: VolumeStatus,
}

/// Provider-side details included in [`VolumeInfo`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumeStatus {
    /// Provider identifier.
    pub volume_id: String,
    /// Region hosting the volume.
    pub region: String,
    /// Capacity in gigabytes, rounded down.
    pub size_gb: u64,
    /// Owning node, if attached.
    pub attached_to: Option<String>,
    /// Tags on the volume.
    pub tags: BTreeSet<String>,
}

impl VolumeInfo {
    fn describe(volume: &Volume, mountpoint: Utf8PathBuf) -> Self {
        Self {
            name: volume.label.clone(),
            mountpoint: mountpoint.into_string(),
            created_at: volume.created.clone(),
            status: VolumeStatus {
                volume_id: volume.id.to_string(),
                region: volume.region.clone(),
                size_gb: volume.size_bytes / GIB,
                attached_to: volume.owner.as_ref().map(ToString::to_string),
                tags: volume.tags.clone(),
            },
        }
    }
}

/// Scope advertised to the orchestrator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Volumes are visible cluster-wide.
    Global,
}

/// Static capabilities descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Capabilities {
    /// Visibility of volumes.
    pub scope: Scope,
}

/// Returns the static capabilities descriptor. Needs no provider access.
#[must_use]
pub const fn capabilities() -> Capabilities {
    Capabilities {
        scope: Scope::Global,
    }
}

/// Volume lifecycle manager for one node.
pub struct VolumeDriver<P, T> {
    provider: P,
    tools: T,
    identity: NodeIdentity,
    settings: DriverSettings,
    guard: Mutex<()>,
}

impl<P: Provider, T: LocalTools> VolumeDriver<P, T> {
    /// Wires the facade to its collaborators.
    pub fn new(provider: P, tools: T, identity: NodeIdentity, settings: DriverSettings) -> Self {
        Self {
            provider,
            tools,
            identity,
            settings,
            guard: Mutex::new(()),
        }
    }

    /// Identity of the node this driver acts for.
    pub const fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    fn resolver(&self) -> Resolver<'_, P> {
        Resolver::new(&self.provider, Some(self.identity.region.as_str()))
    }

    fn orchestrator(&self) -> MountOrchestrator<'_, P, T> {
        let attacher = Attacher::new(
            &self.provider,
            &self.identity.node_id,
            &self.settings.waits,
        )
        .force_attach(self.settings.force_attach);
        MountOrchestrator::new(
            attacher,
            &self.tools,
            &self.settings.mount_root,
            self.settings.waits.device,
        )
    }

    /// Creates a detached volume named `name` in this node's region. An
    /// existing volume with that name is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidName`] or [`VolumeError::InvalidOption`]
    /// for bad input and [`VolumeError::Provider`] when creation fails.
    pub async fn create(
        &self,
        name: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<VolumeInfo, VolumeError> {
        validate_name(name)?;
        let parsed = CreateOptions::parse(
            options
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        )?;
        let _serialised = self.guard.lock().await;

        if let Some(existing) = self.resolver().find(name).await? {
            info!(name, volume_id = %existing.id, "volume already exists");
            return Ok(self.describe(&existing));
        }

        let spec = VolumeSpec {
            label: name.to_owned(),
            region: self.identity.region.clone(),
            size_bytes: parsed.size_gb.map(|size| size.saturating_mul(GIB)),
            tags: parsed.tags(),
        };
        let volume = self.provider.create_volume(&spec).await?;
        info!(name, volume_id = %volume.id, region = %volume.region, "volume created");
        Ok(self.describe(&volume))
    }

    /// Detaches `name` (unmounting it here first if needed) and deletes it
    /// when it carries the delete-on-remove tag.
    ///
    /// # Errors
    ///
    /// Returns resolver, detach and provider errors.
    pub async fn remove(&self, name: &str) -> Result<(), VolumeError> {
        validate_name(name)?;
        let _serialised = self.guard.lock().await;

        let volume = self.resolver().resolve(name).await?;
        let detached = self.orchestrator().release(&volume).await?;
        if tags::deletes_on_remove(&detached.tags) {
            self.provider.delete_volume(&detached.id).await?;
            info!(name, volume_id = %detached.id, "volume deleted");
        } else {
            info!(name, volume_id = %detached.id, "volume detached and retained");
        }
        Ok(())
    }

    /// Attaches, formats if blank, and mounts `name`. Returns the mount path.
    ///
    /// # Errors
    ///
    /// Returns resolver, attachment, device and local tool errors.
    pub async fn mount(&self, name: &str) -> Result<Utf8PathBuf, VolumeError> {
        validate_name(name)?;
        let _serialised = self.guard.lock().await;

        let volume = self.resolver().resolve(name).await?;
        self.orchestrator().prepare_and_mount(&volume).await
    }

    /// Unmounts `name` and detaches it from this node.
    ///
    /// # Errors
    ///
    /// Returns resolver, local tool and detach errors, or
    /// [`VolumeError::AttachConflict`] when another node owns the volume.
    pub async fn unmount(&self, name: &str) -> Result<(), VolumeError> {
        validate_name(name)?;
        let _serialised = self.guard.lock().await;

        let volume = self.resolver().resolve(name).await?;
        self.orchestrator().unmount(&volume).await.map(|_| ())
    }

    /// Describes `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotFound`] for unknown names.
    pub async fn get(&self, name: &str) -> Result<VolumeInfo, VolumeError> {
        validate_name(name)?;
        let volume = self.resolver().resolve(name).await?;
        Ok(self.describe(&volume))
    }

    /// Describes every volume in this node's region.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the listing fails.
    pub async fn list(&self) -> Result<Vec<VolumeInfo>, VolumeError> {
        Ok(self
            .resolver()
            .list()
            .await?
            .iter()
            .map(|volume| self.describe(volume))
            .collect())
    }

    /// Returns the mount path for `name` without contacting the provider.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidName`] for unusable names.
    pub fn path(&self, name: &str) -> Result<Utf8PathBuf, VolumeError> {
        mount_path(&self.settings.mount_root, name)
    }

    fn describe(&self, volume: &Volume) -> VolumeInfo {
        let mountpoint = mount_path(&self.settings.mount_root, &volume.label)
            .unwrap_or_else(|_| self.settings.mount_root.clone());
        VolumeInfo::describe(volume, mountpoint)
    }
}
