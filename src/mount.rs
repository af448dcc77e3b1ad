//! Local side of the lifecycle: device wait, conditional format and mount.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::attach::Attacher;
use crate::error::VolumeError;
use crate::hostfs;
use crate::poll::{PollPolicy, WaitKind, wait_for};
use crate::provider::{Provider, Volume};
use crate::tags;
use crate::tools::LocalTools;

/// Rejects names that would escape the mount root or cannot be a directory.
///
/// # Errors
///
/// Returns [`VolumeError::InvalidName`] describing the problem.
pub fn validate_name(name: &str) -> Result<(), VolumeError> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if name == "." || name == ".." {
        Some("name must not be a relative directory reference")
    } else if name.contains('/') {
        Some("name must not contain '/'")
    } else if name.contains('\0') {
        Some("name must not contain NUL")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(VolumeError::InvalidName {
            name: name.to_owned(),
            reason: reason.to_owned(),
        }),
        None => Ok(()),
    }
}

/// Returns `root/name` after validating `name`.
///
/// # Errors
///
/// Returns [`VolumeError::InvalidName`] for unusable names.
pub fn mount_path(root: &Utf8Path, name: &str) -> Result<Utf8PathBuf, VolumeError> {
    validate_name(name)?;
    Ok(root.join(name))
}

/// Brings an attached volume's device to a mounted filesystem and back.
pub struct MountOrchestrator<'a, P: Provider + ?Sized, T: LocalTools + ?Sized> {
    attacher: Attacher<'a, P>,
    tools: &'a T,
    mount_root: &'a Utf8Path,
    device_wait: PollPolicy,
}

impl<'a, P: Provider + ?Sized, T: LocalTools + ?Sized> MountOrchestrator<'a, P, T> {
    /// Combines an attacher with local tools.
    pub const fn new(
        attacher: Attacher<'a, P>,
        tools: &'a T,
        mount_root: &'a Utf8Path,
        device_wait: PollPolicy,
    ) -> Self {
        Self {
            attacher,
            tools,
            mount_root,
            device_wait,
        }
    }

    /// Attaches `volume` here, formats it if blank and mounts it under the
    /// mount root. Returns the mount path.
    ///
    /// Safe to repeat: an existing filesystem is never reformatted and an
    /// existing mount is left alone.
    ///
    /// # Errors
    ///
    /// Returns any attachment error, [`VolumeError::DeviceTimeout`] when the
    /// device never appears, or [`VolumeError::LocalTool`] when a host tool
    /// fails.
    pub async fn prepare_and_mount(&self, volume: &Volume) -> Result<Utf8PathBuf, VolumeError> {
        let target = mount_path(self.mount_root, &volume.label)?;
        let attached = self.attacher.ensure_attached_to_self(&volume.id).await?;
        let device = attached
            .device_path
            .clone()
            .ok_or_else(|| VolumeError::MissingDevicePath {
                volume_id: attached.id.clone(),
            })?;

        self.wait_for_device(&device).await?;

        match self.tools.detect_filesystem(&device)? {
            Some(existing) => {
                info!(device = %device, filesystem = %existing, "device already formatted");
            }
            None => {
                let fs_type = tags::filesystem_for(&attached.tags)?;
                info!(device = %device, filesystem = %fs_type, "formatting blank device");
                self.tools.format(&device, &fs_type)?;
            }
        }

        hostfs::create_dir_all(&target)?;
        if self.tools.is_mounted(&target)? {
            info!(target = %target, "mount point already in use; skipping mount");
        } else {
            self.tools.mount(&device, &target)?;
            info!(device = %device, target = %target, "volume mounted");
        }
        Ok(target)
    }

    /// Unmounts `volume` if mounted here, then detaches it. The mount
    /// directory is left in place.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::LocalTool`] when unmounting fails, in which
    /// case no detach is requested, or any detach error.
    pub async fn release(&self, volume: &Volume) -> Result<Volume, VolumeError> {
        self.unmount_local(volume)?;
        self.attacher.ensure_detached(&volume.id).await
    }

    /// Unmounts `volume` if mounted here and detaches it from this node. A
    /// volume owned by another node is never detached.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::AttachConflict`] when another node owns the
    /// volume, [`VolumeError::LocalTool`] when unmounting fails, or any
    /// detach error.
    pub async fn unmount(&self, volume: &Volume) -> Result<Volume, VolumeError> {
        self.unmount_local(volume)?;
        self.attacher.detach_from_self(&volume.id).await
    }

    fn unmount_local(&self, volume: &Volume) -> Result<(), VolumeError> {
        let target = mount_path(self.mount_root, &volume.label)?;
        if self.tools.is_mounted(&target)? {
            self.tools.unmount(&target)?;
            info!(target = %target, "volume unmounted");
        }
        Ok(())
    }

    async fn wait_for_device(&self, device: &Utf8Path) -> Result<(), VolumeError> {
        wait_for(self.device_wait, WaitKind::DeviceReady, move || async move {
            hostfs::path_exists(device).unwrap_or_else(|err| {
                warn!(device = %device, error = %err, "failed to check device");
                false
            })
        })
        .await
        .map_err(|_| VolumeError::DeviceTimeout {
            device: device.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("db-data")]
    #[case("cache.v2")]
    #[case("...")]
    fn accepts_plain_names(#[case] name: &str) {
        assert_eq!(
            mount_path(Utf8Path::new("/mnt"), name).expect("valid"),
            Utf8PathBuf::from(format!("/mnt/{name}"))
        );
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("a/b")]
    #[case("../etc")]
    #[case("nul\0byte")]
    fn rejects_escaping_names(#[case] name: &str) {
        let err = validate_name(name).expect_err("rejected");
        assert!(matches!(err, VolumeError::InvalidName { .. }));
    }
}
