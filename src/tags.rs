//! Volume tag encoding for caller metadata.
//!
//! Tags are the only place the provider lets us persist per-volume settings,
//! so the desired filesystem and the delete-on-remove flag live there.

use std::collections::BTreeSet;

use crate::error::VolumeError;

/// Filesystem used when a volume carries no filesystem tag.
pub const DEFAULT_FILESYSTEM: &str = "ext4";

/// Prefix of the tag naming the filesystem to create.
pub const FILESYSTEM_TAG_PREFIX: &str = "filesystem-";

/// Tag marking a volume for deletion on remove.
pub const DELETE_ON_REMOVE_TAG: &str = "delete-on-remove";

const LEGACY_FILESYSTEM_TAG_PREFIX: &str = "docker-volume-filesystem-";
const LEGACY_DELETE_ON_REMOVE_TAG: &str = "docker-volume-delete-on-remove";

/// Builds the tag recording `fs_type`.
#[must_use]
pub fn filesystem_tag(fs_type: &str) -> String {
    format!("{FILESYSTEM_TAG_PREFIX}{fs_type}")
}

/// Rejects filesystem names that are not plain alphanumeric tokens, since the
/// value ends up as an argument to `mkfs -t`.
///
/// # Errors
///
/// Returns [`VolumeError::InvalidOption`] for empty or non-alphanumeric names.
pub fn validate_filesystem(fs_type: &str) -> Result<(), VolumeError> {
    if fs_type.is_empty() || !fs_type.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(VolumeError::InvalidOption {
            option: String::from("filesystem"),
            reason: format!("{fs_type:?} is not a filesystem type"),
        });
    }
    Ok(())
}

/// Returns the filesystem recorded in `tags`, or [`DEFAULT_FILESYSTEM`].
///
/// # Errors
///
/// Returns [`VolumeError::InvalidOption`] when the recorded type is unusable.
pub fn filesystem_for(tags: &BTreeSet<String>) -> Result<String, VolumeError> {
    let recorded = tags.iter().find_map(|tag| {
        tag.strip_prefix(FILESYSTEM_TAG_PREFIX)
            .or_else(|| tag.strip_prefix(LEGACY_FILESYSTEM_TAG_PREFIX))
    });
    match recorded {
        Some(fs_type) => {
            validate_filesystem(fs_type)?;
            Ok(fs_type.to_owned())
        }
        None => Ok(DEFAULT_FILESYSTEM.to_owned()),
    }
}

/// Returns `true` when the volume should be deleted on remove.
#[must_use]
pub fn deletes_on_remove(tags: &BTreeSet<String>) -> bool {
    tags.contains(DELETE_ON_REMOVE_TAG) || tags.contains(LEGACY_DELETE_ON_REMOVE_TAG)
}
