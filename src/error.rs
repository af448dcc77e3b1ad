//! Error taxonomy for volume lifecycle operations.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::{EventId, NodeId, ProviderError, VolumeId};
use crate::tools::LocalToolError;

/// Errors returned by the lifecycle facade and its components.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// Raised when credentials or node identity are missing or invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Raised when no volume carries the requested name.
    #[error("volume {name} not found")]
    NotFound {
        /// Name that was looked up.
        name: String,
    },
    /// Raised when several volumes carry the requested name.
    #[error("volume name {name} is ambiguous: matches {}", join_ids(.candidates))]
    AmbiguousName {
        /// Name that was looked up.
        name: String,
        /// Identifiers of every matching volume.
        candidates: Vec<VolumeId>,
    },
    /// Raised when another node owns the volume and force-attach is off.
    #[error("volume {volume_id} is attached to node {owner}; enable force_attach to take it over")]
    AttachConflict {
        /// Volume that could not be claimed.
        volume_id: VolumeId,
        /// Node currently owning the volume.
        owner: NodeId,
    },
    /// Raised when the provider never reports this node as owner.
    #[error("timed out waiting for volume {volume_id} to attach to node {node_id}")]
    AttachTimeout {
        /// Volume being attached.
        volume_id: VolumeId,
        /// Node the volume was attached to.
        node_id: NodeId,
    },
    /// Raised when the provider never reports the volume as detached.
    #[error("timed out waiting for volume {volume_id} to detach")]
    DetachTimeout {
        /// Volume being detached.
        volume_id: VolumeId,
    },
    /// Raised when the block device never appears locally.
    #[error("timed out waiting for device {device} to appear")]
    DeviceTimeout {
        /// Device path that was expected.
        device: Utf8PathBuf,
    },
    /// Raised when an in-flight attach or detach does not settle.
    #[error("timed out waiting for event {event_id} on volume {volume_id} to settle")]
    EventDrainTimeout {
        /// Volume the event is scoped to.
        volume_id: VolumeId,
        /// Event that stayed in flight.
        event_id: EventId,
    },
    /// Raised when the attached volume exposes no block device path.
    #[error("volume {volume_id} reports no block device path")]
    MissingDevicePath {
        /// Volume lacking a device path.
        volume_id: VolumeId,
    },
    /// Raised when a caller-facing name is unusable as a mount directory.
    #[error("invalid volume name {name:?}: {reason}")]
    InvalidName {
        /// Rejected name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },
    /// Raised when a create option or stored tag cannot be used.
    #[error("invalid option {option}: {reason}")]
    InvalidOption {
        /// Option key or tag.
        option: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Wrapper for outright provider failures.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Wrapper for failed format, mount or unmount commands.
    #[error(transparent)]
    LocalTool(#[from] LocalToolError),
    /// Raised when a local filesystem call fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
}

fn join_ids(ids: &[VolumeId]) -> String {
    ids.iter()
        .map(VolumeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
