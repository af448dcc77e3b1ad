//! Remote entities exchanged with the block-storage provider.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;

use camino::Utf8PathBuf;

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(String);

        impl $name {
            /// Wraps a provider identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

newtype!(
    /// Stable provider identifier of a volume.
    VolumeId
);
newtype!(
    /// Stable provider identifier of a compute node.
    NodeId
);
newtype!(
    /// Provider identifier of a lifecycle event.
    EventId
);

/// Remote block-storage volume as last observed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Provider identifier.
    pub id: VolumeId,
    /// Caller-facing name, unique within a region.
    pub label: String,
    /// Region hosting the volume.
    pub region: String,
    /// Capacity in bytes.
    pub size_bytes: u64,
    /// Node currently owning the volume; `None` when detached.
    pub owner: Option<NodeId>,
    /// Block device path exposed once attached.
    pub device_path: Option<Utf8PathBuf>,
    /// Caller metadata such as the desired filesystem.
    pub tags: BTreeSet<String>,
    /// Provider creation timestamp, when reported.
    pub created: Option<String>,
}

impl Volume {
    /// Returns `true` when the volume carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Compute node that can own volumes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node {
    /// Provider identifier.
    pub id: NodeId,
    /// Hostname or configured label.
    pub label: String,
    /// Region hosting the node.
    pub region: String,
}

/// Lifecycle action recorded by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EventAction {
    /// Volume attached to a node.
    Attach,
    /// Volume detached from a node.
    Detach,
    /// Any other action, kept verbatim.
    Other(String),
}

impl EventAction {
    /// Returns `true` for actions that change volume ownership.
    #[must_use]
    pub const fn is_ownership_change(&self) -> bool {
        matches!(self, Self::Attach | Self::Detach)
    }
}

/// Progress of a lifecycle event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventStatus {
    /// Accepted but not yet started.
    Scheduled,
    /// In progress.
    Started,
    /// Completed successfully.
    Finished,
    /// Completed unsuccessfully.
    Failed,
    /// Informational statuses such as notifications.
    Other,
}

impl EventStatus {
    /// Returns `true` while the provider is still working on the event.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Scheduled | Self::Started)
    }

    /// Returns `true` once the event reached a terminal status.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Kind of entity an event is scoped to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityKind {
    /// Block-storage volume.
    Volume,
    /// Compute node.
    Node,
}

impl EntityKind {
    /// Provider-facing entity type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Node => "linode",
        }
    }
}

/// Append-only lifecycle record for an entity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LifecycleEvent {
    /// Provider identifier.
    pub id: EventId,
    /// Action performed.
    pub action: EventAction,
    /// Current status.
    pub status: EventStatus,
    /// Entity type the event is scoped to.
    pub entity_type: String,
    /// Entity identifier the event is scoped to.
    pub entity_id: String,
    /// Provider creation timestamp.
    pub created: String,
}

/// Filter applied when searching for volumes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeFilter {
    /// Exact label to match.
    pub label: Option<String>,
    /// Region to restrict the search to.
    pub region: Option<String>,
}

impl VolumeFilter {
    /// Matches volumes with `label`, optionally within `region`.
    #[must_use]
    pub fn labelled(label: &str, region: Option<&str>) -> Self {
        Self {
            label: Some(label.to_owned()),
            region: region.map(str::to_owned),
        }
    }

    /// Matches every volume, optionally within `region`.
    #[must_use]
    pub fn in_region(region: Option<&str>) -> Self {
        Self {
            label: None,
            region: region.map(str::to_owned),
        }
    }

    /// Returns `true` when `volume` satisfies every populated field.
    #[must_use]
    pub fn matches(&self, volume: &Volume) -> bool {
        self.label.as_deref().is_none_or(|label| volume.label == label)
            && self
                .region
                .as_deref()
                .is_none_or(|region| volume.region == region)
    }
}

/// Parameters for creating a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSpec {
    /// Caller-facing name.
    pub label: String,
    /// Region to create the volume in.
    pub region: String,
    /// Requested capacity; `None` lets the provider choose its default.
    pub size_bytes: Option<u64>,
    /// Tags recording caller metadata.
    pub tags: BTreeSet<String>,
}
