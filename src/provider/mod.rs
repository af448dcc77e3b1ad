//! Abstraction over the cloud block-storage API.
//!
//! The lifecycle core only talks to the provider through [`Provider`], so the
//! HTTP client in [`crate::linode`] and the in-memory double in
//! [`crate::test_support`] are interchangeable.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

mod error;
mod types;

pub use error::ProviderError;
pub use types::{
    EntityKind, EventAction, EventId, EventStatus, LifecycleEvent, Node, NodeId, Volume,
    VolumeFilter, VolumeId, VolumeSpec,
};

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Operations the lifecycle manager needs from the block-storage API.
///
/// Attach and detach only *request* a transition; completion is observed by
/// re-reading the volume.
pub trait Provider: Send + Sync {
    /// Lists volumes matching `filter`.
    fn find_volumes<'a>(&'a self, filter: &'a VolumeFilter) -> ProviderFuture<'a, Vec<Volume>>;

    /// Creates a detached volume.
    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> ProviderFuture<'a, Volume>;

    /// Deletes a volume.
    fn delete_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ()>;

    /// Requests attachment of a volume to `node`.
    fn attach_volume<'a>(&'a self, id: &'a VolumeId, node: &'a NodeId) -> ProviderFuture<'a, ()>;

    /// Requests detachment of a volume from its current owner.
    fn detach_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ()>;

    /// Fetches the current record of a volume.
    fn get_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, Volume>;

    /// Lists nodes, optionally restricted to an exact label.
    fn list_instances<'a>(&'a self, label: Option<&'a str>) -> ProviderFuture<'a, Vec<Node>>;

    /// Lists every network address assigned to a node.
    fn instance_addresses<'a>(&'a self, node: &'a NodeId) -> ProviderFuture<'a, Vec<IpAddr>>;

    /// Lists events scoped to an entity, newest first.
    fn list_events<'a>(
        &'a self,
        kind: EntityKind,
        entity_id: &'a str,
    ) -> ProviderFuture<'a, Vec<LifecycleEvent>>;

    /// Fetches a single event.
    fn get_event<'a>(&'a self, id: &'a EventId) -> ProviderFuture<'a, LifecycleEvent>;
}
