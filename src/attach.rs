//! Attachment state machine: moves a volume between nodes and confirms each
//! transition by observation.
//!
//! Attach and detach requests return before the provider has acted, so every
//! request is followed by a bounded poll on the volume record. Requests are
//! never retried; only their confirmation is.

use tracing::{info, warn};

use crate::config::WaitPolicies;
use crate::error::VolumeError;
use crate::events::EventLog;
use crate::poll::{PollPolicy, WaitKind, WaitTimeout, poll_until};
use crate::provider::{EventAction, NodeId, Provider, Volume, VolumeId};

/// Observed attachment of a volume relative to this node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Attachment {
    /// No node owns the volume.
    Detached,
    /// This node owns the volume.
    AttachedToSelf,
    /// Another node owns the volume.
    AttachedToOther(NodeId),
    /// An attach or detach is in progress.
    Busy,
}

impl Attachment {
    fn from_owner(owner: Option<&NodeId>, node: &NodeId) -> Self {
        match owner {
            None => Self::Detached,
            Some(owner) if owner == node => Self::AttachedToSelf,
            Some(owner) => Self::AttachedToOther(owner.clone()),
        }
    }
}

/// Drives attach and detach transitions on behalf of one node.
pub struct Attacher<'a, P: Provider + ?Sized> {
    provider: &'a P,
    node: &'a NodeId,
    waits: &'a WaitPolicies,
    force_attach: bool,
}

impl<'a, P: Provider + ?Sized> Attacher<'a, P> {
    /// Creates an attacher for `node` with force-attach disabled.
    pub const fn new(provider: &'a P, node: &'a NodeId, waits: &'a WaitPolicies) -> Self {
        Self {
            provider,
            node,
            waits,
            force_attach: false,
        }
    }

    /// Allows volumes owned by other nodes to be detached and taken over.
    #[must_use]
    pub const fn force_attach(mut self, enabled: bool) -> Self {
        self.force_attach = enabled;
        self
    }

    /// Classifies `volume` relative to this node, consulting the event log
    /// to spot in-flight transitions.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the event log cannot be read.
    pub async fn observe(&self, volume: &Volume) -> Result<Attachment, VolumeError> {
        let events = EventLog::new(self.provider);
        let state = match Attachment::from_owner(volume.owner.as_ref(), self.node) {
            Attachment::AttachedToOther(owner) => {
                if events.is_detaching(&volume.id).await? {
                    Attachment::Busy
                } else {
                    Attachment::AttachedToOther(owner)
                }
            }
            Attachment::Detached => {
                let attaching = events
                    .in_flight(&volume.id)
                    .await?
                    .is_some_and(|event| event.action == EventAction::Attach);
                if attaching {
                    Attachment::Busy
                } else {
                    Attachment::Detached
                }
            }
            Attachment::AttachedToSelf => {
                let detaching = events
                    .in_flight(&volume.id)
                    .await?
                    .is_some_and(|event| event.action == EventAction::Detach);
                if detaching {
                    Attachment::Busy
                } else {
                    Attachment::AttachedToSelf
                }
            }
            Attachment::Busy => Attachment::Busy,
        };
        Ok(state)
    }

    /// Makes this node the owner of `volume_id` and returns the confirmed
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::AttachConflict`] when another node owns the
    /// volume and force-attach is off, a timeout variant when a transition is
    /// not confirmed in time, or [`VolumeError::Provider`] when a request
    /// fails.
    pub async fn ensure_attached_to_self(
        &self,
        volume_id: &VolumeId,
    ) -> Result<Volume, VolumeError> {
        let mut volume = self.provider.get_volume(volume_id).await?;
        let mut state = self.observe(&volume).await?;

        if state == Attachment::Busy {
            volume = self.settle(volume_id).await?;
            state = Attachment::from_owner(volume.owner.as_ref(), self.node);
        }

        match state {
            Attachment::AttachedToSelf => {
                info!(volume_id = %volume_id, node_id = %self.node, "volume already attached to this node");
                Ok(volume)
            }
            Attachment::AttachedToOther(owner) if !self.force_attach => {
                Err(VolumeError::AttachConflict {
                    volume_id: volume_id.clone(),
                    owner,
                })
            }
            Attachment::AttachedToOther(owner) => {
                warn!(
                    volume_id = %volume_id,
                    owner = %owner,
                    node_id = %self.node,
                    "force-attach enabled; detaching volume from its current owner"
                );
                self.detach_and_confirm(volume_id).await?;
                self.attach_and_confirm(volume_id).await
            }
            Attachment::Detached | Attachment::Busy => self.attach_and_confirm(volume_id).await,
        }
    }

    /// Ensures no node owns `volume_id` and returns the confirmed record.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::DetachTimeout`] when the detach is not
    /// confirmed in time or [`VolumeError::Provider`] when a request fails.
    pub async fn ensure_detached(&self, volume_id: &VolumeId) -> Result<Volume, VolumeError> {
        let volume = self.provider.get_volume(volume_id).await?;
        match volume.owner {
            None => Ok(volume),
            Some(_) => self.detach_and_confirm(volume_id).await,
        }
    }

    /// Detaches `volume_id` from this node and returns the confirmed record.
    /// A detach already in flight is confirmed rather than requested again.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::AttachConflict`] without any detach request
    /// when another node owns the volume, [`VolumeError::DetachTimeout`] when
    /// the detach is not confirmed in time or [`VolumeError::Provider`] when
    /// a request fails.
    pub async fn detach_from_self(&self, volume_id: &VolumeId) -> Result<Volume, VolumeError> {
        let volume = self.provider.get_volume(volume_id).await?;
        match volume.owner {
            None => Ok(volume),
            Some(ref owner) if owner != self.node => Err(VolumeError::AttachConflict {
                volume_id: volume_id.clone(),
                owner: owner.clone(),
            }),
            Some(_) => {
                let pending = EventLog::new(self.provider)
                    .in_flight(volume_id)
                    .await?
                    .is_some_and(|event| event.action == EventAction::Detach);
                if pending {
                    info!(volume_id = %volume_id, "detach already in flight; confirming");
                    self.confirm_owner(volume_id, None, self.waits.detach, WaitKind::DetachConfirm)
                        .await
                        .map_err(|_| VolumeError::DetachTimeout {
                            volume_id: volume_id.clone(),
                        })
                } else {
                    self.detach_and_confirm(volume_id).await
                }
            }
        }
    }

    /// Waits out an in-flight transition and returns the fresh record. A
    /// detach from another node that settled in the event log but not yet in
    /// the volume record is also waited out.
    async fn settle(&self, volume_id: &VolumeId) -> Result<Volume, VolumeError> {
        let events = EventLog::new(self.provider);
        events.wait_for_owner_change(volume_id, self.waits).await?;

        let volume = self.provider.get_volume(volume_id).await?;
        let owned_elsewhere = volume.owner.as_ref().is_some_and(|owner| owner != self.node);
        if owned_elsewhere && events.is_detaching(volume_id).await? {
            info!(volume_id = %volume_id, "waiting for previous owner to release volume");
            return self
                .confirm_owner(volume_id, None, self.waits.detach, WaitKind::DetachConfirm)
                .await
                .map_err(|_| VolumeError::DetachTimeout {
                    volume_id: volume_id.clone(),
                });
        }
        Ok(volume)
    }

    async fn attach_and_confirm(&self, volume_id: &VolumeId) -> Result<Volume, VolumeError> {
        info!(volume_id = %volume_id, node_id = %self.node, "attaching volume");
        self.provider.attach_volume(volume_id, self.node).await?;
        let volume = self
            .confirm_owner(
                volume_id,
                Some(self.node),
                self.waits.attach,
                WaitKind::AttachConfirm,
            )
            .await
            .map_err(|_| VolumeError::AttachTimeout {
                volume_id: volume_id.clone(),
                node_id: self.node.clone(),
            })?;
        info!(volume_id = %volume_id, node_id = %self.node, "attach confirmed");
        Ok(volume)
    }

    async fn detach_and_confirm(&self, volume_id: &VolumeId) -> Result<Volume, VolumeError> {
        info!(volume_id = %volume_id, "detaching volume");
        self.provider.detach_volume(volume_id).await?;
        let volume = self
            .confirm_owner(volume_id, None, self.waits.detach, WaitKind::DetachConfirm)
            .await
            .map_err(|_| VolumeError::DetachTimeout {
                volume_id: volume_id.clone(),
            })?;
        info!(volume_id = %volume_id, "detach confirmed");
        Ok(volume)
    }

    async fn confirm_owner(
        &self,
        volume_id: &VolumeId,
        expected: Option<&NodeId>,
        policy: PollPolicy,
        kind: WaitKind,
    ) -> Result<Volume, WaitTimeout> {
        let provider = self.provider;
        poll_until(policy, kind, move || async move {
            match provider.get_volume(volume_id).await {
                Ok(volume) => (volume.owner.as_ref() == expected).then_some(volume),
                Err(err) => {
                    warn!(volume_id = %volume_id, wait = %kind, error = %err, "failed to observe volume");
                    None
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::provider::EventStatus;
    use crate::test_support::{Delay, FakeProvider, Transition, VolumeBuilder};

    const SELF_NODE: &str = "node-a";

    #[fixture]
    fn node() -> NodeId {
        NodeId::from(SELF_NODE)
    }

    fn short_waits() -> WaitPolicies {
        let policy = PollPolicy::new(Duration::from_secs(20), Duration::from_secs(2));
        WaitPolicies {
            device: policy,
            attach: policy,
            detach: policy,
            event: policy,
        }
    }

    #[rstest]
    #[case::detached(None, &[], Attachment::Detached)]
    #[case::mine(Some(SELF_NODE), &[], Attachment::AttachedToSelf)]
    #[case::mine_detaching(Some(SELF_NODE), &[(EventAction::Detach, EventStatus::Started)], Attachment::Busy)]
    #[case::mine_after_settled_detach(Some(SELF_NODE), &[(EventAction::Detach, EventStatus::Finished)], Attachment::AttachedToSelf)]
    #[case::other(Some("node-b"), &[(EventAction::Attach, EventStatus::Finished)], Attachment::AttachedToOther(NodeId::from("node-b")))]
    #[case::other_detaching(Some("node-b"), &[(EventAction::Detach, EventStatus::Started)], Attachment::Busy)]
    #[case::attach_in_flight(None, &[(EventAction::Attach, EventStatus::Scheduled)], Attachment::Busy)]
    #[case::failed_attach(None, &[(EventAction::Attach, EventStatus::Failed)], Attachment::Detached)]
    #[tokio::test]
    async fn observe_classifies_volume(
        node: NodeId,
        #[case] owner: Option<&str>,
        #[case] events: &[(EventAction, EventStatus)],
        #[case] expected: Attachment,
    ) {
        let provider = FakeProvider::new();
        let mut builder = VolumeBuilder::new("5", "db-data");
        if let Some(owner) = owner {
            builder = builder.owner(owner);
        }
        let id = provider.insert_volume(builder.build());
        for (action, status) in events {
            provider.push_event(&id, action.clone(), *status);
        }
        let volume = provider.volume(&id);
        let waits = WaitPolicies::default();

        let state = Attacher::new(&provider, &node, &waits)
            .observe(&volume)
            .await
            .expect("observe");

        assert_eq!(state, expected);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn detached_volume_is_attached_and_confirmed(node: NodeId) {
        let provider = FakeProvider::new();
        provider.set_attach_delay(Delay::Ticks(3));
        let id = provider.insert_volume(VolumeBuilder::new("5", "db-data").build());
        let waits = short_waits();

        let volume = Attacher::new(&provider, &node, &waits)
            .ensure_attached_to_self(&id)
            .await
            .expect("attach");

        assert_eq!(volume.owner.as_ref(), Some(&node));
        assert!(volume.device_path.is_some());
        assert_eq!(provider.attach_calls(), vec![(id, node)]);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn volume_owned_by_self_needs_no_calls(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("5", "db-data").owner(SELF_NODE).build());
        let waits = short_waits();
        let attacher = Attacher::new(&provider, &node, &waits);

        attacher.ensure_attached_to_self(&id).await.expect("first");
        attacher.ensure_attached_to_self(&id).await.expect("second");

        assert!(provider.attach_calls().is_empty());
        assert!(provider.detach_calls().is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn foreign_owner_conflicts_without_force(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("6", "cache").owner("node-b").build());
        let waits = short_waits();

        let err = Attacher::new(&provider, &node, &waits)
            .ensure_attached_to_self(&id)
            .await
            .expect_err("conflict");

        match err {
            VolumeError::AttachConflict { owner, .. } => assert_eq!(owner.as_str(), "node-b"),
            other => panic!("expected AttachConflict, got {other:?}"),
        }
        assert!(provider.attach_calls().is_empty());
        assert!(provider.detach_calls().is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn force_attach_detaches_then_attaches(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("6", "cache").owner("node-b").build());
        let waits = short_waits();

        let volume = Attacher::new(&provider, &node, &waits)
            .force_attach(true)
            .ensure_attached_to_self(&id)
            .await
            .expect("takeover");

        assert_eq!(volume.owner.as_ref(), Some(&node));
        assert_eq!(provider.detach_calls(), vec![id.clone()]);
        assert_eq!(provider.attach_calls(), vec![(id, node)]);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn busy_detach_is_waited_out_before_attach(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("9", "logs").owner("node-b").build());
        provider.begin_transition(&id, Transition::detach().after(4));
        let waits = short_waits();

        let volume = Attacher::new(&provider, &node, &waits)
            .ensure_attached_to_self(&id)
            .await
            .expect("attach after detach settles");

        assert_eq!(volume.owner.as_ref(), Some(&node));
        assert!(provider.detach_calls().is_empty());
        assert_eq!(provider.attach_calls().len(), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn own_volume_mid_detach_is_reattached(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("5", "db-data").owner(SELF_NODE).build());
        provider.begin_transition(&id, Transition::detach().after(3));
        let waits = short_waits();

        let volume = Attacher::new(&provider, &node, &waits)
            .ensure_attached_to_self(&id)
            .await
            .expect("reattach after detach lands");

        assert_eq!(volume.owner.as_ref(), Some(&node));
        assert_eq!(provider.volume(&id).owner.as_ref(), Some(&node));
        assert!(provider.get_event_calls() >= 1);
        assert!(provider.detach_calls().is_empty());
        assert_eq!(provider.attach_calls(), vec![(id, node)]);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn detach_from_self_refuses_foreign_owner(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("6", "cache").owner("node-b").build());
        let waits = short_waits();

        let err = Attacher::new(&provider, &node, &waits)
            .detach_from_self(&id)
            .await
            .expect_err("foreign owner");

        assert!(matches!(err, VolumeError::AttachConflict { ref owner, .. } if owner.as_str() == "node-b"));
        assert!(provider.detach_calls().is_empty());
        assert_eq!(provider.volume(&id).owner, Some(NodeId::from("node-b")));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn detach_from_self_confirms_detach_already_in_flight(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("5", "db-data").owner(SELF_NODE).build());
        provider.begin_transition(&id, Transition::detach().after(3));
        let waits = short_waits();

        let volume = Attacher::new(&provider, &node, &waits)
            .detach_from_self(&id)
            .await
            .expect("in-flight detach confirmed");

        assert_eq!(volume.owner, None);
        assert!(provider.detach_calls().is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn detach_from_self_detaches_own_volume(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("5", "db-data").owner(SELF_NODE).build());
        let waits = short_waits();

        let volume = Attacher::new(&provider, &node, &waits)
            .detach_from_self(&id)
            .await
            .expect("detached");

        assert_eq!(volume.owner, None);
        assert_eq!(provider.detach_calls(), vec![id]);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn unconfirmed_attach_times_out(node: NodeId) {
        let provider = FakeProvider::new();
        provider.set_attach_delay(Delay::Never);
        let id = provider.insert_volume(VolumeBuilder::new("5", "db-data").build());
        let waits = short_waits();

        let err = Attacher::new(&provider, &node, &waits)
            .ensure_attached_to_self(&id)
            .await
            .expect_err("attach never confirms");

        assert!(matches!(err, VolumeError::AttachTimeout { .. }));
        assert_eq!(provider.attach_calls().len(), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn unconfirmed_detach_times_out(node: NodeId) {
        let provider = FakeProvider::new();
        provider.set_detach_delay(Delay::Never);
        let id = provider.insert_volume(VolumeBuilder::new("5", "db-data").owner(SELF_NODE).build());
        let waits = short_waits();

        let err = Attacher::new(&provider, &node, &waits)
            .ensure_detached(&id)
            .await
            .expect_err("detach never confirms");

        assert!(matches!(err, VolumeError::DetachTimeout { .. }));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn ensure_detached_is_a_no_op_for_detached_volume(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("5", "db-data").build());
        let waits = short_waits();

        let volume = Attacher::new(&provider, &node, &waits)
            .ensure_detached(&id)
            .await
            .expect("detached");

        assert_eq!(volume.owner, None);
        assert!(provider.detach_calls().is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn attach_request_failure_surfaces_provider_error(node: NodeId) {
        let provider = FakeProvider::new();
        let id = provider.insert_volume(VolumeBuilder::new("5", "db-data").build());
        provider.fail_next("attach_volume", 400, "Volume is busy");
        let waits = short_waits();

        let err = Attacher::new(&provider, &node, &waits)
            .ensure_attached_to_self(&id)
            .await
            .expect_err("attach rejected");

        match err {
            VolumeError::Provider(inner) => {
                assert_eq!(inner.status, Some(400));
                assert_eq!(inner.message, "Volume is busy");
            }
            other => panic!("expected Provider error, got {other:?}"),
        }
    }
}
