//! Lifecycle-event heuristics for in-flight attach and detach operations.
//!
//! The provider's event log is advisory only: it explains why a volume looks
//! busy but never decides ownership. Everything here reads the log newest
//! first and only looks at the most recent attach or detach.

use tracing::{info, warn};

use crate::config::WaitPolicies;
use crate::error::VolumeError;
use crate::poll::{WaitKind, poll_until};
use crate::provider::{EntityKind, EventAction, LifecycleEvent, Provider, VolumeId};

/// Read-only view over the provider's event log for volumes.
pub struct EventLog<'a, P: Provider + ?Sized> {
    provider: &'a P,
}

impl<'a, P: Provider + ?Sized> EventLog<'a, P> {
    /// Wraps `provider`.
    pub const fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    async fn latest_ownership_change(
        &self,
        volume_id: &VolumeId,
    ) -> Result<Option<LifecycleEvent>, VolumeError> {
        let events = self
            .provider
            .list_events(EntityKind::Volume, volume_id.as_str())
            .await?;
        Ok(events
            .into_iter()
            .find(|event| event.action.is_ownership_change()))
    }

    /// Returns `true` when the most recent attach or detach is a detach,
    /// whatever its status.
    ///
    /// A failed detach still counts: a volume whose latest detach failed is
    /// confirmed against the detach budget, not reported as a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the event log cannot be read.
    pub async fn is_detaching(&self, volume_id: &VolumeId) -> Result<bool, VolumeError> {
        Ok(self
            .latest_ownership_change(volume_id)
            .await?
            .is_some_and(|event| event.action == EventAction::Detach))
    }

    /// Returns the most recent attach or detach when it is still scheduled or
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the event log cannot be read.
    pub async fn in_flight(
        &self,
        volume_id: &VolumeId,
    ) -> Result<Option<LifecycleEvent>, VolumeError> {
        Ok(self
            .latest_ownership_change(volume_id)
            .await?
            .filter(|event| event.status.is_in_flight()))
    }

    /// Waits for the in-flight attach or detach on `volume_id` to finish or
    /// fail. Returns immediately when nothing is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::EventDrainTimeout`] when the event stays in
    /// flight past the event budget.
    pub async fn wait_for_owner_change(
        &self,
        volume_id: &VolumeId,
        waits: &WaitPolicies,
    ) -> Result<(), VolumeError> {
        let Some(event) = self.in_flight(volume_id).await? else {
            return Ok(());
        };
        info!(
            volume_id = %volume_id,
            event_id = %event.id,
            action = ?event.action,
            "waiting for in-flight event to settle"
        );

        let provider = self.provider;
        let event_id = &event.id;
        poll_until(waits.event, WaitKind::EventDrain, move || async move {
            match provider.get_event(event_id).await {
                Ok(current) => current.status.is_settled().then_some(current.status),
                Err(err) => {
                    warn!(event_id = %event_id, error = %err, "failed to observe event");
                    None
                }
            }
        })
        .await
        .map(|status| {
            info!(volume_id = %volume_id, event_id = %event_id, ?status, "event settled");
        })
        .map_err(|_| VolumeError::EventDrainTimeout {
            volume_id: volume_id.clone(),
            event_id: event.id.clone(),
        })
    }
}
