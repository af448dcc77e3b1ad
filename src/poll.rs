//! Bounded polling used by every wait in the attachment lifecycle.
//!
//! The provider offers no push notifications, so attach/detach completion,
//! event drainage and device appearance are all observed by re-checking a
//! condition at a fixed interval until a deadline. Keeping the loop in one
//! place keeps timeout policy uniform and lets tests drive it with a paused
//! `tokio` clock.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Identifies which wait exhausted its budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitKind {
    /// Waiting for the kernel to surface the block device.
    DeviceReady,
    /// Waiting for the provider to report this node as owner.
    AttachConfirm,
    /// Waiting for the provider to report the volume as detached.
    DetachConfirm,
    /// Waiting for an in-flight lifecycle event to settle.
    EventDrain,
}

impl WaitKind {
    /// Short, stable name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeviceReady => "device-ready",
            Self::AttachConfirm => "attach-confirm",
            Self::DetachConfirm => "detach-confirm",
            Self::EventDrain => "event-drain",
        }
    }
}

impl fmt::Display for WaitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total budget and spacing for one kind of wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Overall time allowed before the wait fails.
    pub timeout: Duration,
    /// Delay between two evaluations of the condition.
    pub interval: Duration,
}

impl PollPolicy {
    /// Builds a policy from a timeout and an interval.
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Raised when a condition did not hold before its deadline.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("{kind} wait timed out after {waited:?}")]
pub struct WaitTimeout {
    /// Wait that failed.
    pub kind: WaitKind,
    /// Time spent waiting.
    pub waited: Duration,
}

/// Re-evaluates `check` every `policy.interval` until it yields a value or
/// `policy.timeout` elapses.
///
/// The condition is always evaluated at least once and once more at the
/// deadline, so a zero timeout still performs a single check. A timeout too
/// large to place on the clock never expires.
///
/// # Errors
///
/// Returns [`WaitTimeout`] tagged with `kind` when the deadline passes
/// without the condition producing a value.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    kind: WaitKind,
    mut check: F,
) -> Result<T, WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let deadline = started.checked_add(policy.timeout);
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        if let Some(value) = check().await {
            return Ok(value);
        }

        let now = Instant::now();
        let pause = match deadline {
            Some(deadline) if now >= deadline => {
                return Err(WaitTimeout {
                    kind,
                    waited: now.duration_since(started),
                });
            }
            Some(deadline) => policy.interval.min(deadline.duration_since(now)),
            None => policy.interval,
        };

        debug!(wait = %kind, attempt, "condition not met; polling again");
        sleep(pause).await;
    }
}

/// Boolean form of [`poll_until`].
///
/// # Errors
///
/// Returns [`WaitTimeout`] when `check` never returns `true` in time.
pub async fn wait_for<F, Fut>(policy: PollPolicy, kind: WaitKind, mut check: F) -> Result<(), WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_until(policy, kind, || {
        let pending = check();
        async move { pending.await.then_some(()) }
    })
    .await
}
