//! Rate decision engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, trace, warn};

use super::policy::{Consistency, Policy};
use super::verdict::Verdict;
use crate::store::{CounterStore, StoreError, WindowCount};

/// Evaluates one identity's recent accesses against the policy.
///
/// Holds no per-call state, so one engine serves any number of concurrent
/// evaluations. All mutation happens in the store.
pub struct DecisionEngine {
    /// Backing access log
    store: Arc<dyn CounterStore>,
    /// Shared, immutable policy
    policy: Policy,
}

impl DecisionEngine {
    /// Create an engine over `store` enforcing `policy`.
    pub fn new(store: Arc<dyn CounterStore>, policy: Policy) -> Self {
        Self { store, policy }
    }

    /// The policy this engine enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Decide whether `identity` may make another request right now.
    ///
    /// The window is `(now - timespan, now]` on the store's clock and is
    /// recomputed on every call. An access is recorded only when the count
    /// before the write is strictly below the limit.
    pub async fn evaluate(&self, identity: &str) -> Verdict {
        trace!(identity = %identity, "Evaluating admission");

        let now = match self.store.now().await {
            Ok(now) => now,
            Err(e) => return self.fail_closed(identity, e),
        };
        let window_start = now
            .checked_sub_signed(self.policy.window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match self.policy.consistency() {
            Consistency::CountThenInsert => {
                self.count_then_insert(identity, window_start, now).await
            }
            Consistency::Atomic => self.admit_atomically(identity, window_start, now).await,
        }
    }

    async fn count_then_insert(
        &self,
        identity: &str,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Verdict {
        let window = match self.store.count_since(identity, window_start).await {
            Ok(window) => window,
            Err(e) => return self.fail_closed(identity, e),
        };

        // >= because the access being evaluated would be one more on top.
        if window.count >= self.policy.limit() {
            return self.reject(identity, &window, now);
        }

        debug!(
            identity = %identity,
            count = window.count,
            limit = self.policy.limit(),
            "Admitting request"
        );

        match self.store.append(identity, now).await {
            Ok(()) => Verdict::admit(),
            Err(e) => {
                warn!(
                    identity = %identity,
                    error = %e,
                    "Admitted request but failed to record the access"
                );
                Verdict::admit().with_error(e)
            }
        }
    }

    async fn admit_atomically(
        &self,
        identity: &str,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Verdict {
        let window = match self
            .store
            .admit_if_below(identity, window_start, now, self.policy.limit())
            .await
        {
            Ok(window) => window,
            Err(e) => return self.fail_closed(identity, e),
        };

        if window.count >= self.policy.limit() {
            return self.reject(identity, &window, now);
        }

        debug!(
            identity = %identity,
            count = window.count,
            limit = self.policy.limit(),
            "Admitting request"
        );
        Verdict::admit()
    }

    fn reject(&self, identity: &str, window: &WindowCount, now: DateTime<Utc>) -> Verdict {
        let wait = self.wait_hint(window.oldest, now);
        debug!(
            identity = %identity,
            count = window.count,
            limit = self.policy.limit(),
            wait_ms = wait.as_millis() as u64,
            "Rate limit exceeded"
        );
        Verdict::reject(wait)
    }

    fn fail_closed(&self, identity: &str, e: StoreError) -> Verdict {
        error!(
            identity = %identity,
            error = %e,
            "Counter store unavailable, rejecting request"
        );
        Verdict::fail_closed(self.policy.timespan(), e)
    }

    /// Time until the oldest in-window access ages out, clamped to
    /// `[0, timespan]`. Zero when there is no reference timestamp.
    fn wait_hint(&self, oldest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(oldest) = oldest else {
            return Duration::ZERO;
        };
        match self.policy.window().checked_sub(&(now - oldest)) {
            Some(remaining) => remaining
                .to_std()
                .map(|wait| wait.min(self.policy.timespan()))
                .unwrap_or(Duration::ZERO),
            // Only reachable with a record far ahead of `now`.
            None => self.policy.timespan(),
        }
    }
}
