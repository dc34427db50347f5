//! Gate facade: the single entry point callers hold on to.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::engine::DecisionEngine;
use super::policy::{Consistency, Policy};
use super::verdict::Verdict;
use crate::config::RateLimitingConfig;
use crate::error::{GateError, Result};
use crate::store::CounterStore;

/// Admission gate over one counter store and one policy.
///
/// Construct it once at startup and share it (usually behind an `Arc`)
/// with whatever serves requests. It holds no mutable state of its own.
pub struct Gate {
    engine: DecisionEngine,
}

impl Gate {
    /// Start building a gate.
    pub fn builder() -> GateBuilder {
        GateBuilder::default()
    }

    /// Create a gate with the default consistency mode.
    pub fn new(store: Arc<dyn CounterStore>, limit: u64, timespan: Duration) -> Result<Self> {
        Self::builder()
            .store(store)
            .limit(limit)
            .timespan(timespan)
            .build()
    }

    /// Create a gate from the `rate_limiting` configuration section.
    pub fn from_config(store: Arc<dyn CounterStore>, config: &RateLimitingConfig) -> Result<Self> {
        Self::builder()
            .store(store)
            .limit(config.limit)
            .timespan(Duration::from_secs(config.timespan_secs))
            .consistency(config.consistency)
            .build()
    }

    /// Decide whether `identity` may proceed.
    ///
    /// `identity` must already be a bare client address; it is used as-is.
    /// This call can block for as long as the store's connection manager
    /// keeps retrying, so callers that need bounded latency should wrap it
    /// in their own timeout.
    pub async fn check(&self, identity: &str) -> Verdict {
        self.engine.evaluate(identity).await
    }

    /// The policy this gate enforces.
    pub fn policy(&self) -> &Policy {
        self.engine.policy()
    }
}

/// Builder validating every gate input once, at construction.
#[derive(Default)]
pub struct GateBuilder {
    store: Option<Arc<dyn CounterStore>>,
    limit: Option<u64>,
    timespan: Option<Duration>,
    consistency: Consistency,
}

impl GateBuilder {
    /// Counter store that holds the access log.
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Maximum admitted requests per identity per timespan.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Length of the trailing window.
    pub fn timespan(mut self, timespan: Duration) -> Self {
        self.timespan = Some(timespan);
        self
    }

    /// How counting and recording are paired. Defaults to count-then-insert.
    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// Validate the inputs and build the gate.
    pub fn build(self) -> Result<Gate> {
        let store = self
            .store
            .ok_or_else(|| GateError::Config("a counter store is required".to_string()))?;
        let limit = self
            .limit
            .ok_or_else(|| GateError::Config("a request limit is required".to_string()))?;
        let timespan = self
            .timespan
            .ok_or_else(|| GateError::Config("a timespan is required".to_string()))?;

        if self.consistency == Consistency::Atomic && !store.supports_atomic_admit() {
            return Err(GateError::Config(
                "atomic consistency requested but the store does not support it".to_string(),
            ));
        }

        let policy = Policy::new(limit, timespan)?.with_consistency(self.consistency);

        info!(
            limit = policy.limit(),
            timespan_secs = policy.timespan().as_secs_f64(),
            consistency = ?policy.consistency(),
            "Admission gate configured"
        );

        Ok(Gate {
            engine: DecisionEngine::new(store, policy),
        })
    }
}
