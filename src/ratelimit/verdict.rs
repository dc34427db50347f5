//! Outcome of one admission check.

use std::fmt;
use std::time::Duration;

use crate::store::StoreError;

/// Admit/reject decision plus how long a rejected client should wait.
///
/// `error` is set whenever the store misbehaved during the evaluation.
/// A count failure yields a rejected verdict with the error attached; a
/// failed write after an admit decision yields an admitted verdict with
/// the error attached, and the caller chooses what to do with it.
#[derive(Debug)]
pub struct Verdict {
    /// Whether the request must be refused
    pub rejected: bool,
    /// Suggested delay before retrying; zero when admitted
    pub wait: Duration,
    /// Store failure encountered while deciding, if any
    pub error: Option<StoreError>,
}

impl Verdict {
    /// An admitted request.
    pub fn admit() -> Self {
        Self {
            rejected: false,
            wait: Duration::ZERO,
            error: None,
        }
    }

    /// A request over the limit.
    pub fn reject(wait: Duration) -> Self {
        Self {
            rejected: true,
            wait,
            error: None,
        }
    }

    /// A rejection caused by the store being unable to answer.
    pub fn fail_closed(wait: Duration, error: StoreError) -> Self {
        Self {
            rejected: true,
            wait,
            error: Some(error),
        }
    }

    /// Attach a store error to an already decided verdict.
    pub fn with_error(mut self, error: StoreError) -> Self {
        self.error = Some(error);
        self
    }

    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        !self.rejected
    }

    /// Wait hint in fractional seconds, for client-facing messages.
    pub fn wait_secs_f64(&self) -> f64 {
        self.wait.as_secs_f64()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rejected {
            write!(f, "rejected, retry in {:.3}s", self.wait_secs_f64())?;
        } else {
            write!(f, "admitted")?;
        }
        if let Some(ref error) = self.error {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}
