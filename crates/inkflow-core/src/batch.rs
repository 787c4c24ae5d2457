//! Bulk-send accounting.
//!
//! A batch sends one document to many recipients. Each recipient is
//! dispatched independently; a failure is recorded, never aborts the pass.
//! The accounting invariant `sent + failed == total` holds structurally:
//! every recipient is in exactly one of the two states after any pass.

use serde::{Deserialize, Serialize};

/// A recipient whose dispatch failed, with the most recent error.
/// Retries replace the error in place rather than appending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecipient {
    pub email: String,
    pub name: String,
    pub error: String,
}

/// Result of one dispatch attempt for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Failed { error: String },
}

/// Aggregate counts for a batch, derived from recipient states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: u32,
    pub sent: u32,
    pub failed: u32,
}

impl BatchCounts {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            sent: 0,
            failed: 0,
        }
    }

    /// Fold the outcome of one recipient's initial dispatch.
    pub fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Fold a retry outcome for a previously failed recipient.
    /// Retries never touch recipients already counted as sent.
    pub fn record_retry(&mut self, outcome: &DispatchOutcome) {
        if let DispatchOutcome::Sent = outcome {
            self.failed -= 1;
            self.sent += 1;
        }
    }

    /// `sent + failed == total` after every completed pass.
    pub fn balanced(&self) -> bool {
        self.sent + self.failed == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn outcome(ok: bool) -> DispatchOutcome {
        if ok {
            DispatchOutcome::Sent
        } else {
            DispatchOutcome::Failed {
                error: "mailbox unavailable".to_string(),
            }
        }
    }

    #[test]
    fn initial_pass_accounts_every_recipient() {
        let mut counts = BatchCounts::new(3);
        counts.record(&outcome(true));
        counts.record(&outcome(true));
        counts.record(&outcome(false));
        assert_eq!(counts.sent, 2);
        assert_eq!(counts.failed, 1);
        assert!(counts.balanced());
    }

    #[test]
    fn retry_success_moves_failed_to_sent() {
        let mut counts = BatchCounts {
            total: 3,
            sent: 2,
            failed: 1,
        };
        counts.record_retry(&outcome(true));
        assert_eq!(
            counts,
            BatchCounts {
                total: 3,
                sent: 3,
                failed: 0
            }
        );
        assert!(counts.balanced());
    }

    #[test]
    fn retry_failure_keeps_counts() {
        let mut counts = BatchCounts {
            total: 3,
            sent: 2,
            failed: 1,
        };
        counts.record_retry(&outcome(false));
        assert_eq!(counts.failed, 1);
        assert!(counts.balanced());
    }

    proptest! {
        /// The accounting invariant holds after any initial pass and any
        /// number of retry passes, and `sent` never decreases.
        #[test]
        fn invariant_under_arbitrary_passes(
            initial in proptest::collection::vec(any::<bool>(), 1..20),
            retries in proptest::collection::vec(proptest::collection::vec(any::<bool>(), 0..20), 0..5),
        ) {
            let mut counts = BatchCounts::new(initial.len() as u32);
            for ok in &initial {
                counts.record(&outcome(*ok));
            }
            prop_assert!(counts.balanced());

            for pass in retries {
                let sent_before = counts.sent;
                // A retry pass touches at most the currently failed set.
                for ok in pass.into_iter().take(counts.failed as usize) {
                    counts.record_retry(&outcome(ok));
                }
                prop_assert!(counts.balanced());
                prop_assert!(counts.sent >= sent_before);
            }
        }

        /// A batch with resolvable failures converges: once every retry
        /// succeeds, the failed set is empty.
        #[test]
        fn convergence_when_failures_resolve(initial in proptest::collection::vec(any::<bool>(), 1..20)) {
            let mut counts = BatchCounts::new(initial.len() as u32);
            for ok in &initial {
                counts.record(&outcome(*ok));
            }
            let failed = counts.failed;
            for _ in 0..failed {
                counts.record_retry(&outcome(true));
            }
            prop_assert_eq!(counts.failed, 0);
            prop_assert_eq!(counts.sent, counts.total);
        }
    }
}
