//! Envelope-level aggregation over recipient sessions.
//!
//! Envelope completion is always recomputed from the recipient statuses at
//! hand; the stored envelope status is a cache that readers re-derive. Only
//! `completed` counts — a `signed` session still owes its artifact, so the
//! envelope is not done until that lands.

use crate::status::SessionStatus;

/// Derived envelope state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeOutcome {
    /// Every recipient session is `completed`.
    Complete,
    /// Some recipients still outstanding. Partial completion is expected,
    /// not a failure; callers emit a progress notification.
    InProgress { done: u32, total: u32 },
}

/// Fold recipient statuses into the envelope outcome.
pub fn envelope_outcome<I>(statuses: I) -> EnvelopeOutcome
where
    I: IntoIterator<Item = SessionStatus>,
{
    let mut done = 0u32;
    let mut total = 0u32;
    for status in statuses {
        total += 1;
        if status == SessionStatus::Completed {
            done += 1;
        }
    }
    if total > 0 && done == total {
        EnvelopeOutcome::Complete
    } else {
        EnvelopeOutcome::InProgress { done, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn all_completed_is_complete() {
        let statuses = [SessionStatus::Completed; 3];
        assert_eq!(envelope_outcome(statuses), EnvelopeOutcome::Complete);
    }

    #[test]
    fn one_of_three_leaves_envelope_in_progress() {
        let statuses = [
            SessionStatus::Completed,
            SessionStatus::Viewed,
            SessionStatus::Pending,
        ];
        assert_eq!(
            envelope_outcome(statuses),
            EnvelopeOutcome::InProgress { done: 1, total: 3 }
        );
    }

    #[test]
    fn signed_without_artifact_does_not_complete_envelope() {
        let statuses = [SessionStatus::Completed, SessionStatus::Signed];
        assert_eq!(
            envelope_outcome(statuses),
            EnvelopeOutcome::InProgress { done: 1, total: 2 }
        );
    }

    #[test]
    fn empty_envelope_is_not_complete() {
        assert_eq!(
            envelope_outcome([]),
            EnvelopeOutcome::InProgress { done: 0, total: 0 }
        );
    }

    proptest! {
        /// Complete iff every status equals `completed`.
        #[test]
        fn complete_iff_all_completed(
            idxs in proptest::collection::vec(0usize..SessionStatus::ALL.len(), 1..12)
        ) {
            let statuses: Vec<_> = idxs.iter().map(|&i| SessionStatus::ALL[i]).collect();
            let all_done = statuses.iter().all(|&s| s == SessionStatus::Completed);
            let outcome = envelope_outcome(statuses.clone());
            prop_assert_eq!(outcome == EnvelopeOutcome::Complete, all_done);
            if let EnvelopeOutcome::InProgress { done, total } = outcome {
                prop_assert_eq!(total as usize, statuses.len());
                prop_assert!(done < total || total == 0);
            }
        }
    }
}
