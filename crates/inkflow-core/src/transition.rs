//! The recipient state machine as a single guarded transition table.
//!
//! Every status check in the platform goes through this table. The store
//! layer derives its conditional-update `WHERE status IN (...)` clauses from
//! [`SessionAction::permitted_from`], so the SQL guards and the in-memory
//! table cannot disagree. A compare-and-swap loser re-reads the row and
//! classifies the result with [`apply`].

use crate::status::SessionStatus;

/// An action that may move a session between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// First content fetch by the recipient.
    View,
    /// Sign submission covering all of the session's documents.
    Sign,
    /// Artifact reference persisted after signing.
    StoreArtifact,
    /// Owner-initiated cancellation.
    Cancel,
    /// Due date observed to have passed.
    Expire,
    /// Sequential signing: predecessor finished, this recipient's turn.
    Activate,
}

impl SessionAction {
    /// Statuses this action may fire from. Anything else is a no-op or a
    /// conflict, decided by [`apply`].
    pub fn permitted_from(self) -> &'static [SessionStatus] {
        use SessionStatus::*;
        match self {
            SessionAction::View => &[Pending],
            SessionAction::Sign => &[Pending, Viewed],
            SessionAction::StoreArtifact => &[Signed],
            SessionAction::Cancel => &[Pending, AwaitingTurn, Viewed],
            SessionAction::Expire => &[Pending, AwaitingTurn, Viewed],
            SessionAction::Activate => &[AwaitingTurn],
        }
    }

    /// Status the action commits when permitted.
    pub fn target(self) -> SessionStatus {
        match self {
            SessionAction::View => SessionStatus::Viewed,
            SessionAction::Sign => SessionStatus::Signed,
            SessionAction::StoreArtifact => SessionStatus::Completed,
            SessionAction::Cancel => SessionStatus::Cancelled,
            SessionAction::Expire => SessionStatus::Expired,
            SessionAction::Activate => SessionStatus::Pending,
        }
    }

    /// SQL fragment of permitted source statuses, e.g. `'pending','viewed'`.
    pub fn permitted_sql_list(self) -> String {
        self.permitted_from()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Result of applying an action to an observed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Action permitted; commit the target status.
    Move(SessionStatus),
    /// The session already holds a terminal result for this action; callers
    /// return the stored result instead of erroring (idempotent sign).
    PriorResult(SessionStatus),
    /// Repeat of an idempotent non-terminal action (e.g. a re-view).
    Noop(SessionStatus),
}

/// Why an action was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("session is {0}, action not permitted")]
    Terminal(SessionStatus),
    #[error("recipient must wait for predecessors to finish signing")]
    AwaitingTurn,
    #[error("action has no effect from status {0}")]
    NotApplicable(SessionStatus),
}

/// Classify `action` against the observed `current` status.
///
/// The match is exhaustive over every (status, action) pair so adding a
/// status forces every action to be reconsidered.
pub fn apply(
    current: SessionStatus,
    action: SessionAction,
) -> Result<TransitionOutcome, TransitionError> {
    use SessionAction::*;
    use SessionStatus::*;

    match (current, action) {
        // Permitted pairs commit the action's target. The proptests pin
        // these arms to `permitted_from`, which the SQL guards derive from.
        (Pending, View) => Ok(TransitionOutcome::Move(Viewed)),
        (Pending | Viewed, Sign) => Ok(TransitionOutcome::Move(Signed)),
        (Signed, StoreArtifact) => Ok(TransitionOutcome::Move(Completed)),
        (Pending | AwaitingTurn | Viewed, Cancel) => Ok(TransitionOutcome::Move(Cancelled)),
        (Pending | AwaitingTurn | Viewed, Expire) => Ok(TransitionOutcome::Move(Expired)),
        (AwaitingTurn, Activate) => Ok(TransitionOutcome::Move(Pending)),

        // Re-views only bump the counter; no transition side effects.
        (Viewed, View) => Ok(TransitionOutcome::Noop(Viewed)),
        (AwaitingTurn, View) => Ok(TransitionOutcome::Noop(AwaitingTurn)),

        // A retried sign on a finished session returns the stored result.
        (Signed, Sign) | (Completed, Sign) => Ok(TransitionOutcome::PriorResult(current)),
        (Cancelled, Sign) | (Expired, Sign) => Err(TransitionError::Terminal(current)),
        (AwaitingTurn, Sign) => Err(TransitionError::AwaitingTurn),

        // Artifact storage is only meaningful from `signed`; a racing
        // duplicate observes `completed` and keeps the stored reference.
        (Completed, StoreArtifact) => Ok(TransitionOutcome::PriorResult(Completed)),
        (Pending | AwaitingTurn | Viewed | Cancelled | Expired, StoreArtifact) => {
            Err(TransitionError::NotApplicable(current))
        }

        (Signed | Completed | Cancelled | Expired, Cancel) => {
            Err(TransitionError::Terminal(current))
        }
        (Signed | Completed | Cancelled | Expired, Expire) => {
            Err(TransitionError::Terminal(current))
        }
        (Signed | Completed | Cancelled | Expired, View) => Err(TransitionError::Terminal(current)),
        (Pending | Viewed | Signed | Completed | Cancelled | Expired, Activate) => {
            Err(TransitionError::NotApplicable(current))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const ACTIONS: [SessionAction; 6] = [
        SessionAction::View,
        SessionAction::Sign,
        SessionAction::StoreArtifact,
        SessionAction::Cancel,
        SessionAction::Expire,
        SessionAction::Activate,
    ];

    #[test]
    fn happy_path_single_recipient() {
        assert_eq!(
            apply(SessionStatus::Pending, SessionAction::View),
            Ok(TransitionOutcome::Move(SessionStatus::Viewed))
        );
        assert_eq!(
            apply(SessionStatus::Viewed, SessionAction::Sign),
            Ok(TransitionOutcome::Move(SessionStatus::Signed))
        );
        assert_eq!(
            apply(SessionStatus::Signed, SessionAction::StoreArtifact),
            Ok(TransitionOutcome::Move(SessionStatus::Completed))
        );
    }

    #[test]
    fn repeated_view_is_noop() {
        assert_eq!(
            apply(SessionStatus::Viewed, SessionAction::View),
            Ok(TransitionOutcome::Noop(SessionStatus::Viewed))
        );
    }

    #[test]
    fn sign_without_view_is_permitted() {
        assert_eq!(
            apply(SessionStatus::Pending, SessionAction::Sign),
            Ok(TransitionOutcome::Move(SessionStatus::Signed))
        );
    }

    #[test]
    fn retried_sign_returns_prior_result() {
        assert_eq!(
            apply(SessionStatus::Completed, SessionAction::Sign),
            Ok(TransitionOutcome::PriorResult(SessionStatus::Completed))
        );
        assert_eq!(
            apply(SessionStatus::Signed, SessionAction::Sign),
            Ok(TransitionOutcome::PriorResult(SessionStatus::Signed))
        );
    }

    #[test]
    fn cancel_after_completion_is_rejected() {
        assert_eq!(
            apply(SessionStatus::Completed, SessionAction::Cancel),
            Err(TransitionError::Terminal(SessionStatus::Completed))
        );
        assert_eq!(
            apply(SessionStatus::Signed, SessionAction::Cancel),
            Err(TransitionError::Terminal(SessionStatus::Signed))
        );
    }

    #[test]
    fn moves_exactly_on_permitted_pairs() {
        for status in SessionStatus::ALL {
            for action in ACTIONS {
                let moved = matches!(apply(status, action), Ok(TransitionOutcome::Move(_)));
                assert_eq!(
                    moved,
                    action.permitted_from().contains(&status),
                    "{status} / {action:?}"
                );
            }
        }
    }

    #[test]
    fn awaiting_turn_blocks_signing_but_not_cancelling() {
        assert_eq!(
            apply(SessionStatus::AwaitingTurn, SessionAction::Sign),
            Err(TransitionError::AwaitingTurn)
        );
        assert_eq!(
            apply(SessionStatus::AwaitingTurn, SessionAction::Cancel),
            Ok(TransitionOutcome::Move(SessionStatus::Cancelled))
        );
    }

    #[test]
    fn activation_promotes_only_awaiting_turn() {
        assert_eq!(
            apply(SessionStatus::AwaitingTurn, SessionAction::Activate),
            Ok(TransitionOutcome::Move(SessionStatus::Pending))
        );
        assert_eq!(
            apply(SessionStatus::Viewed, SessionAction::Activate),
            Err(TransitionError::NotApplicable(SessionStatus::Viewed))
        );
    }

    #[test]
    fn sql_list_matches_table() {
        assert_eq!(
            SessionAction::Sign.permitted_sql_list(),
            "'pending','viewed'"
        );
        assert_eq!(
            SessionAction::Cancel.permitted_sql_list(),
            "'pending','awaiting_turn','viewed'"
        );
    }

    proptest! {
        /// Terminal statuses are absorbing: no action moves a session out of
        /// cancelled or expired, and signed/completed only advance along the
        /// artifact path.
        #[test]
        fn terminal_states_absorb(
            status_idx in 0usize..SessionStatus::ALL.len(),
            action_idx in 0usize..ACTIONS.len(),
        ) {
            let status = SessionStatus::ALL[status_idx];
            let action = ACTIONS[action_idx];
            prop_assume!(status.is_terminal());

            match apply(status, action) {
                Ok(TransitionOutcome::Move(next)) => {
                    // The only legal move out of a terminal status is the
                    // artifact promotion signed -> completed.
                    prop_assert_eq!(status, SessionStatus::Signed);
                    prop_assert_eq!(action, SessionAction::StoreArtifact);
                    prop_assert_eq!(next, SessionStatus::Completed);
                }
                Ok(TransitionOutcome::PriorResult(prior)) => prop_assert_eq!(prior, status),
                Ok(TransitionOutcome::Noop(s)) => prop_assert_eq!(s, status),
                Err(_) => {}
            }
        }

        /// Every permitted source status really does move to the action's
        /// target.
        #[test]
        fn permitted_sources_move_to_target(action_idx in 0usize..ACTIONS.len()) {
            let action = ACTIONS[action_idx];
            for &from in action.permitted_from() {
                prop_assert_eq!(
                    apply(from, action),
                    Ok(TransitionOutcome::Move(action.target()))
                );
            }
        }

        /// `apply` never panics over the full (status, action) grid.
        #[test]
        fn total_over_grid(
            status_idx in 0usize..SessionStatus::ALL.len(),
            action_idx in 0usize..ACTIONS.len(),
        ) {
            let _ = apply(SessionStatus::ALL[status_idx], ACTIONS[action_idx]);
        }
    }
}
