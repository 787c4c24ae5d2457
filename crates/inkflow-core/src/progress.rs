//! Autosave progress computation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Completion snapshot over a session's required fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u32,
    pub total: u32,
    pub percent: u32,
}

impl Progress {
    /// Count required fields with a non-empty draft value.
    ///
    /// `percent = round(100 * filled / total)`; a session with no required
    /// fields reports 100% so autosave stays meaningful for optional-only
    /// layouts.
    pub fn compute(required_field_ids: &[String], draft: &HashMap<String, String>) -> Self {
        let total = required_field_ids.len() as u32;
        let completed = required_field_ids
            .iter()
            .filter(|id| draft.get(*id).is_some_and(|v| !v.trim().is_empty()))
            .count() as u32;
        let percent = if total == 0 {
            100
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u32
        };
        Self {
            completed,
            total,
            percent,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("field-{i}")).collect()
    }

    #[test]
    fn empty_draft_is_zero_percent() {
        let p = Progress::compute(&ids(4), &HashMap::new());
        assert_eq!(
            p,
            Progress {
                completed: 0,
                total: 4,
                percent: 0
            }
        );
    }

    #[test]
    fn one_of_three_rounds_to_33() {
        let mut draft = HashMap::new();
        draft.insert("field-0".to_string(), "Ada".to_string());
        assert_eq!(Progress::compute(&ids(3), &draft).percent, 33);
    }

    #[test]
    fn two_of_three_rounds_to_67() {
        let mut draft = HashMap::new();
        draft.insert("field-0".to_string(), "Ada".to_string());
        draft.insert("field-1".to_string(), "Lovelace".to_string());
        assert_eq!(Progress::compute(&ids(3), &draft).percent, 67);
    }

    #[test]
    fn whitespace_values_do_not_count() {
        let mut draft = HashMap::new();
        draft.insert("field-0".to_string(), "   ".to_string());
        assert_eq!(Progress::compute(&ids(2), &draft).completed, 0);
    }

    #[test]
    fn unknown_draft_keys_are_ignored() {
        let mut draft = HashMap::new();
        draft.insert("stray".to_string(), "x".to_string());
        assert_eq!(Progress::compute(&ids(2), &draft).completed, 0);
    }

    #[test]
    fn no_required_fields_is_complete() {
        let p = Progress::compute(&[], &HashMap::new());
        assert_eq!(p.percent, 100);
        assert!(p.is_complete());
    }

    proptest! {
        /// Percent is always within 0..=100 and completed never exceeds
        /// total, whatever the draft contains.
        #[test]
        fn percent_bounds(
            total in 0usize..30,
            filled in proptest::collection::vec(0usize..30, 0..30),
        ) {
            let fields = ids(total);
            let mut draft = HashMap::new();
            for i in filled {
                draft.insert(format!("field-{i}"), "value".to_string());
            }
            let p = Progress::compute(&fields, &draft);
            prop_assert!(p.percent <= 100);
            prop_assert!(p.completed <= p.total);
            if p.total > 0 {
                prop_assert_eq!(p.percent == 100, p.is_complete());
            }
        }
    }
}
