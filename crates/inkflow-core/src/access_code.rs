//! Access-code verification with attempt tracking and lockout.
//!
//! The code itself is never stored: only a SHA-256 hash of the normalized
//! form. Normalization is deliberately forgiving — senders read codes over
//! the phone, recipients type them with stray spaces and mixed case.
//!
//! [`AccessCodeGuard`] is the in-memory reference semantics. The store layer
//! reproduces the same decisions with single-statement conditional updates on
//! the session row (see `inkflow-api::store`), so two concurrent wrong
//! attempts cannot both pass the "count < max" check.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Consecutive failures before lockout.
pub const MAX_ATTEMPTS: u32 = 5;

/// Lockout length in minutes after too many failures.
pub const LOCKOUT_MINUTES: i64 = 30;

/// How long verification stays locked after too many failures.
pub fn lockout_duration() -> Duration {
    Duration::minutes(LOCKOUT_MINUTES)
}

/// How a raw code is normalized before hashing or comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Normalization {
    /// Lowercase the code (ASCII case fold).
    pub case_fold: bool,
    /// Remove all whitespace, not just the ends.
    pub strip_whitespace: bool,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            case_fold: true,
            strip_whitespace: true,
        }
    }
}

impl Normalization {
    /// Normalization by code type: `password` codes compare strictly
    /// (trim only); everything else gets the forgiving default.
    pub fn for_code_type(code_type: &str) -> Self {
        match code_type {
            "password" => Self {
                case_fold: false,
                strip_whitespace: false,
            },
            _ => Self::default(),
        }
    }
}

/// Apply `normalization` to a raw code. Trimming always happens.
pub fn normalize(raw: &str, normalization: Normalization) -> String {
    let mut code = raw.trim().to_string();
    if normalization.strip_whitespace {
        code.retain(|c| !c.is_whitespace());
    }
    if normalization.case_fold {
        code = code.to_lowercase();
    }
    code
}

/// Hex-encoded SHA-256 of the normalized code.
pub fn hash_code(raw: &str, normalization: Normalization) -> String {
    hex::encode(Sha256::digest(normalize(raw, normalization).as_bytes()))
}

/// Outcome of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Code matched; counters reset, `verified_at` set.
    Verified,
    /// Code mismatched; attempt consumed.
    Invalid { attempts_remaining: u32 },
    /// Verification is locked out. A locked attempt consumes nothing.
    Locked { until: DateTime<Utc> },
}

/// Per-session access-code state, mirrored by columns on the session row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCodeGuard {
    pub code_hash: String,
    pub normalization: Normalization,
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl AccessCodeGuard {
    pub fn new(raw_code: &str, normalization: Normalization) -> Self {
        Self {
            code_hash: hash_code(raw_code, normalization),
            normalization,
            failed_attempts: 0,
            lockout_until: None,
            verified_at: None,
        }
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| until > now)
    }

    /// Verify `raw_code` at time `now`, mutating the attempt counters.
    ///
    /// Order matters: an active lockout short-circuits before the hash is
    /// even compared, so a correct code during lockout is still `Locked` and
    /// leaves `failed_attempts` untouched.
    pub fn verify(&mut self, raw_code: &str, now: DateTime<Utc>) -> VerifyOutcome {
        if let Some(until) = self.lockout_until {
            if until > now {
                return VerifyOutcome::Locked { until };
            }
        }

        if hash_code(raw_code, self.normalization) == self.code_hash {
            self.failed_attempts = 0;
            self.lockout_until = None;
            self.verified_at = Some(now);
            return VerifyOutcome::Verified;
        }

        self.failed_attempts += 1;
        if self.failed_attempts >= MAX_ATTEMPTS {
            let until = now + lockout_duration();
            self.lockout_until = Some(until);
            VerifyOutcome::Locked { until }
        } else {
            VerifyOutcome::Invalid {
                attempts_remaining: MAX_ATTEMPTS - self.failed_attempts,
            }
        }
    }
}

/// Classify the post-increment counter from the store's failure-path update.
/// Keeps the threshold decision in one place for both implementations.
pub fn failure_outcome(failed_attempts: u32, lockout_until: Option<DateTime<Utc>>) -> VerifyOutcome {
    match lockout_until {
        Some(until) if failed_attempts >= MAX_ATTEMPTS => VerifyOutcome::Locked { until },
        _ => VerifyOutcome::Invalid {
            attempts_remaining: MAX_ATTEMPTS.saturating_sub(failed_attempts),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        "2026-01-10T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn normalization_folds_case_and_whitespace() {
        let n = Normalization::default();
        assert_eq!(normalize("  A b C1 ", n), "abc1");
        assert_eq!(hash_code("A B C1", n), hash_code("abc1", n));
    }

    #[test]
    fn strict_normalization_only_trims() {
        let n = Normalization {
            case_fold: false,
            strip_whitespace: false,
        };
        assert_eq!(normalize("  Pa ss ", n), "Pa ss");
        assert_ne!(hash_code("PASS", n), hash_code("pass", n));
    }

    #[test]
    fn correct_code_verifies_and_resets() {
        let mut guard = AccessCodeGuard::new("1234", Normalization::default());
        guard.failed_attempts = 3;
        assert_eq!(guard.verify("1234", now()), VerifyOutcome::Verified);
        assert_eq!(guard.failed_attempts, 0);
        assert_eq!(guard.verified_at, Some(now()));
    }

    #[test]
    fn fifth_failure_locks_for_thirty_minutes() {
        let mut guard = AccessCodeGuard::new("1234", Normalization::default());
        for (i, wrong) in ["0000", "1111", "2222", "3333"].iter().enumerate() {
            assert_eq!(
                guard.verify(wrong, now()),
                VerifyOutcome::Invalid {
                    attempts_remaining: MAX_ATTEMPTS - (i as u32 + 1)
                }
            );
        }
        assert_eq!(guard.failed_attempts, 4);
        assert!(!guard.is_locked_at(now()));

        let until = now() + lockout_duration();
        assert_eq!(guard.verify("4444", now()), VerifyOutcome::Locked { until });
        assert!(guard.is_locked_at(now()));
    }

    #[test]
    fn correct_code_during_lockout_stays_locked() {
        let mut guard = AccessCodeGuard::new("1234", Normalization::default());
        for wrong in ["0", "1", "2", "3", "4"] {
            guard.verify(wrong, now());
        }
        let attempts_before = guard.failed_attempts;
        let outcome = guard.verify("1234", now() + Duration::minutes(5));
        assert!(matches!(outcome, VerifyOutcome::Locked { .. }));
        assert_eq!(guard.failed_attempts, attempts_before);
        assert_eq!(guard.verified_at, None);
    }

    #[test]
    fn lockout_expires_and_correct_code_verifies() {
        let mut guard = AccessCodeGuard::new("1234", Normalization::default());
        for wrong in ["0", "1", "2", "3", "4"] {
            guard.verify(wrong, now());
        }
        let later = now() + lockout_duration() + Duration::seconds(1);
        assert_eq!(guard.verify("1234", later), VerifyOutcome::Verified);
    }

    proptest! {
        /// Lockout monotonicity: under any sequence of wrong attempts at a
        /// fixed instant, the guard locks exactly at the fifth failure and
        /// every later attempt is Locked.
        #[test]
        fn locks_exactly_at_max_attempts(wrongs in proptest::collection::vec("[0-9]{6}", 6..20)) {
            let mut guard = AccessCodeGuard::new("secret-code", Normalization::default());
            for (i, wrong) in wrongs.iter().enumerate() {
                let outcome = guard.verify(wrong, now());
                if (i as u32) < MAX_ATTEMPTS - 1 {
                    prop_assert_eq!(outcome, VerifyOutcome::Invalid {
                        attempts_remaining: MAX_ATTEMPTS - (i as u32 + 1)
                    });
                } else {
                    let locked = matches!(outcome, VerifyOutcome::Locked { .. });
                    prop_assert!(locked, "attempt {} should be locked", i + 1);
                }
            }
            prop_assert_eq!(guard.failed_attempts, MAX_ATTEMPTS);
        }

        /// A correct attempt strictly before the fifth failure resets the
        /// counter to zero.
        #[test]
        fn success_resets_counter(prior_failures in 0u32..MAX_ATTEMPTS) {
            let mut guard = AccessCodeGuard::new("secret-code", Normalization::default());
            for _ in 0..prior_failures {
                guard.verify("wrong", now());
            }
            prop_assert_eq!(guard.verify("secret-code", now()), VerifyOutcome::Verified);
            prop_assert_eq!(guard.failed_attempts, 0);
            prop_assert_eq!(guard.lockout_until, None);
        }

        /// Normalized equivalents always hash identically.
        #[test]
        fn normalization_equivalence(code in "[a-zA-Z0-9]{4,12}", spaces in 0usize..4) {
            let n = Normalization::default();
            let padded = format!("{}{}{}", " ".repeat(spaces), code.to_uppercase(), " ".repeat(spaces));
            prop_assert_eq!(hash_code(&padded, n), hash_code(&code.to_lowercase(), n));
        }
    }
}
