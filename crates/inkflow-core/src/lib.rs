//! Signing workflow engine
//!
//! This crate holds the pure state-machine core of the Inkflow platform:
//! recipient status transitions, access-code verification with lockout,
//! envelope-level aggregation, bulk-send accounting, and autosave progress.
//!
//! Everything here is deliberately free of I/O. The HTTP service in
//! `inkflow-api` persists these decisions through conditional updates so
//! that concurrent recipients, retries, and owner actions linearize on the
//! stored row rather than on in-memory state.

pub mod access_code;
pub mod batch;
pub mod envelope;
pub mod progress;
pub mod status;
pub mod transition;

pub use access_code::{
    failure_outcome, hash_code, lockout_duration, normalize, AccessCodeGuard, Normalization,
    VerifyOutcome, LOCKOUT_MINUTES, MAX_ATTEMPTS,
};
pub use batch::{BatchCounts, DispatchOutcome, FailedRecipient};
pub use envelope::{envelope_outcome, EnvelopeOutcome};
pub use progress::Progress;
pub use status::{EnvelopeStatus, SessionStatus};
pub use transition::{apply, SessionAction, TransitionError, TransitionOutcome};
