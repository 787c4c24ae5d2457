//! Session and envelope status lattices.
//!
//! Statuses are stored as snake_case TEXT in SQLite and serialized the same
//! way on the wire, so `Display`/`FromStr` and the serde encoding must agree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of one recipient's signing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, recipient has not opened the document.
    Pending,
    /// Sequential signing only: predecessors have not finished yet.
    AwaitingTurn,
    /// Recipient fetched the document at least once.
    Viewed,
    /// All documents signed; artifact generation still outstanding.
    Signed,
    /// Signed and the artifact reference is persisted.
    Completed,
    /// Owner cancelled before completion.
    Cancelled,
    /// Due date passed before completion.
    Expired,
}

impl SessionStatus {
    /// No recipient-driven transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Signed
                | SessionStatus::Completed
                | SessionStatus::Cancelled
                | SessionStatus::Expired
        )
    }

    /// Terminal and successful: the recipient finished signing.
    /// `Signed` counts — it only lacks the generated artifact.
    pub fn is_terminal_success(self) -> bool {
        matches!(self, SessionStatus::Signed | SessionStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::AwaitingTurn => "awaiting_turn",
            SessionStatus::Viewed => "viewed",
            SessionStatus::Signed => "signed",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Expired => "expired",
        }
    }

    pub const ALL: [SessionStatus; 7] = [
        SessionStatus::Pending,
        SessionStatus::AwaitingTurn,
        SessionStatus::Viewed,
        SessionStatus::Signed,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
        SessionStatus::Expired,
    ];
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for SessionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "awaiting_turn" => Ok(SessionStatus::AwaitingTurn),
            "viewed" => Ok(SessionStatus::Viewed),
            "signed" => Ok(SessionStatus::Signed),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Envelope-level status, derived from recipient sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Sent,
    Completed,
    Cancelled,
}

impl EnvelopeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeStatus::Sent => "sent",
            EnvelopeStatus::Completed => "completed",
            EnvelopeStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(EnvelopeStatus::Sent),
            "completed" => Ok(EnvelopeStatus::Completed),
            "cancelled" => Ok(EnvelopeStatus::Cancelled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_parse_roundtrip() {
        for status in SessionStatus::ALL {
            assert_eq!(status.to_string().parse::<SessionStatus>(), Ok(status));
        }
    }

    #[test]
    fn serde_matches_display() {
        for status in SessionStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }

    #[test]
    fn terminal_set_is_exactly_four() {
        let terminal: Vec<_> = SessionStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                SessionStatus::Signed,
                SessionStatus::Completed,
                SessionStatus::Cancelled,
                SessionStatus::Expired,
            ]
        );
    }

    #[test]
    fn unknown_status_fails_to_parse() {
        assert!("declined".parse::<SessionStatus>().is_err());
        assert!("".parse::<SessionStatus>().is_err());
    }
}
