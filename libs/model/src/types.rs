//! Core types: flags, their lifecycle status, and submission results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StatusParseError;

/// Lifecycle status of a captured flag.
///
/// `Queued` is the only re-enterable state: a flag whose submission failed at
/// the backend level returns to it and is retried on a later cycle. `Skipped`
/// and the backend-confirmed states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagStatus {
    /// Waiting for submission (or requeued after a backend failure).
    Queued,

    /// Accepted by the scoring system.
    Accepted,

    /// Rejected by the scoring system (invalid, duplicate, too old, ...).
    Rejected,

    /// Expired before it could be submitted; never retried.
    Skipped,
}

impl FlagStatus {
    /// Storage representation, matching the `flags.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagStatus::Queued => "QUEUED",
            FlagStatus::Accepted => "ACCEPTED",
            FlagStatus::Rejected => "REJECTED",
            FlagStatus::Skipped => "SKIPPED",
        }
    }

    /// Returns true if the flag can never leave this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlagStatus::Queued)
    }
}

impl fmt::Display for FlagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlagStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(FlagStatus::Queued),
            "ACCEPTED" => Ok(FlagStatus::Accepted),
            "REJECTED" => Ok(FlagStatus::Rejected),
            "SKIPPED" => Ok(FlagStatus::Skipped),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// A captured flag awaiting (or past) submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    /// The token proving the exploit succeeded. Globally unique.
    pub token: String,

    /// Name of the exploit that captured this flag.
    pub exploit: String,

    /// The opposing team/service instance the flag was captured from.
    pub target: String,

    /// Current lifecycle status.
    pub status: FlagStatus,

    /// When the flag entered the queue.
    pub enqueued_at: DateTime<Utc>,

    /// Last response from the scoring system, if any.
    pub response: Option<String>,
}

impl Flag {
    /// The fairness grouping key for this flag.
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            exploit: self.exploit.clone(),
            target: self.target.clone(),
        }
    }
}

/// The (exploit, target) pair flags are grouped by for fair-share
/// allocation. Ordered so grouping produces a stable iteration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub exploit: String,
    pub target: String,
}

/// Outcome of one submission attempt for one flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    /// Token of the flag this result belongs to.
    pub token: String,

    /// Status the flag moves to.
    pub status: FlagStatus,

    /// Response or diagnostic text, recorded on the flag.
    pub response: String,
}

impl SubmitResult {
    pub fn new(
        token: impl Into<String>,
        status: FlagStatus,
        response: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            status,
            response: response.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("QUEUED", FlagStatus::Queued)]
    #[case("ACCEPTED", FlagStatus::Accepted)]
    #[case("REJECTED", FlagStatus::Rejected)]
    #[case("SKIPPED", FlagStatus::Skipped)]
    fn status_round_trips_through_storage_form(#[case] text: &str, #[case] status: FlagStatus) {
        assert_eq!(status.as_str(), text);
        assert_eq!(text.parse::<FlagStatus>().unwrap(), status);
        assert_eq!(status.to_string(), text);
    }

    #[rstest]
    #[case("")]
    #[case("queued")]
    #[case("PENDING")]
    fn unknown_status_fails_to_parse(#[case] text: &str) {
        let err = text.parse::<FlagStatus>().unwrap_err();
        assert_eq!(err, StatusParseError(text.to_string()));
    }

    #[test]
    fn only_queued_is_re_enterable() {
        assert!(!FlagStatus::Queued.is_terminal());
        assert!(FlagStatus::Accepted.is_terminal());
        assert!(FlagStatus::Rejected.is_terminal());
        assert!(FlagStatus::Skipped.is_terminal());
    }

    #[test]
    fn group_key_orders_by_exploit_then_target() {
        let a = GroupKey {
            exploit: "alpha".into(),
            target: "team2".into(),
        };
        let b = GroupKey {
            exploit: "alpha".into(),
            target: "team9".into(),
        };
        let c = GroupKey {
            exploit: "beta".into(),
            target: "team1".into(),
        };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn status_serializes_in_storage_form() {
        let json = serde_json::to_string(&FlagStatus::Skipped).unwrap();
        assert_eq!(json, "\"SKIPPED\"");
    }
}
