//! Error types for flag status parsing.

use thiserror::Error;

/// A status string read from storage did not match any known variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown flag status: {0:?}")]
pub struct StatusParseError(pub String);
