//! # adfarm-model
//!
//! Flag data model for the adfarm submission scheduler.
//!
//! ## Design Principles
//!
//! - A flag is identified by its token; tokens are globally unique
//! - Flag status only advances; `QUEUED` is the only re-enterable state
//! - Flags sharing a `GroupKey` (exploit, target) are fungible for
//!   fair-share allocation

mod error;
mod types;

pub use error::StatusParseError;
pub use types::{Flag, FlagStatus, GroupKey, SubmitResult};
