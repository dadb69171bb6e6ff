//! A backend that accepts every flag without contacting any scoring system.
//!
//! Used for local exercises and smoke tests where no real checksystem is
//! available.

use adfarm_model::{Flag, FlagStatus, SubmitResult};
use async_trait::async_trait;
use tracing::debug;

use super::{BackendError, ScoringBackend};
use crate::config::SubmitConfig;

pub struct DryRunBackend;

#[async_trait]
impl ScoringBackend for DryRunBackend {
    async fn submit(
        &self,
        flags: &[Flag],
        _config: &SubmitConfig,
    ) -> Result<Vec<SubmitResult>, BackendError> {
        debug!(count = flags.len(), "Dry-run accepting flags");
        Ok(flags
            .iter()
            .map(|flag| {
                SubmitResult::new(&flag.token, FlagStatus::Accepted, "accepted (dry run)")
            })
            .collect())
    }
}
