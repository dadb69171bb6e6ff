//! Submission cycle background worker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use adfarm_model::{Flag, FlagStatus, GroupKey};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use super::dispatcher;
use crate::config::SubmitConfig;
use crate::db::{DbError, FlagStore};
use crate::protocols::BackendRegistry;

/// Background worker driving the submission cycle.
///
/// Exactly one instance runs per process. Phases of a cycle never overlap:
/// a new cycle starts only after expire, fetch, dispatch and persist have
/// all completed and the pacing sleep has elapsed.
pub struct SubmitWorker {
    store: FlagStore,
    registry: Arc<BackendRegistry>,
    config: watch::Receiver<SubmitConfig>,
}

impl SubmitWorker {
    /// Create a new submit worker.
    pub fn new(
        store: FlagStore,
        registry: Arc<BackendRegistry>,
        config: watch::Receiver<SubmitConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Run until shutdown is signaled.
    ///
    /// The shutdown flag is observed only between cycles, so an in-flight
    /// dispatch always finishes before the loop exits. Storage failures are
    /// fatal and abort the loop.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DbError> {
        info!("Starting submit loop");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let cycle_start = Instant::now();
            let config = self.config.borrow().clone();

            self.run_cycle(&config).await?;

            // Pace to the target period, measured from cycle start. A cycle
            // that overran its period starts the next one immediately.
            if let Some(remaining) = config.submit_period.checked_sub(cycle_start.elapsed()) {
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!("Submit loop stopped");
        Ok(())
    }

    /// One expire → fetch → group → allocate → dispatch → persist pass.
    async fn run_cycle(&self, config: &SubmitConfig) -> Result<(), DbError> {
        let skipped = self.store.expire_stale(config.flag_lifetime).await?;
        if skipped > 0 {
            info!(
                skipped,
                lifetime_secs = config.flag_lifetime.as_secs(),
                "Expired stale flags"
            );
        }

        let queued = self.store.fetch_queued().await?;
        if queued.is_empty() {
            return Ok(());
        }

        let queue_depth = queued.len();
        let groups = group_by_key(queued);
        let batch = {
            let mut rng = rand::rng();
            adfarm_fairshare::allocate(groups, config.submit_limit, &mut rng)
        };
        debug!(
            selected = batch.len(),
            queued = queue_depth,
            backend = %config.backend,
            "Submitting flags"
        );

        let results = dispatcher::dispatch(&self.registry, &batch, config).await;

        let mut accepted = 0usize;
        let mut rejected = 0usize;
        let mut requeued = 0usize;
        for result in &results {
            match result.status {
                FlagStatus::Accepted => accepted += 1,
                FlagStatus::Rejected => rejected += 1,
                FlagStatus::Queued => requeued += 1,
                FlagStatus::Skipped => {}
            }
        }

        self.store.persist_results(&results).await?;

        if !results.is_empty() {
            info!(
                submitted = results.len(),
                accepted, rejected, requeued, "Submission cycle complete"
            );
        }

        Ok(())
    }
}

/// Partition flags by (exploit, target).
///
/// A BTreeMap keeps the group order deterministic for a given queue
/// snapshot, so allocation is reproducible under a seeded random source.
fn group_by_key(flags: Vec<Flag>) -> Vec<Vec<Flag>> {
    let mut groups: BTreeMap<GroupKey, Vec<Flag>> = BTreeMap::new();
    for flag in flags {
        groups.entry(flag.group_key()).or_default().push(flag);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn flag(token: &str, exploit: &str, target: &str) -> Flag {
        Flag {
            token: token.into(),
            exploit: exploit.into(),
            target: target.into(),
            status: FlagStatus::Queued,
            enqueued_at: Utc::now(),
            response: None,
        }
    }

    #[test]
    fn grouping_partitions_by_exploit_and_target() {
        let groups = group_by_key(vec![
            flag("A=", "sqli", "team1"),
            flag("B=", "sqli", "team2"),
            flag("C=", "sqli", "team1"),
            flag("D=", "lfi", "team1"),
        ]);

        assert_eq!(groups.len(), 3);
        // BTreeMap order: (lfi, team1), (sqli, team1), (sqli, team2).
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[0][0].token, "D=");
        assert_eq!(groups[1].len(), 2);
        assert_eq!(groups[2].len(), 1);
        assert_eq!(groups[2][0].token, "B=");
    }

    #[test]
    fn grouping_empty_input_yields_no_groups() {
        assert!(group_by_key(Vec::new()).is_empty());
    }
}
