//! Batch dispatch with whole-batch failure containment.

use std::collections::{HashMap, HashSet};

use adfarm_model::{Flag, FlagStatus, SubmitResult};
use tracing::{error, warn};

use crate::config::SubmitConfig;
use crate::protocols::BackendRegistry;

/// Submit a batch through the backend named in `config`.
///
/// Never fails: any backend-level failure (including an unknown backend
/// name) requeues the whole batch, with the failure recorded as each flag's
/// diagnostic, to be retried next cycle. No attempt is made to distinguish
/// which flags might have succeeded before the failure.
pub async fn dispatch(
    registry: &BackendRegistry,
    flags: &[Flag],
    config: &SubmitConfig,
) -> Vec<SubmitResult> {
    let Some(backend) = registry.get(&config.backend) else {
        error!(backend = %config.backend, "Unknown scoring backend; requeueing batch");
        return requeue_all(
            flags,
            &format!("config: unknown backend {:?}", config.backend),
        );
    };

    match backend.submit(flags, config).await {
        Ok(results) => reconcile(flags, results),
        Err(e) => {
            error!(
                category = e.category(),
                error = %e,
                count = flags.len(),
                "Scoring backend failed; requeueing batch"
            );
            requeue_all(flags, &format!("{}: {}", e.category(), e))
        }
    }
}

fn requeue_all(flags: &[Flag], message: &str) -> Vec<SubmitResult> {
    flags
        .iter()
        .map(|flag| SubmitResult::new(&flag.token, FlagStatus::Queued, message))
        .collect()
}

/// Enforce the dispatch contract: exactly one result per input flag.
///
/// Results for tokens outside the batch are dropped; flags the backend did
/// not cover are requeued so they retry next cycle.
fn reconcile(flags: &[Flag], results: Vec<SubmitResult>) -> Vec<SubmitResult> {
    let batch: HashSet<&str> = flags.iter().map(|f| f.token.as_str()).collect();

    let mut by_token: HashMap<String, SubmitResult> = HashMap::with_capacity(results.len());
    for result in results {
        if !batch.contains(result.token.as_str()) {
            warn!(token = %result.token, "Backend returned a result for a flag outside the batch; dropping");
            continue;
        }
        if let Some(previous) = by_token.insert(result.token.clone(), result) {
            warn!(token = %previous.token, "Backend returned duplicate results for a flag; keeping the last");
        }
    }

    flags
        .iter()
        .map(|flag| {
            by_token.remove(&flag.token).unwrap_or_else(|| {
                warn!(token = %flag.token, "Backend returned no result for flag; requeueing");
                SubmitResult::new(&flag.token, FlagStatus::Queued, "no response from backend")
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{BackendError, ScoringBackend};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;

    fn flag(token: &str) -> Flag {
        Flag {
            token: token.into(),
            exploit: "sploit".into(),
            target: "10.60.1.2".into(),
            status: FlagStatus::Queued,
            enqueued_at: Utc::now(),
            response: None,
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ScoringBackend for FailingBackend {
        async fn submit(
            &self,
            _flags: &[Flag],
            _config: &SubmitConfig,
        ) -> Result<Vec<SubmitResult>, BackendError> {
            Err(BackendError::Unreachable("connection refused".into()))
        }
    }

    struct StutteringBackend;

    #[async_trait]
    impl ScoringBackend for StutteringBackend {
        async fn submit(
            &self,
            flags: &[Flag],
            _config: &SubmitConfig,
        ) -> Result<Vec<SubmitResult>, BackendError> {
            // Answers the first flag twice with conflicting outcomes.
            Ok(vec![
                SubmitResult::new(&flags[0].token, FlagStatus::Rejected, "first answer"),
                SubmitResult::new(&flags[0].token, FlagStatus::Accepted, "second answer"),
            ])
        }
    }

    struct ForgetfulBackend;

    #[async_trait]
    impl ScoringBackend for ForgetfulBackend {
        async fn submit(
            &self,
            flags: &[Flag],
            _config: &SubmitConfig,
        ) -> Result<Vec<SubmitResult>, BackendError> {
            // Answers only the first flag, plus one nobody asked about.
            let mut results = vec![SubmitResult::new(
                &flags[0].token,
                FlagStatus::Accepted,
                "ok",
            )];
            results.push(SubmitResult::new("BOGUS=", FlagStatus::Rejected, "??"));
            Ok(results)
        }
    }

    fn registry_with(name: &str, backend: Arc<dyn ScoringBackend>) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(name, backend);
        registry
    }

    fn config_for(backend: &str) -> SubmitConfig {
        SubmitConfig {
            backend: backend.into(),
            ..SubmitConfig::default()
        }
    }

    #[tokio::test]
    async fn backend_failure_requeues_whole_batch_with_diagnostic() {
        let registry = registry_with("flaky", Arc::new(FailingBackend));
        let flags = vec![flag("A="), flag("B="), flag("C=")];

        let results = dispatch(&registry, &flags, &config_for("flaky")).await;

        assert_eq!(results.len(), 3);
        for (result, flag) in results.iter().zip(&flags) {
            assert_eq!(result.token, flag.token);
            assert_eq!(result.status, FlagStatus::Queued);
            assert!(result.response.contains("unreachable"));
            assert!(result.response.contains("connection refused"));
        }
    }

    #[tokio::test]
    async fn unknown_backend_requeues_whole_batch() {
        let registry = BackendRegistry::new();
        let flags = vec![flag("A=")];

        let results = dispatch(&registry, &flags, &config_for("nope")).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, FlagStatus::Queued);
        assert!(results[0].response.contains("unknown backend"));
    }

    #[tokio::test]
    async fn partial_results_are_topped_up_and_strays_dropped() {
        let registry = registry_with("partial", Arc::new(ForgetfulBackend));
        let flags = vec![flag("A="), flag("B=")];

        let results = dispatch(&registry, &flags, &config_for("partial")).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].token, "A=");
        assert_eq!(results[0].status, FlagStatus::Accepted);
        assert_eq!(results[1].token, "B=");
        assert_eq!(results[1].status, FlagStatus::Queued);
        assert!(!results.iter().any(|r| r.token == "BOGUS="));
    }

    #[tokio::test]
    async fn duplicate_results_keep_the_last() {
        let registry = registry_with("stutter", Arc::new(StutteringBackend));
        let flags = vec![flag("A=")];

        let results = dispatch(&registry, &flags, &config_for("stutter")).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, FlagStatus::Accepted);
        assert_eq!(results[0].response, "second answer");
    }

    #[tokio::test]
    async fn empty_batch_produces_no_results() {
        let registry = BackendRegistry::builtin();
        let results = dispatch(&registry, &[], &config_for("dry-run")).await;
        assert!(results.is_empty());
    }
}
