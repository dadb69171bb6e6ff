//! Scoring-system backend adapters.
//!
//! Each competition's checksystem speaks its own protocol, so submission is
//! delegated to a [`ScoringBackend`] implementation resolved by name from a
//! [`BackendRegistry`]. The name is read from configuration every cycle,
//! which means operators can switch backends (or register new ones at
//! startup) without touching the scheduler.

mod dry_run;

pub use dry_run::DryRunBackend;

use std::collections::HashMap;
use std::sync::Arc;

use adfarm_model::{Flag, SubmitResult};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::SubmitConfig;

/// Failures a backend can signal during a batch submission.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The scoring system could not be reached.
    #[error("scoring system unreachable: {0}")]
    Unreachable(String),

    /// The scoring system answered with something we could not interpret.
    #[error("malformed scoring system response: {0}")]
    Protocol(String),

    /// Transport-level I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Stable failure category, recorded in flag diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            BackendError::Unreachable(_) => "unreachable",
            BackendError::Protocol(_) => "protocol",
            BackendError::Io(_) => "io",
        }
    }
}

/// A scoring-system adapter.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Submit a batch of flags.
    ///
    /// Implementations should return one result per input flag and may
    /// perform arbitrary network I/O; no timeout is imposed here, so a
    /// hanging call stalls the whole cycle.
    async fn submit(
        &self,
        flags: &[Flag],
        config: &SubmitConfig,
    ) -> Result<Vec<SubmitResult>, BackendError>;
}

/// Registry mapping a backend name to its adapter.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ScoringBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in adapters.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("dry-run", Arc::new(DryRunBackend));
        registry
    }

    /// Register an adapter under a name, replacing any previous holder.
    pub fn register(&mut self, name: impl Into<String>, backend: Arc<dyn ScoringBackend>) {
        self.backends.insert(name.into(), backend);
    }

    /// Resolve an adapter by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ScoringBackend>> {
        self.backends.get(name).cloned()
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_resolves_dry_run() {
        let registry = BackendRegistry::builtin();
        assert!(registry.get("dry-run").is_some());
        assert!(registry.get("themis").is_none());
        assert_eq!(registry.names(), vec!["dry-run"]);
    }

    #[test]
    fn error_categories_are_stable() {
        assert_eq!(BackendError::Unreachable("x".into()).category(), "unreachable");
        assert_eq!(BackendError::Protocol("x".into()).category(), "protocol");
    }
}
