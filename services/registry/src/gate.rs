//! Write admission against rename leases
//!
//! Every mutating request asks the gate first. The gate makes one bounded
//! lookup against the lease store and only refuses the write when that
//! lookup positively reports a live lease. A slow, failing or missing store
//! lets the write through.

use std::sync::Arc;
use std::time::Duration;

use lease::{LeaseStore, RenameLease, project_key};

use crate::error::{RegistryError, RegistryResult};

/// Default bound on a single lease lookup.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_millis(250);

/// Result of consulting the lease store for a repository.
#[derive(Debug, Clone)]
pub enum LeaseCheck {
    /// A live lease covers the repository's project.
    Blocked(RenameLease),
    /// Writes may proceed.
    NotBlocked,
}

/// Admission check for mutating requests.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    store: Option<Arc<dyn LeaseStore>>,
    timeout: Duration,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::disabled()
    }
}

impl AdmissionGate {
    /// A gate that admits everything without looking anything up.
    pub fn disabled() -> Self {
        Self {
            store: None,
            timeout: DEFAULT_LEASE_TIMEOUT,
        }
    }

    /// A gate backed by `store`, giving each lookup at most `timeout`.
    pub fn new(store: Arc<dyn LeaseStore>, timeout: Duration) -> Self {
        Self {
            store: Some(store),
            timeout,
        }
    }

    /// Whether a lease store is configured.
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Look up the lease covering `repository`.
    ///
    /// Exactly one attempt is made. Timeouts and store errors are logged and
    /// reported as [`LeaseCheck::NotBlocked`].
    #[tracing::instrument(skip(self), fields(project = project_key(repository)))]
    pub async fn check(&self, repository: &str) -> LeaseCheck {
        let Some(store) = &self.store else {
            return LeaseCheck::NotBlocked;
        };

        match tokio::time::timeout(self.timeout, store.get(repository)).await {
            Ok(Ok(Some(lease))) => LeaseCheck::Blocked(lease),
            Ok(Ok(None)) => LeaseCheck::NotBlocked,
            Ok(Err(error)) => {
                tracing::warn!(store = store.name(), %error, "lease lookup failed, admitting write");
                LeaseCheck::NotBlocked
            }
            Err(_) => {
                tracing::warn!(
                    store = store.name(),
                    timeout = ?self.timeout,
                    "lease lookup timed out, admitting write"
                );
                LeaseCheck::NotBlocked
            }
        }
    }

    /// Refuse the write with [`RegistryError::RenameInProgress`] when blocked.
    pub async fn admit(&self, repository: &str) -> RegistryResult<()> {
        match self.check(repository).await {
            LeaseCheck::NotBlocked => Ok(()),
            LeaseCheck::Blocked(lease) => {
                tracing::info!(
                    project = %lease.project_path,
                    expires_at = %lease.expires_at(),
                    "write refused, rename in progress"
                );
                Err(RegistryError::RenameInProgress {
                    project: lease.project_path,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lease::{LeaseError, MemoryLeaseStore};

    #[derive(Debug)]
    struct Broken;

    #[async_trait::async_trait]
    impl LeaseStore for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _project: &str) -> Result<Option<RenameLease>, LeaseError> {
            Err(LeaseError::Unavailable {
                store: "broken",
                reason: "connection refused".into(),
            })
        }
    }

    #[derive(Debug)]
    struct Stalled;

    #[async_trait::async_trait]
    impl LeaseStore for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn get(&self, _project: &str) -> Result<Option<RenameLease>, LeaseError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn disabled_gate_admits() {
        assert!(AdmissionGate::disabled().admit("foo/bar").await.is_ok());
    }

    #[tokio::test]
    async fn live_lease_blocks_whole_project() {
        let store = Arc::new(MemoryLeaseStore::new());
        store.acquire("foo", Duration::from_secs(30));
        let gate = AdmissionGate::new(store, DEFAULT_LEASE_TIMEOUT);

        assert!(matches!(
            gate.check("foo/bar/baz").await,
            LeaseCheck::Blocked(_)
        ));
        assert!(matches!(
            gate.admit("foo/bar").await,
            Err(RegistryError::RenameInProgress { project }) if project == "foo"
        ));
        assert!(gate.admit("other/bar").await.is_ok());
    }

    #[tokio::test]
    async fn store_error_fails_open() {
        let gate = AdmissionGate::new(Arc::new(Broken), DEFAULT_LEASE_TIMEOUT);
        assert!(matches!(gate.check("foo").await, LeaseCheck::NotBlocked));
    }

    #[tokio::test(start_paused = true)]
    async fn store_timeout_fails_open() {
        let gate = AdmissionGate::new(Arc::new(Stalled), Duration::from_millis(50));
        assert!(gate.admit("foo/bar").await.is_ok());
    }
}
