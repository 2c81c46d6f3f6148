//! # Rename leases
//!
//! A rename lease marks a project as being relocated between storage
//! backends. While a live lease exists for a project, the registry refuses
//! writes under it; reads are unaffected.
//!
//! Leases are created and released by an external rename orchestrator. The
//! registry only ever reads them, through the [`LeaseStore`] trait.
//!
//! ## Consistency
//!
//! Leases are advisory. Both stores here resolve two racing acquisitions
//! for the same project as last-writer-wins, and neither carries a fencing
//! token or epoch. An orchestrator which loses such a race is not told so;
//! it will only notice when its [`release`](MemoryLeaseStore::release)
//! reports that the token no longer matches.
//!
//! ```
//! use std::time::Duration;
//! use lease::{LeaseStore, MemoryLeaseStore};
//!
//! # async fn example() -> Result<(), lease::LeaseError> {
//! let store = MemoryLeaseStore::new();
//! let held = store.acquire("acme/widgets", Duration::from_secs(60));
//!
//! assert!(store.exists("acme").await?);
//! assert!(store.release("acme", held.token));
//! # Ok(())
//! # }
//! ```

mod bucket;
mod error;
mod memory;
mod model;

use std::{fmt, sync::Arc};

pub use bucket::StorageLeaseStore;
pub use error::LeaseError;
pub use memory::MemoryLeaseStore;
pub use model::{project_key, RenameLease};

/// Read access to the rename leases held for projects.
///
/// `project` may be any repository path; implementations normalise it with
/// [`project_key`] before looking anything up.
#[async_trait::async_trait]
pub trait LeaseStore: fmt::Debug + Send + Sync {
    /// Name of the store, for logging.
    fn name(&self) -> &'static str;

    /// The live lease for a project, if any.
    ///
    /// Expired leases are reported as absent.
    async fn get(&self, project: &str) -> Result<Option<RenameLease>, LeaseError>;

    /// Whether a live lease exists for a project.
    async fn exists(&self, project: &str) -> Result<bool, LeaseError> {
        Ok(self.get(project).await?.is_some())
    }
}

#[async_trait::async_trait]
impl<S> LeaseStore for Arc<S>
where
    S: LeaseStore + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn get(&self, project: &str) -> Result<Option<RenameLease>, LeaseError> {
        (**self).get(project).await
    }

    async fn exists(&self, project: &str) -> Result<bool, LeaseError> {
        (**self).exists(project).await
    }
}
